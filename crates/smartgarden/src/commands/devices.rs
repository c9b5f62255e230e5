//! Device command handlers.

use std::sync::Arc;

use chrono::Utc;
use tabled::Tabled;

use smartgarden_core::model::{TimedDuration, ValveState};
use smartgarden_core::{Device, DeviceFilter, DeviceId, DeviceState, GardenClient};

use crate::cli::{DevicesArgs, DevicesCommand};
use crate::error::CliError;
use crate::output::{self, Printer};

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Activity")]
    activity: String,
    #[tabled(rename = "Battery")]
    battery: String,
    #[tabled(rename = "Signal")]
    signal: String,
}

fn row(printer: &Printer, d: &Arc<Device>) -> DeviceRow {
    DeviceRow {
        id: d.id.to_string(),
        name: d.name().to_owned(),
        kind: d.kind.to_string(),
        activity: printer.activity(&d.activity_label(), d.has_active_service()),
        battery: d
            .common
            .battery_level
            .map_or_else(|| "-".into(), |b| format!("{b}%")),
        signal: d
            .common
            .rf_link_level
            .map_or_else(|| "-".into(), |l| format!("{l}%")),
    }
}

// ── Detail view ─────────────────────────────────────────────────────

fn remaining(duration: Option<&TimedDuration>) -> String {
    duration.map_or_else(String::new, |d| {
        let left = d.remaining(Utc::now());
        format!("{}m {:02}s left", left / 60, left % 60)
    })
}

fn valve_lines(valve: &ValveState) -> Vec<(&'static str, String)> {
    vec![
        ("Service", valve.service_id.to_string()),
        ("Valve", valve.name.clone().unwrap_or_default()),
        ("Activity", valve.activity.to_string()),
        ("Remaining", remaining(valve.duration.as_ref())),
        ("Status", valve.state.to_string()),
        ("Last error", valve.last_error_code.clone().unwrap_or_default()),
    ]
}

fn detail(printer: &Printer, d: &Arc<Device>) -> String {
    let mut pairs: Vec<(&str, String)> = vec![
        ("ID", d.id.to_string()),
        ("Name", d.name().to_owned()),
        ("Type", d.kind.to_string()),
        ("Location", d.location_id.to_string()),
        ("Model", d.common.model_type.clone().unwrap_or_default()),
        ("Serial", d.common.serial.clone().unwrap_or_default()),
        (
            "Battery",
            d.common.battery_level.map_or_else(String::new, |b| {
                format!("{b}% ({})", d.common.battery_state.as_deref().unwrap_or("-"))
            }),
        ),
        (
            "Signal",
            d.common.rf_link_level.map_or_else(String::new, |l| {
                format!("{l}% ({})", d.common.rf_link_state.as_deref().unwrap_or("-"))
            }),
        ),
        (
            "Updated",
            d.last_update
                .and_then(|m| m.observed_at)
                .map_or_else(String::new, |t| t.to_rfc3339()),
        ),
    ];

    let mut sections = Vec::new();
    match &d.state {
        DeviceState::Mower(m) => {
            let label = m.activity.to_string();
            pairs.push(("Activity", printer.activity(&label, m.activity.is_active())));
            pairs.push(("Override", remaining(m.override_duration.as_ref())));
            pairs.push(("Hours", output::or_dash(m.operating_hours)));
            pairs.push(("Status", m.state.to_string()));
            pairs.push(("Last error", m.last_error_code.clone().unwrap_or_default()));
        }
        DeviceState::Valve(v) => pairs.extend(valve_lines(v)),
        DeviceState::PowerSocket(s) => {
            let label = s.activity.to_string();
            pairs.push(("Activity", printer.activity(&label, s.activity.is_active())));
            pairs.push(("Remaining", remaining(s.duration.as_ref())));
            pairs.push(("Status", s.state.to_string()));
            pairs.push(("Last error", s.last_error_code.clone().unwrap_or_default()));
        }
        DeviceState::Irrigation(irr) => {
            if let Some(ref set) = irr.valve_set {
                pairs.push(("Controller", set.state.to_string()));
            }
            for valve in irr.valves.values() {
                sections.push(output::detail_lines(&valve_lines(valve)));
            }
        }
        DeviceState::Sensor(s) => {
            let fmt = |v: Option<f64>, unit: &str| {
                v.map_or_else(String::new, |v| format!("{v}{unit}"))
            };
            pairs.push(("Soil humidity", fmt(s.soil_humidity, "%")));
            pairs.push(("Soil temp", fmt(s.soil_temperature, "°C")));
            pairs.push(("Ambient temp", fmt(s.ambient_temperature, "°C")));
            pairs.push(("Light", fmt(s.light_intensity, " lx")));
        }
        DeviceState::Common => {}
    }

    let mut out = output::detail_lines(&pairs);
    for section in sections {
        out.push_str("\n\n");
        out.push_str(&printer.heading("Valve"));
        out.push('\n');
        out.push_str(&section);
    }
    out
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(
    client: &GardenClient,
    args: DevicesArgs,
    printer: &Printer,
) -> Result<(), CliError> {
    match args.command {
        DevicesCommand::List { kind, active } => {
            let mut devices: Vec<Arc<Device>> = if let Some(kind) = kind {
                client.registry().find_by_type(kind).iter().collect()
            } else {
                client.registry().devices().iter().cloned().collect()
            };
            if active {
                devices.retain(|d| DeviceFilter::Active.matches(d));
            }
            devices.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.id.cmp(&b.id)));
            printer.list(&devices, |d| row(printer, d), |d| d.id.to_string())
        }
        DevicesCommand::Get { device } => {
            let id = DeviceId::new(device);
            let found = client
                .device(&id)
                .ok_or_else(|| CliError::device_not_found(id.as_str()))?;
            printer.single(&found, |d| detail(printer, d), |d| d.id.to_string())
        }
    }
}

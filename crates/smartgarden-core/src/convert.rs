// ── Wire → domain conversion ──
//
// Turns JSON:API resources from `smartgarden-api` into domain devices and
// partial updates. Service attributes are `{ value, timestamp }` objects;
// location attributes are plain values.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use smartgarden_api::{LocationDocument, Resource};

use crate::model::{
    CommonPatch, Device, DeviceId, DeviceKind, DeviceState, DeviceUpdate, IrrigationState,
    Location, LocationId, LocationState, MowerPatch, MowerState, PowerSocketPatch,
    PowerSocketState, SensorPatch, SensorState, ServiceId, ServicePatch, TimedDuration,
    UpdateMarker, ValvePatch, ValveSetPatch, ValveState, parse_wire,
};

// ── Markers ──────────────────────────────────────────────────────────

/// Stamps converted resources with freshness markers.
///
/// The arrival counter is shared by every connection of one channel, so
/// markers keep increasing across reconnects. Resources without attribute
/// timestamps get no time at all; local time is never mixed into the
/// server's ordering.
#[derive(Debug, Default)]
pub struct MarkerSource {
    seq: AtomicU64,
}

impl MarkerSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marker for a resource received now.
    pub fn stamp(&self, resource: &Resource) -> UpdateMarker {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        match resource.latest_timestamp() {
            Some(observed_at) => UpdateMarker::new(observed_at, seq),
            None => UpdateMarker::arrival(seq),
        }
    }
}

// ── Push messages ────────────────────────────────────────────────────

/// A typed push message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Location metadata changed.
    Location { id: LocationId, name: String },
    /// Device envelope (relationships only). Carries no state.
    Device { id: DeviceId },
    /// Partial update of one service.
    Service(DeviceUpdate),
    /// A service type this client does not model.
    Unsupported { kind: String },
}

pub fn push_message(resource: &Resource, markers: &MarkerSource) -> PushMessage {
    match resource.kind.as_str() {
        "LOCATION" => PushMessage::Location {
            id: LocationId::from(resource.id.as_str()),
            name: location_name(resource),
        },
        "DEVICE" => PushMessage::Device {
            id: DeviceId::from(resource.id.as_str()),
        },
        kind => match service_patch(resource) {
            Some(patch) => PushMessage::Service(DeviceUpdate {
                device_id: DeviceId::from(resource.device_id()),
                service_id: ServiceId::from(resource.id.as_str()),
                patch,
                marker: markers.stamp(resource),
            }),
            None => PushMessage::Unsupported {
                kind: kind.to_owned(),
            },
        },
    }
}

// ── Locations ────────────────────────────────────────────────────────

fn location_name(resource: &Resource) -> String {
    resource
        .plain_str("name")
        .or_else(|| resource.attribute("name").and_then(|a| a.value.as_str()))
        .unwrap_or(resource.id.as_str())
        .to_owned()
}

/// Summary of a location from the location list (no devices).
pub fn location_summary(resource: &Resource) -> Location {
    Location {
        id: LocationId::from(resource.id.as_str()),
        name: location_name(resource),
        device_ids: resource
            .related_ids("devices")
            .into_iter()
            .map(DeviceId::from)
            .collect(),
    }
}

/// Build the full state of a location from its document.
///
/// Services are grouped by hardware id and each group becomes one device.
/// Groups without a recognised service are skipped.
pub fn location_state(doc: &LocationDocument, markers: &MarkerSource) -> LocationState {
    let location_id = LocationId::from(doc.data.id.as_str());

    let mut groups: BTreeMap<&str, Vec<&Resource>> = BTreeMap::new();
    for resource in &doc.included {
        if matches!(resource.kind.as_str(), "LOCATION" | "DEVICE") {
            continue;
        }
        groups.entry(resource.device_id()).or_default().push(resource);
    }

    let devices = groups
        .into_iter()
        .filter_map(|(device_id, services)| {
            build_device(DeviceId::from(device_id), &location_id, &services, markers)
        })
        .collect();

    LocationState {
        id: location_id,
        name: location_name(&doc.data),
        devices,
    }
}

fn build_device(
    id: DeviceId,
    location_id: &LocationId,
    services: &[&Resource],
    markers: &MarkerSource,
) -> Option<Device> {
    let first = |kind: &str| services.iter().copied().find(|r| r.kind == kind);
    let count = |kind: &str| services.iter().filter(|r| r.kind == kind).count();
    let sid = |r: &Resource| ServiceId::from(r.id.as_str());

    let (kind, state) = if let Some(mower) = first("MOWER") {
        (
            DeviceKind::Mower,
            DeviceState::Mower(MowerState::new(sid(mower))),
        )
    } else if let Some(sensor) = first("SENSOR") {
        let kind = if sensor.attributes.contains_key("ambientTemperature") {
            DeviceKind::Sensor
        } else {
            DeviceKind::SoilSensor
        };
        (kind, DeviceState::Sensor(SensorState::default()))
    } else if let Some(socket) = first("POWER_SOCKET") {
        (
            DeviceKind::PowerSocket,
            DeviceState::PowerSocket(PowerSocketState::new(sid(socket))),
        )
    } else if count("VALVE") > 1 || (count("VALVE") == 1 && first("VALVE_SET").is_some()) {
        (
            DeviceKind::IrrigationValve,
            DeviceState::Irrigation(IrrigationState::default()),
        )
    } else if let Some(valve) = first("VALVE") {
        (
            DeviceKind::Valve,
            DeviceState::Valve(ValveState::new(sid(valve))),
        )
    } else if first("COMMON").is_some() {
        (DeviceKind::Common, DeviceState::Common)
    } else {
        tracing::debug!(device_id = %id, "Skipping device without supported services");
        return None;
    };

    let mut device = Device::new(id, location_id.clone(), kind, state);

    let mut ordered: Vec<&Resource> = services.to_vec();
    ordered.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.kind.cmp(&b.kind)));
    for resource in ordered {
        let Some(patch) = service_patch(resource) else {
            continue;
        };
        let service_id = sid(resource);
        if patch.apply_to(&service_id, &mut device) {
            device.record_marker(service_id, markers.stamp(resource));
        }
    }

    Some(device)
}

// ── Services ─────────────────────────────────────────────────────────

/// Convert one service resource into a patch of the attributes it carries.
pub fn service_patch(r: &Resource) -> Option<ServicePatch> {
    let patch = match r.kind.as_str() {
        "COMMON" => ServicePatch::Common(CommonPatch {
            name: text(r, "name"),
            serial: text(r, "serial"),
            model_type: text(r, "modelType"),
            battery_level: percent(r, "batteryLevel"),
            battery_state: text(r, "batteryState"),
            rf_link_level: percent(r, "rfLinkLevel"),
            rf_link_state: text(r, "rfLinkState"),
        }),
        "MOWER" => ServicePatch::Mower(MowerPatch {
            activity: text(r, "activity").map(|s| parse_wire(&s)),
            state: text(r, "state").map(|s| parse_wire(&s)),
            last_error_code: text(r, "lastErrorCode"),
            operating_hours: whole(r, "operatingHours"),
            override_duration: duration(r, "mowingDuration"),
        }),
        "VALVE" => ServicePatch::Valve(ValvePatch {
            name: text(r, "name"),
            activity: text(r, "activity").map(|s| parse_wire(&s)),
            state: text(r, "state").map(|s| parse_wire(&s)),
            last_error_code: text(r, "lastErrorCode"),
            duration: duration(r, "valveDuration").or_else(|| duration(r, "duration")),
        }),
        "VALVE_SET" => ServicePatch::ValveSet(ValveSetPatch {
            state: text(r, "state").map(|s| parse_wire(&s)),
            last_error_code: text(r, "lastErrorCode"),
        }),
        "POWER_SOCKET" => ServicePatch::PowerSocket(PowerSocketPatch {
            activity: text(r, "activity").map(|s| parse_wire(&s)),
            state: text(r, "state").map(|s| parse_wire(&s)),
            last_error_code: text(r, "lastErrorCode"),
            duration: duration(r, "overrideDuration").or_else(|| duration(r, "duration")),
        }),
        "SENSOR" => ServicePatch::Sensor(SensorPatch {
            soil_humidity: number(r, "soilHumidity"),
            soil_temperature: number(r, "soilTemperature"),
            ambient_temperature: number(r, "ambientTemperature"),
            light_intensity: number(r, "lightIntensity"),
        }),
        _ => return None,
    };
    Some(patch)
}

fn text(r: &Resource, name: &str) -> Option<String> {
    let attr = r.attribute(name)?;
    match attr.value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(r: &Resource, name: &str) -> Option<f64> {
    r.attribute(name)?.value.as_f64()
}

fn whole(r: &Resource, name: &str) -> Option<u64> {
    r.attribute(name)?.value.as_u64()
}

fn percent(r: &Resource, name: &str) -> Option<u8> {
    whole(r, name).and_then(|v| u8::try_from(v).ok())
}

fn duration(r: &Resource, name: &str) -> Option<TimedDuration> {
    let attr = r.attribute(name)?;
    Some(TimedDuration {
        seconds: attr.value.as_u64()?,
        started_at: attr.timestamp,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::{MowerActivity, ServiceStatus, ValveActivity};

    fn markers() -> MarkerSource {
        MarkerSource::new()
    }

    fn document() -> LocationDocument {
        serde_json::from_value(json!({
            "data": { "id": "loc-1", "type": "LOCATION", "attributes": { "name": "Backyard" } },
            "included": [
                { "id": "loc-1", "type": "LOCATION", "attributes": { "name": "Backyard" } },
                { "id": "mower", "type": "DEVICE", "attributes": {} },
                { "id": "mower", "type": "COMMON", "attributes": {
                    "name": { "value": "Sileno" },
                    "batteryLevel": { "value": 87, "timestamp": "2026-05-01T10:00:00Z" }
                } },
                { "id": "mower", "type": "MOWER", "attributes": {
                    "activity": { "value": "OK_CUTTING", "timestamp": "2026-05-01T10:01:00Z" },
                    "state": { "value": "OK" },
                    "operatingHours": { "value": 412 }
                } },
                { "id": "water", "type": "COMMON", "attributes": { "name": { "value": "Tap" } } },
                { "id": "water:1", "type": "VALVE", "attributes": {
                    "activity": { "value": "CLOSED" }
                } },
                { "id": "irr", "type": "COMMON", "attributes": {} },
                { "id": "irr", "type": "VALVE_SET", "attributes": { "state": { "value": "OK" } } },
                { "id": "irr:1", "type": "VALVE", "attributes": { "activity": { "value": "CLOSED" } } },
                { "id": "irr:2", "type": "VALVE", "attributes": {
                    "activity": { "value": "MANUAL_WATERING" },
                    "duration": { "value": 600, "timestamp": "2026-05-01T11:55:00Z" }
                } },
                { "id": "soil", "type": "SENSOR", "attributes": { "soilHumidity": { "value": 41 } } },
                { "id": "amb", "type": "SENSOR", "attributes": {
                    "soilHumidity": { "value": 50 },
                    "ambientTemperature": { "value": 21.5 }
                } },
                { "id": "sock", "type": "POWER_SOCKET", "attributes": { "activity": { "value": "FOREVER_ON" } } },
                { "id": "gw", "type": "COMMON", "attributes": { "name": { "value": "Gateway" } } },
                { "id": "odd", "type": "UNKNOWN_THING", "attributes": {} }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn device_factory_picks_types() {
        let state = location_state(&document(), &markers());
        assert_eq!(state.name, "Backyard");

        let kinds: BTreeMap<&str, DeviceKind> = state
            .devices
            .iter()
            .map(|d| (d.id.as_str(), d.kind))
            .collect();
        assert_eq!(kinds["mower"], DeviceKind::Mower);
        assert_eq!(kinds["water"], DeviceKind::Valve);
        assert_eq!(kinds["irr"], DeviceKind::IrrigationValve);
        assert_eq!(kinds["soil"], DeviceKind::SoilSensor);
        assert_eq!(kinds["amb"], DeviceKind::Sensor);
        assert_eq!(kinds["sock"], DeviceKind::PowerSocket);
        assert_eq!(kinds["gw"], DeviceKind::Common);
        assert!(!kinds.contains_key("odd"));
    }

    #[test]
    fn device_state_is_populated() {
        let state = location_state(&document(), &markers());
        let mower = state.devices.iter().find(|d| d.id.as_str() == "mower").unwrap();

        assert_eq!(mower.name(), "Sileno");
        assert_eq!(mower.common.battery_level, Some(87));
        let DeviceState::Mower(m) = &mower.state else {
            panic!("expected mower state");
        };
        assert_eq!(m.activity, MowerActivity::OkCutting);
        assert_eq!(m.state, ServiceStatus::Ok);
        assert_eq!(m.operating_hours, Some(412));
        assert_eq!(
            mower.last_update.unwrap().observed_at.unwrap().to_rfc3339(),
            "2026-05-01T10:01:00+00:00"
        );

        let irr = state.devices.iter().find(|d| d.id.as_str() == "irr").unwrap();
        let DeviceState::Irrigation(irr_state) = &irr.state else {
            panic!("expected irrigation state");
        };
        assert_eq!(irr_state.valves.len(), 2);
        let open = &irr_state.valves[&ServiceId::from("irr:2")];
        assert_eq!(open.activity, ValveActivity::ManualWatering);
        assert_eq!(open.duration.unwrap().seconds, 600);
        assert_eq!(
            irr_state.valve_set.as_ref().unwrap().state,
            ServiceStatus::Ok
        );
    }

    #[test]
    fn push_messages_are_typed() {
        let markers = markers();
        let service: Resource = serde_json::from_value(json!({
            "id": "water:1", "type": "VALVE",
            "attributes": { "activity": { "value": "MANUAL_WATERING" } }
        }))
        .unwrap();
        let PushMessage::Service(update) = push_message(&service, &markers) else {
            panic!("expected service update");
        };
        assert_eq!(update.device_id.as_str(), "water");
        assert_eq!(update.patch.activity_active(), Some(true));
        assert_eq!(update.marker.seq, 1);

        let location: Resource = serde_json::from_value(json!({
            "id": "loc-1", "type": "LOCATION", "attributes": { "name": "Front" }
        }))
        .unwrap();
        assert_eq!(
            push_message(&location, &markers),
            PushMessage::Location {
                id: LocationId::from("loc-1"),
                name: "Front".into()
            }
        );

        let odd: Resource =
            serde_json::from_value(json!({ "id": "x", "type": "RADAR" })).unwrap();
        assert!(matches!(
            push_message(&odd, &markers),
            PushMessage::Unsupported { .. }
        ));
    }

    #[test]
    fn markers_without_timestamps_order_by_arrival() {
        let markers = markers();
        let bare: Resource =
            serde_json::from_value(json!({ "id": "a:1", "type": "VALVE", "attributes": {} }))
                .unwrap();
        let first = markers.stamp(&bare);
        let second = markers.stamp(&bare);
        assert_eq!(first.observed_at, None);
        assert!(second.is_newer_than(&first));
        assert!(!first.is_newer_than(&second));
    }

    #[test]
    fn timestamped_update_after_bare_one_is_not_stale() {
        let markers = markers();
        let bare: Resource =
            serde_json::from_value(json!({ "id": "a:1", "type": "VALVE", "attributes": {} }))
                .unwrap();
        let stamped: Resource = serde_json::from_value(json!({
            "id": "a:1", "type": "VALVE",
            "attributes": {
                "activity": { "value": "CLOSED", "timestamp": "2020-01-01T00:00:00Z" }
            }
        }))
        .unwrap();
        let first = markers.stamp(&bare);
        let second = markers.stamp(&stamped);
        assert!(second.is_newer_than(&first));
    }
}

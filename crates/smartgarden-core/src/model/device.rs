// ── Device domain types ──

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{Display, EnumString};

use super::ids::{DeviceId, LocationId, ServiceId};
use super::update::UpdateMarker;

/// Device type tag, derived from the services a device exposes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum DeviceKind {
    Mower,
    Valve,
    IrrigationValve,
    PowerSocket,
    Sensor,
    SoilSensor,
    Common,
}

/// Health of a single service (`state` attribute).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Ok,
    Warning,
    Error,
    Unavailable,
    #[default]
    Unknown,
}

/// Mower `activity` values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MowerActivity {
    Paused,
    PausedInCs,
    OkCutting,
    OkCuttingTimerOverridden,
    OkSearching,
    OkLeaving,
    OkCharging,
    ParkedTimer,
    ParkedParkSelected,
    ParkedAutotimer,
    ParkedFrost,
    ParkedDailyLimitReached,
    None,
    #[default]
    Unknown,
}

impl MowerActivity {
    /// Out on the lawn, cutting or heading out to cut.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::OkCutting | Self::OkCuttingTimerOverridden | Self::OkLeaving
        )
    }
}

/// Valve `activity` values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ValveActivity {
    Closed,
    ManualWatering,
    ScheduledWatering,
    #[default]
    Unknown,
}

impl ValveActivity {
    pub fn is_active(self) -> bool {
        matches!(self, Self::ManualWatering | Self::ScheduledWatering)
    }
}

/// Power socket `activity` values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SocketActivity {
    Off,
    ForeverOn,
    TimeLimitedOn,
    ScheduledOn,
    #[default]
    Unknown,
}

impl SocketActivity {
    pub fn is_active(self) -> bool {
        matches!(self, Self::ForeverOn | Self::TimeLimitedOn | Self::ScheduledOn)
    }
}

/// Parse a wire enum value, falling back to the type's default (`Unknown`).
pub(crate) fn parse_wire<T: std::str::FromStr + Default>(raw: &str) -> T {
    raw.parse().unwrap_or_default()
}

// ── State bag ────────────────────────────────────────────────────────

/// A duration started at a point in time (`valveDuration`, `duration`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimedDuration {
    pub seconds: u64,
    pub started_at: Option<DateTime<Utc>>,
}

impl TimedDuration {
    /// Seconds left at `now`. Without a start time the full duration remains.
    pub fn remaining(&self, now: DateTime<Utc>) -> u64 {
        let Some(started) = self.started_at else {
            return self.seconds;
        };
        let elapsed = u64::try_from((now - started).num_seconds()).unwrap_or(0);
        self.seconds.saturating_sub(elapsed)
    }
}

/// Information every device carries through its `COMMON` service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommonInfo {
    pub name: Option<String>,
    pub serial: Option<String>,
    pub model_type: Option<String>,
    pub battery_level: Option<u8>,
    pub battery_state: Option<String>,
    pub rf_link_level: Option<u8>,
    pub rf_link_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MowerState {
    pub service_id: ServiceId,
    pub activity: MowerActivity,
    pub state: ServiceStatus,
    pub last_error_code: Option<String>,
    pub operating_hours: Option<u64>,
    pub override_duration: Option<TimedDuration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValveState {
    pub service_id: ServiceId,
    pub name: Option<String>,
    pub activity: ValveActivity,
    pub state: ServiceStatus,
    pub last_error_code: Option<String>,
    pub duration: Option<TimedDuration>,
}

impl MowerState {
    pub fn new(service_id: ServiceId) -> Self {
        Self {
            service_id,
            activity: MowerActivity::Unknown,
            state: ServiceStatus::Unknown,
            last_error_code: None,
            operating_hours: None,
            override_duration: None,
        }
    }
}

impl ValveState {
    pub fn new(service_id: ServiceId) -> Self {
        Self {
            service_id,
            name: None,
            activity: ValveActivity::Unknown,
            state: ServiceStatus::Unknown,
            last_error_code: None,
            duration: None,
        }
    }
}

impl PowerSocketState {
    pub fn new(service_id: ServiceId) -> Self {
        Self {
            service_id,
            activity: SocketActivity::Unknown,
            state: ServiceStatus::Unknown,
            last_error_code: None,
            duration: None,
        }
    }
}

/// Controller-level state of a smart irrigation control.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValveSetState {
    pub state: ServiceStatus,
    pub last_error_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IrrigationState {
    pub valves: BTreeMap<ServiceId, ValveState>,
    pub valve_set: Option<ValveSetState>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerSocketState {
    pub service_id: ServiceId,
    pub activity: SocketActivity,
    pub state: ServiceStatus,
    pub last_error_code: Option<String>,
    pub duration: Option<TimedDuration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorState {
    pub soil_humidity: Option<f64>,
    pub soil_temperature: Option<f64>,
    pub ambient_temperature: Option<f64>,
    pub light_intensity: Option<f64>,
}

/// Type-specific state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceState {
    Mower(MowerState),
    Valve(ValveState),
    Irrigation(IrrigationState),
    PowerSocket(PowerSocketState),
    Sensor(SensorState),
    Common,
}

// ── Device ───────────────────────────────────────────────────────────

/// One piece of hardware in a location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: DeviceId,
    pub location_id: LocationId,
    pub kind: DeviceKind,
    pub common: CommonInfo,
    pub state: DeviceState,
    /// Newest marker of any applied update.
    pub last_update: Option<UpdateMarker>,
    #[serde(skip)]
    pub(crate) markers: BTreeMap<ServiceId, UpdateMarker>,
}

impl Device {
    pub fn new(
        id: DeviceId,
        location_id: LocationId,
        kind: DeviceKind,
        state: DeviceState,
    ) -> Self {
        Self {
            id,
            location_id,
            kind,
            common: CommonInfo::default(),
            state,
            last_update: None,
            markers: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.common.name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Marker of the last update applied to one service.
    pub fn marker_for(&self, service_id: &ServiceId) -> Option<UpdateMarker> {
        self.markers.get(service_id).copied()
    }

    pub(crate) fn record_marker(&mut self, service_id: ServiceId, marker: UpdateMarker) {
        self.markers.insert(service_id, marker);
        if self.last_update.is_none_or(|m| marker.is_newer_than(&m)) {
            self.last_update = Some(marker);
        }
    }

    /// Whether the service is currently running (mowing, watering, on).
    ///
    /// `None` for devices or services without an activity.
    pub fn is_active(&self, service_id: &ServiceId) -> Option<bool> {
        match &self.state {
            DeviceState::Mower(m) if &m.service_id == service_id => Some(m.activity.is_active()),
            DeviceState::Valve(v) if &v.service_id == service_id => Some(v.activity.is_active()),
            DeviceState::Irrigation(irr) => {
                irr.valves.get(service_id).map(|v| v.activity.is_active())
            }
            DeviceState::PowerSocket(s) if &s.service_id == service_id => {
                Some(s.activity.is_active())
            }
            _ => None,
        }
    }

    pub fn has_active_service(&self) -> bool {
        match &self.state {
            DeviceState::Mower(m) => m.activity.is_active(),
            DeviceState::Valve(v) => v.activity.is_active(),
            DeviceState::PowerSocket(s) => s.activity.is_active(),
            DeviceState::Irrigation(irr) => irr.valves.values().any(|v| v.activity.is_active()),
            DeviceState::Sensor(_) | DeviceState::Common => false,
        }
    }

    /// Human-readable activity of the primary service, for listings.
    pub fn activity_label(&self) -> String {
        match &self.state {
            DeviceState::Mower(m) => m.activity.to_string(),
            DeviceState::Valve(v) => v.activity.to_string(),
            DeviceState::PowerSocket(s) => s.activity.to_string(),
            DeviceState::Irrigation(irr) => {
                let open = irr.valves.values().filter(|v| v.activity.is_active()).count();
                format!("{open}/{} OPEN", irr.valves.len())
            }
            DeviceState::Sensor(s) => s
                .soil_humidity
                .map(|h| format!("{h}% humidity"))
                .or_else(|| s.ambient_temperature.map(|t| format!("{t}°C")))
                .unwrap_or_default(),
            DeviceState::Common => String::new(),
        }
    }
}

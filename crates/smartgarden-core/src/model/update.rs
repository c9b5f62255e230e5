// ── Partial updates ──
//
// A delta carries only the attributes a push message included. Patches
// merge field by field; absent fields leave the current value alone.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::device::{
    CommonInfo, Device, DeviceState, MowerActivity, MowerState, PowerSocketState,
    ServiceStatus, SocketActivity, TimedDuration, ValveActivity, ValveSetState, ValveState,
};
use super::ids::{DeviceId, ServiceId};

/// Freshness of an update: server attribute timestamp, then arrival order.
///
/// `observed_at` is `None` when the resource carried no timestamp. Such
/// markers are ordered by arrival alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UpdateMarker {
    pub observed_at: Option<DateTime<Utc>>,
    pub seq: u64,
}

impl UpdateMarker {
    pub fn new(observed_at: DateTime<Utc>, seq: u64) -> Self {
        Self {
            observed_at: Some(observed_at),
            seq,
        }
    }

    /// A marker for a resource without timestamps.
    pub fn arrival(seq: u64) -> Self {
        Self {
            observed_at: None,
            seq,
        }
    }

    /// Whether an update stamped `self` supersedes one stamped `other`.
    ///
    /// Timestamps are compared only when both sides carry one; otherwise
    /// arrival order decides.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        match (self.observed_at, other.observed_at) {
            (Some(a), Some(b)) => (a, self.seq) > (b, other.seq),
            _ => self.seq > other.seq,
        }
    }
}

/// A partial update for one service of one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceUpdate {
    pub device_id: DeviceId,
    pub service_id: ServiceId,
    pub patch: ServicePatch,
    pub marker: UpdateMarker,
}

// ── Patches ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommonPatch {
    pub name: Option<String>,
    pub serial: Option<String>,
    pub model_type: Option<String>,
    pub battery_level: Option<u8>,
    pub battery_state: Option<String>,
    pub rf_link_level: Option<u8>,
    pub rf_link_state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MowerPatch {
    pub activity: Option<MowerActivity>,
    pub state: Option<ServiceStatus>,
    pub last_error_code: Option<String>,
    pub operating_hours: Option<u64>,
    pub override_duration: Option<TimedDuration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValvePatch {
    pub name: Option<String>,
    pub activity: Option<ValveActivity>,
    pub state: Option<ServiceStatus>,
    pub last_error_code: Option<String>,
    pub duration: Option<TimedDuration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValveSetPatch {
    pub state: Option<ServiceStatus>,
    pub last_error_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PowerSocketPatch {
    pub activity: Option<SocketActivity>,
    pub state: Option<ServiceStatus>,
    pub last_error_code: Option<String>,
    pub duration: Option<TimedDuration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorPatch {
    pub soil_humidity: Option<f64>,
    pub soil_temperature: Option<f64>,
    pub ambient_temperature: Option<f64>,
    pub light_intensity: Option<f64>,
}

/// Changed attributes of one service, by service type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum ServicePatch {
    Common(CommonPatch),
    Mower(MowerPatch),
    Valve(ValvePatch),
    ValveSet(ValveSetPatch),
    PowerSocket(PowerSocketPatch),
    Sensor(SensorPatch),
}

fn merge<T>(slot: &mut T, value: Option<&T>)
where
    T: Clone,
{
    if let Some(v) = value {
        *slot = v.clone();
    }
}

fn merge_opt<T>(slot: &mut Option<T>, value: Option<&T>)
where
    T: Clone,
{
    if let Some(v) = value {
        *slot = Some(v.clone());
    }
}

impl ServicePatch {
    /// Activity class carried by this patch, if it reports an activity.
    pub fn activity_active(&self) -> Option<bool> {
        match self {
            Self::Mower(p) => p.activity.map(MowerActivity::is_active),
            Self::Valve(p) => p.activity.map(ValveActivity::is_active),
            Self::PowerSocket(p) => p.activity.map(SocketActivity::is_active),
            Self::Common(_) | Self::ValveSet(_) | Self::Sensor(_) => None,
        }
    }

    /// Merge into a device. Returns `false` if the patch does not fit the
    /// device's type or service.
    pub fn apply_to(&self, service_id: &ServiceId, device: &mut Device) -> bool {
        match (self, &mut device.state) {
            (Self::Common(p), _) => {
                p.merge_into(&mut device.common);
                true
            }
            (Self::Mower(p), DeviceState::Mower(m)) if &m.service_id == service_id => {
                p.merge_into(m);
                true
            }
            (Self::Valve(p), DeviceState::Valve(v)) if &v.service_id == service_id => {
                p.merge_into(v);
                true
            }
            (Self::Valve(p), DeviceState::Irrigation(irr)) => {
                let valve = irr
                    .valves
                    .entry(service_id.clone())
                    .or_insert_with(|| ValveState::new(service_id.clone()));
                p.merge_into(valve);
                true
            }
            (Self::ValveSet(p), DeviceState::Irrigation(irr)) => {
                p.merge_into(irr.valve_set.get_or_insert_with(ValveSetState::default));
                true
            }
            (Self::PowerSocket(p), DeviceState::PowerSocket(s)) if &s.service_id == service_id => {
                p.merge_into(s);
                true
            }
            (Self::Sensor(p), DeviceState::Sensor(s)) => {
                merge_opt(&mut s.soil_humidity, p.soil_humidity.as_ref());
                merge_opt(&mut s.soil_temperature, p.soil_temperature.as_ref());
                merge_opt(&mut s.ambient_temperature, p.ambient_temperature.as_ref());
                merge_opt(&mut s.light_intensity, p.light_intensity.as_ref());
                true
            }
            _ => false,
        }
    }
}

impl CommonPatch {
    fn merge_into(&self, info: &mut CommonInfo) {
        merge_opt(&mut info.name, self.name.as_ref());
        merge_opt(&mut info.serial, self.serial.as_ref());
        merge_opt(&mut info.model_type, self.model_type.as_ref());
        merge_opt(&mut info.battery_level, self.battery_level.as_ref());
        merge_opt(&mut info.battery_state, self.battery_state.as_ref());
        merge_opt(&mut info.rf_link_level, self.rf_link_level.as_ref());
        merge_opt(&mut info.rf_link_state, self.rf_link_state.as_ref());
    }
}

impl MowerPatch {
    fn merge_into(&self, m: &mut MowerState) {
        merge(&mut m.activity, self.activity.as_ref());
        merge(&mut m.state, self.state.as_ref());
        merge_opt(&mut m.last_error_code, self.last_error_code.as_ref());
        merge_opt(&mut m.operating_hours, self.operating_hours.as_ref());
        merge_opt(&mut m.override_duration, self.override_duration.as_ref());
    }
}

impl ValvePatch {
    fn merge_into(&self, v: &mut ValveState) {
        merge_opt(&mut v.name, self.name.as_ref());
        merge(&mut v.activity, self.activity.as_ref());
        merge(&mut v.state, self.state.as_ref());
        merge_opt(&mut v.last_error_code, self.last_error_code.as_ref());
        merge_opt(&mut v.duration, self.duration.as_ref());
        // A closed valve has no countdown left, even if the message omits it.
        if self.duration.is_none() && self.activity.is_some_and(|a| !a.is_active()) {
            v.duration = None;
        }
    }
}

impl ValveSetPatch {
    fn merge_into(&self, s: &mut ValveSetState) {
        merge(&mut s.state, self.state.as_ref());
        merge_opt(&mut s.last_error_code, self.last_error_code.as_ref());
    }
}

impl PowerSocketPatch {
    fn merge_into(&self, s: &mut PowerSocketState) {
        merge(&mut s.activity, self.activity.as_ref());
        merge(&mut s.state, self.state.as_ref());
        merge_opt(&mut s.last_error_code, self.last_error_code.as_ref());
        merge_opt(&mut s.duration, self.duration.as_ref());
        if self.duration.is_none() && self.activity.is_some_and(|a| !a.is_active()) {
            s.duration = None;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{DeviceKind, IrrigationState, LocationId};

    fn valve_device() -> Device {
        Device::new(
            DeviceId::from("valve-1"),
            LocationId::from("loc-1"),
            DeviceKind::Valve,
            DeviceState::Valve(ValveState::new(ServiceId::from("valve-1:1"))),
        )
    }

    #[test]
    fn patch_merges_only_present_fields() {
        let mut device = valve_device();
        let sid = ServiceId::from("valve-1:1");

        let open = ServicePatch::Valve(ValvePatch {
            activity: Some(ValveActivity::ManualWatering),
            state: Some(ServiceStatus::Ok),
            ..ValvePatch::default()
        });
        assert!(open.apply_to(&sid, &mut device));

        let rename = ServicePatch::Valve(ValvePatch {
            name: Some("Front lawn".into()),
            ..ValvePatch::default()
        });
        assert!(rename.apply_to(&sid, &mut device));

        let DeviceState::Valve(v) = &device.state else {
            panic!("not a valve");
        };
        assert_eq!(v.activity, ValveActivity::ManualWatering);
        assert_eq!(v.state, ServiceStatus::Ok);
        assert_eq!(v.name.as_deref(), Some("Front lawn"));
    }

    #[test]
    fn mismatched_patch_is_rejected() {
        let mut device = valve_device();
        let patch = ServicePatch::Mower(MowerPatch {
            activity: Some(MowerActivity::OkCutting),
            ..MowerPatch::default()
        });
        assert!(!patch.apply_to(&ServiceId::from("valve-1:1"), &mut device));

        let other_valve = ServicePatch::Valve(ValvePatch::default());
        assert!(!other_valve.apply_to(&ServiceId::from("valve-1:2"), &mut device));
    }

    #[test]
    fn irrigation_patch_targets_one_valve() {
        let mut device = Device::new(
            DeviceId::from("irr"),
            LocationId::from("loc-1"),
            DeviceKind::IrrigationValve,
            DeviceState::Irrigation(IrrigationState::default()),
        );
        let patch = ServicePatch::Valve(ValvePatch {
            activity: Some(ValveActivity::ScheduledWatering),
            ..ValvePatch::default()
        });
        assert!(patch.apply_to(&ServiceId::from("irr:3"), &mut device));
        assert_eq!(device.is_active(&ServiceId::from("irr:3")), Some(true));
        assert_eq!(device.is_active(&ServiceId::from("irr:4")), None);
    }

    #[test]
    fn markers_order_by_time_then_arrival() {
        let t = DateTime::parse_from_rfc3339("2026-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = UpdateMarker::new(t, 7);
        let b = UpdateMarker::new(t, 8);
        let c = UpdateMarker::new(t + chrono::Duration::seconds(1), 1);
        assert!(b.is_newer_than(&a));
        assert!(c.is_newer_than(&b));
        assert!(!a.is_newer_than(&a));
    }

    #[test]
    fn bare_markers_never_compare_against_server_time() {
        let ahead = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let stamped = UpdateMarker::new(ahead, 3);
        let bare = UpdateMarker::arrival(4);
        assert!(bare.is_newer_than(&stamped));
        assert!(!stamped.is_newer_than(&bare));
    }
}

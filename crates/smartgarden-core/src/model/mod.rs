// ── Domain model ──
//
// Canonical types produced by `convert` from wire resources and held by
// the device registry.

mod device;
mod ids;
mod location;
mod update;

pub use device::{
    CommonInfo, Device, DeviceKind, DeviceState, IrrigationState, MowerActivity, MowerState,
    PowerSocketState, SensorState, ServiceStatus, SocketActivity, TimedDuration, ValveActivity,
    ValveSetState, ValveState,
};
pub(crate) use device::parse_wire;
pub use ids::{DeviceId, LocationId, ServiceId};
pub use location::{Location, LocationState};
pub use update::{
    CommonPatch, DeviceUpdate, MowerPatch, PowerSocketPatch, SensorPatch, ServicePatch,
    UpdateMarker, ValvePatch, ValveSetPatch,
};

use std::collections::BTreeSet;

use serde::Serialize;

use super::device::Device;
use super::ids::{DeviceId, LocationId};

/// A garden / site and the devices registered to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub device_ids: BTreeSet<DeviceId>,
}

/// Full state of one location, as delivered on (re)connect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationState {
    pub id: LocationId,
    pub name: String,
    pub devices: Vec<Device>,
}

impl LocationState {
    pub fn location(&self) -> Location {
        Location {
            id: self.id.clone(),
            name: self.name.clone(),
            device_ids: self.devices.iter().map(|d| d.id.clone()).collect(),
        }
    }
}

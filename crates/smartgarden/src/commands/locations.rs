//! Location listing.

use serde::Serialize;
use tabled::Tabled;

use smartgarden_core::{CoreError, GardenClient, Location};

use crate::error::CliError;
use crate::output::Printer;

#[derive(Debug, Serialize)]
struct LocationView {
    #[serde(flatten)]
    location: Location,
    /// The location this session serves.
    selected: bool,
}

#[derive(Tabled)]
struct LocationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Devices")]
    devices: String,
    #[tabled(rename = "Selected")]
    selected: String,
}

impl From<&LocationView> for LocationRow {
    fn from(v: &LocationView) -> Self {
        Self {
            id: v.location.id.to_string(),
            name: v.location.name.clone(),
            devices: if v.selected {
                v.location.device_ids.len().to_string()
            } else {
                "-".into()
            },
            selected: if v.selected { "*".into() } else { String::new() },
        }
    }
}

pub fn handle(client: &GardenClient, printer: &Printer) -> Result<(), CliError> {
    let session = client.session().ok_or(CoreError::NotConnected)?;
    let selected = session.location().id.clone();
    // The registry has device membership for the served location only.
    let loaded = client.locations();

    let views: Vec<LocationView> = session
        .locations()
        .iter()
        .map(|loc| {
            let location = loaded
                .iter()
                .find(|l| l.id == loc.id)
                .cloned()
                .unwrap_or_else(|| loc.clone());
            LocationView {
                selected: location.id == selected,
                location,
            }
        })
        .collect();

    printer.list(&views, |v| LocationRow::from(v), |v| v.location.id.to_string())
}

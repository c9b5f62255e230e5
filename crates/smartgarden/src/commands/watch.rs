//! `smartgarden watch`: stream device changes from the push channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use smartgarden_core::{ChannelExit, ChannelState, Device, DeviceId, DeviceSnapshot, GardenClient};

use crate::cli::WatchArgs;
use crate::error::CliError;
use crate::output::Printer;

#[derive(Debug, Serialize)]
struct ChangeEvent<'a> {
    at: DateTime<Utc>,
    device: &'a Device,
}

fn line(printer: &Printer, event: &ChangeEvent<'_>) -> String {
    let d = event.device;
    format!(
        "{}  {:<24} {:<16} {}",
        event.at.format("%H:%M:%S"),
        d.name(),
        d.kind,
        printer.activity(&d.activity_label(), d.has_active_service()),
    )
}

/// Devices whose entry is a different allocation than in `previous`.
fn changed<'a>(
    previous: &HashMap<DeviceId, Arc<Device>>,
    snapshot: &'a DeviceSnapshot,
) -> Vec<&'a Arc<Device>> {
    snapshot
        .iter()
        .filter(|d| previous.get(&d.id).is_none_or(|old| !Arc::ptr_eq(old, d)))
        .collect()
}

fn index(snapshot: &DeviceSnapshot) -> HashMap<DeviceId, Arc<Device>> {
    snapshot.iter().map(|d| (d.id.clone(), Arc::clone(d))).collect()
}

pub async fn handle(
    client: &GardenClient,
    args: WatchArgs,
    printer: &Printer,
) -> Result<(), CliError> {
    let filter = args.device.map(DeviceId::new);
    if let Some(id) = filter.as_ref().filter(|id| client.device(id).is_none()) {
        return Err(CliError::device_not_found(id.as_str()));
    }

    let mut stream = client.registry().stream();
    let mut previous = index(stream.current());
    let mut state = client.channel_state();

    client.start_realtime();
    printer.note("Watching for changes, press Ctrl-C to stop");

    let deadline = async {
        if let Some(secs) = args.duration {
            tokio::time::sleep(Duration::from_secs(secs)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(deadline);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let finished = client.realtime_finished();
    tokio::pin!(finished);

    loop {
        tokio::select! {
            _ = &mut interrupt => break,
            () = &mut deadline => break,
            () = &mut finished => {
                return match client.stop_realtime().await {
                    Some(ChannelExit::Failed(e)) => Err(e.into()),
                    Some(ChannelExit::SessionEnded) => {
                        printer.note("Session ended by another client");
                        Ok(())
                    }
                    _ => Ok(()),
                };
            }
            Ok(()) = state.changed() => {
                let now = *state.borrow_and_update();
                if now == ChannelState::Connected {
                    printer.note("Realtime channel connected");
                } else {
                    tracing::debug!(state = %now, "Realtime channel state changed");
                }
            }
            snapshot = stream.changed() => {
                let Some(snapshot) = snapshot else { break };
                let at = Utc::now();
                for device in changed(&previous, &snapshot) {
                    if filter.as_ref().is_some_and(|id| *id != device.id) {
                        continue;
                    }
                    let event = ChangeEvent { at, device };
                    printer.event(&event, |e| line(printer, e))?;
                }
                previous = index(&snapshot);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use smartgarden_core::{DeviceKind, DeviceState, LocationId};

    use super::*;

    fn device(id: &str) -> Arc<Device> {
        Arc::new(Device::new(
            DeviceId::new(id),
            LocationId::new("loc-1"),
            DeviceKind::Common,
            DeviceState::Common,
        ))
    }

    #[test]
    fn changed_reports_new_and_replaced_entries() {
        let a = device("a");
        let b = device("b");
        let before: DeviceSnapshot = Arc::new(vec![Arc::clone(&a), Arc::clone(&b)]);
        let previous = index(&before);

        let b2 = device("b");
        let c = device("c");
        let after: DeviceSnapshot = Arc::new(vec![Arc::clone(&a), b2, c]);

        let ids: Vec<&str> = changed(&previous, &after)
            .into_iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}

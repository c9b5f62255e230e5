//! `smartgarden status`: bring up the realtime channel and report
//! session, channel, registry and command diagnostics.

use std::time::Duration;

use chrono::DateTime;

use smartgarden_core::{ChannelExit, ChannelState, Diagnostics, GardenClient};

use crate::cli::StatusArgs;
use crate::error::CliError;
use crate::output::{self, Printer};

fn detail(printer: &Printer, diag: &Diagnostics, client_devices: usize) -> String {
    let ch = &diag.channel;
    let reg = &diag.registry;
    let cmd = &diag.commands;

    let session = output::detail_lines(&[
        ("Session", output::or_dash(diag.session_id)),
        ("Location", output::or_dash(diag.location_id.as_ref())),
        ("Token exchanges", diag.token_exchanges.to_string()),
        ("Login conflicts", diag.simultaneous_logins.to_string()),
    ]);
    let channel = output::detail_lines(&[
        (
            "State",
            printer.activity(&ch.state.to_string(), ch.state == ChannelState::Connected),
        ),
        (
            "Connected since",
            ch.connected_since
                .as_ref()
                .map_or_else(String::new, DateTime::to_rfc3339),
        ),
        ("Connects", ch.connects.to_string()),
        ("Reconnects", ch.reconnects.to_string()),
        ("Messages", ch.messages.to_string()),
        ("Malformed", ch.malformed.to_string()),
        ("Last error", ch.last_error.clone().unwrap_or_default()),
    ]);
    let registry = output::detail_lines(&[
        ("Devices", client_devices.to_string()),
        ("Snapshots", reg.snapshots.to_string()),
        ("Updates applied", reg.applied.to_string()),
        ("Buffered", reg.buffered.to_string()),
        ("Stale dropped", reg.stale.to_string()),
        ("Unknown device", reg.unknown.to_string()),
    ]);
    let commands = output::detail_lines(&[
        ("Accepted", cmd.accepted.to_string()),
        ("Failed", cmd.failed.to_string()),
        ("Retries", cmd.retries.to_string()),
    ]);

    [
        (printer.heading("Session"), session),
        (printer.heading("Realtime channel"), channel),
        (printer.heading("Registry"), registry),
        (printer.heading("Commands"), commands),
    ]
    .into_iter()
    .map(|(title, body)| format!("{title}\n{body}"))
    .collect::<Vec<_>>()
    .join("\n\n")
}

pub async fn handle(
    client: &GardenClient,
    args: &StatusArgs,
    printer: &Printer,
) -> Result<(), CliError> {
    let mut state = client.channel_state();
    client.start_realtime();

    let wait = async {
        tokio::select! {
            res = state.wait_for(|s| *s == ChannelState::Connected) => res.is_ok(),
            () = client.realtime_finished() => false,
        }
    };
    let connected = tokio::time::timeout(Duration::from_secs(args.wait), wait).await;

    let diag = client.diagnostics();
    let devices = client.registry().len();
    printer.single(
        &diag,
        |d| detail(printer, d, devices),
        |d| d.channel.state.to_string(),
    )?;

    match connected {
        Ok(true) => Ok(()),
        Ok(false) => match client.stop_realtime().await {
            Some(ChannelExit::Failed(e)) => Err(e.into()),
            _ => Err(CliError::Channel {
                message: diag
                    .channel
                    .last_error
                    .unwrap_or_else(|| "channel closed before connecting".into()),
            }),
        },
        Err(_) => Err(CliError::Timeout { seconds: args.wait }),
    }
}

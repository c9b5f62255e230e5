//! `smartgarden command`: send a control command to a device.

use smartgarden_core::{CommandParameters, CommandReceipt, DeviceId, GardenClient, ServiceId};

use crate::cli::CommandArgs;
use crate::error::CliError;
use crate::output::{self, Printer};

fn detail(receipt: &CommandReceipt) -> String {
    output::detail_lines(&[
        ("Command", receipt.command.to_string()),
        ("Device", receipt.device_id.to_string()),
        ("Service", receipt.service_id.to_string()),
        (
            "Duration",
            receipt
                .seconds
                .map_or_else(String::new, |s| format!("{}m {:02}s", s / 60, s % 60)),
        ),
        ("Request", receipt.request_id.clone()),
        ("Attempts", receipt.attempts.to_string()),
    ])
}

pub async fn handle(
    client: &GardenClient,
    args: CommandArgs,
    printer: &Printer,
) -> Result<(), CliError> {
    let duration = args.duration_secs();
    let device_id = DeviceId::new(args.device);
    if client.device(&device_id).is_none() {
        return Err(CliError::device_not_found(device_id.as_str()));
    }

    let mut params = CommandParameters::default();
    if let Some(secs) = duration {
        params = params.with_duration(secs);
    }
    if let Some(valve) = args.valve {
        params = params.with_valve(ServiceId::new(valve));
    }

    let receipt = client.issue(&device_id, args.command, params).await?;
    printer.note(&format!("{} accepted by {}", receipt.command, receipt.device_id));
    printer.single(&receipt, detail, |r| r.request_id.clone())
}

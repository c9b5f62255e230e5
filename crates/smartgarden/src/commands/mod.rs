//! Command dispatch: bridges CLI args -> `GardenClient` -> output formatting.

pub mod command;
pub mod config_cmd;
pub mod devices;
pub mod locations;
pub mod status;
pub mod watch;

use smartgarden_core::GardenClient;

use crate::cli::Command;
use crate::error::CliError;
use crate::output::Printer;

/// Connect, then hand the command to its handler.
pub async fn dispatch(
    cmd: Command,
    client: &GardenClient,
    printer: &Printer,
) -> Result<(), CliError> {
    let session = client.connect().await?;
    tracing::debug!(session = %session.id(), "session established");

    match cmd {
        Command::Locations => locations::handle(client, printer),
        Command::Devices(args) => devices::handle(client, args, printer),
        Command::Command(args) => command::handle(client, args, printer).await,
        Command::Watch(args) => watch::handle(client, args, printer).await,
        Command::Status(args) => status::handle(client, &args, printer).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}

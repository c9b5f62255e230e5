//! Clap derive structures for the `smartgarden` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use smartgarden_core::{CommandKind, DeviceKind};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// smartgarden -- control GARDENA smart system devices
#[derive(Debug, Parser)]
#[command(
    name = "smartgarden",
    version,
    about = "Control GARDENA smart system devices from the command line",
    long_about = "Talks to the GARDENA smart system cloud API.\n\n\
        Reads device state over REST and the realtime push channel,\n\
        and sends mower, valve and power socket commands.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file to use instead of the platform default
    #[arg(long, env = "SMARTGARDEN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Location ID (overrides the config file)
    #[arg(long, short = 'l', global = true)]
    pub location: Option<String>,

    /// Output format (defaults to the config's `defaults.output`)
    #[arg(long, short = 'o', global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, global = true)]
    pub color: Option<ColorMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides the config file)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List locations on the account
    #[command(alias = "loc")]
    Locations,

    /// Inspect devices
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Send a command to a device
    #[command(alias = "cmd")]
    Command(CommandArgs),

    /// Stream live device changes until interrupted
    Watch(WatchArgs),

    /// Connect the realtime channel and report diagnostics
    Status(StatusArgs),

    /// Manage the configuration file and stored secret
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List devices in the location
    #[command(alias = "ls")]
    List {
        /// Only devices of this type (e.g. mower, valve, power_socket)
        #[arg(long, short = 't', value_parser = parse_kind)]
        kind: Option<DeviceKind>,

        /// Only devices with a running service
        #[arg(long, short = 'a')]
        active: bool,
    },

    /// Show one device in detail
    Get {
        /// Device ID
        device: String,
    },
}

// ── Command ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CommandArgs {
    /// Device ID
    pub device: String,

    /// Command name or alias (open, close, start, park, on, off, pause, ...)
    #[arg(value_parser = parse_command)]
    pub command: CommandKind,

    /// Run for this many minutes instead of the configured default
    #[arg(long, short = 'm', conflicts_with = "seconds")]
    pub minutes: Option<u64>,

    /// Run for this many seconds instead of the configured default
    #[arg(long, short = 's')]
    pub seconds: Option<u64>,

    /// Valve service ID (irrigation controls with several valves)
    #[arg(long)]
    pub valve: Option<String>,
}

impl CommandArgs {
    pub fn duration_secs(&self) -> Option<u64> {
        self.seconds
            .or_else(|| self.minutes.map(|m| m.saturating_mul(60)))
    }
}

// ── Watch / Status ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only report changes to this device
    #[arg(long, short = 'd')]
    pub device: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Seconds to wait for the realtime channel to connect
    #[arg(long, default_value = "30")]
    pub wait: u64,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Interactive setup: application key, secret and location
    Init {
        /// Store the secret in the config file instead of the keyring
        #[arg(long)]
        plaintext: bool,
    },

    /// Show the effective configuration (secret masked)
    Show,

    /// Print the config file path
    Path,

    /// Set a configuration value
    Set {
        /// Key, e.g. applicationKey, locationId, guardWindowSecs
        key: String,
        /// Value
        value: String,
    },

    /// Prompt for the application secret and store it in the keyring
    SetSecret,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

// ── Value parsers ────────────────────────────────────────────────────

fn parse_kind(raw: &str) -> Result<DeviceKind, String> {
    raw.replace('-', "_")
        .parse()
        .map_err(|_| format!("unknown device type '{raw}'"))
}

fn parse_command(raw: &str) -> Result<CommandKind, String> {
    raw.replace('-', "_").parse().map_err(|_| {
        format!(
            "unknown command '{raw}' (try open, close, start, stop, park, pause, unpause, on, off)"
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn command_aliases_parse() {
        let cli = Cli::try_parse_from(["smartgarden", "command", "valve-1", "open", "-m", "5"])
            .unwrap();
        let Command::Command(args) = cli.command else {
            panic!("expected command subcommand");
        };
        assert_eq!(args.command, CommandKind::StartSecondsToOverride);
        assert_eq!(args.duration_secs(), Some(300));
    }

    #[test]
    fn device_kind_accepts_dashes() {
        assert_eq!(parse_kind("power-socket").unwrap(), DeviceKind::PowerSocket);
        assert!(parse_kind("toaster").is_err());
    }

    #[test]
    fn minutes_and_seconds_conflict() {
        let err = Cli::try_parse_from([
            "smartgarden", "command", "valve-1", "open", "-m", "5", "-s", "10",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}

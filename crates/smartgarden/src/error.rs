//! CLI error types with miette diagnostics.
//!
//! Maps core and config failures into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use smartgarden_config::ConfigError;
use smartgarden_core::{AuthError, ChannelError, CommandError, CoreError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the smart system API: {message}")]
    #[diagnostic(
        code(smartgarden::connection_failed),
        help("Check your network connection, or raise the timeout with --timeout.")
    )]
    ConnectionFailed { message: String },

    #[error("Realtime channel failed: {message}")]
    #[diagnostic(code(smartgarden::channel))]
    Channel { message: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(smartgarden::auth_failed),
        help(
            "Verify the application key and secret.\n\
             Store a new secret with: smartgarden config set-secret"
        )
    )]
    AuthFailed { message: String },

    #[error("Access denied: {message}")]
    #[diagnostic(
        code(smartgarden::access_denied),
        help("Connect the application to the GARDENA smart system API in the developer portal.")
    )]
    AccessDenied { message: String },

    #[error("Another client is logged in with the same application key")]
    #[diagnostic(
        code(smartgarden::simultaneous_login),
        help(
            "Only one session per application key is allowed.\n\
             Stop the other client (a second smartgarden or an integration) and retry."
        )
    )]
    SimultaneousLogin,

    #[error("No application key configured")]
    #[diagnostic(
        code(smartgarden::no_credentials),
        help(
            "Configure credentials with: smartgarden config init\n\
             Or set SMARTGARDEN_APPLICATION_KEY and SMARTGARDEN_APPLICATION_SECRET.\n\
             Config file: {path}"
        )
    )]
    NoCredentials { path: String },

    #[error("No application secret found")]
    #[diagnostic(
        code(smartgarden::no_secret),
        help("Store one with: smartgarden config set-secret")
    )]
    NoSecret,

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(smartgarden::not_found),
        help("Run: smartgarden {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("No locations found")]
    #[diagnostic(
        code(smartgarden::no_locations),
        help("Check that your account has a location with registered devices.")
    )]
    NoLocations,

    // ── Commands ─────────────────────────────────────────────────────

    #[error("Command rejected (HTTP {status}): {message}")]
    #[diagnostic(code(smartgarden::rejected))]
    Rejected { status: u16, message: String },

    #[error("Rate limited by the smart system API")]
    #[diagnostic(
        code(smartgarden::rate_limited),
        help("The daily request quota may be exhausted. Try again later.")
    )]
    RateLimited,

    // ── API ──────────────────────────────────────────────────────────

    #[error("API error: {message}")]
    #[diagnostic(code(smartgarden::api_error))]
    Api { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(smartgarden::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(smartgarden::config))]
    Config(ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(smartgarden::timeout),
        help("Increase the wait or check the realtime channel with -vv.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Channel { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. }
            | Self::NoCredentials { .. }
            | Self::NoSecret
            | Self::Config(ConfigError::NoApplicationKey | ConfigError::NoSecret { .. }) => {
                exit_code::AUTH
            }
            Self::AccessDenied { .. } => exit_code::PERMISSION,
            Self::SimultaneousLogin => exit_code::CONFLICT,
            Self::NotFound { .. } | Self::NoLocations => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Config(ConfigError::Validation { .. }) => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }

    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: "device".into(),
            identifier: identifier.into(),
            list_command: "devices list".into(),
        }
    }
}

// ── Upstream → CliError mapping ──────────────────────────────────────

impl From<AuthError> for CliError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials { message } => Self::AuthFailed { message },
            AuthError::AccessDenied { message } => Self::AccessDenied { message },
            AuthError::SimultaneousLogin { .. } => Self::SimultaneousLogin,
            AuthError::Transient { message, .. } => Self::ConnectionFailed { message },
        }
    }
}

impl From<CommandError> for CliError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Validation { message } => Self::Validation {
                field: "command".into(),
                reason: message,
            },
            CommandError::Rejected { status, message } => Self::Rejected { status, message },
            CommandError::Unavailable { message } => Self::ConnectionFailed { message },
            CommandError::RateLimited { .. } => Self::RateLimited,
            CommandError::DeviceNotFound { device_id } => {
                Self::device_not_found(device_id.as_str())
            }
            CommandError::Auth(auth) => auth.into(),
        }
    }
}

impl From<ChannelError> for CliError {
    fn from(err: ChannelError) -> Self {
        Self::Channel {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Auth(auth) => auth.into(),
            CoreError::Channel(channel) => channel.into(),
            CoreError::Command(command) => command.into(),
            CoreError::State(state) => Self::Api {
                message: state.to_string(),
            },
            CoreError::NoLocations => Self::NoLocations,
            CoreError::LocationNotFound { location_id } => Self::NotFound {
                resource_type: "location".into(),
                identifier: location_id.to_string(),
                list_command: "locations".into(),
            },
            CoreError::NotConnected | CoreError::Cancelled => Self::ConnectionFailed {
                message: err.to_string(),
            },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Api { message, status } => match status {
                Some(401) => Self::AuthFailed { message },
                Some(403) => Self::AccessDenied { message },
                Some(_) => Self::Api { message },
                None => Self::ConnectionFailed { message },
            },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoSecret { .. } => Self::NoSecret,
            other => Self::Config(other),
        }
    }
}

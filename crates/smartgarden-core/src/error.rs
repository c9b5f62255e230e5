// ── Core error types ──
//
// Consumers of the core never see HTTP status codes or JSON parse failures
// directly. Transport errors from `smartgarden-api` are classified into the
// auth, channel and command taxonomies at the call site that knows which
// one applies.

use std::time::Duration;

use thiserror::Error;

use crate::model::{DeviceId, LocationId, ServiceId};

/// Delay before retrying after the upstream reported a simultaneous login.
pub const SIMULTANEOUS_LOGIN_BACKOFF: Duration = Duration::from_secs(15);

// ── Auth ─────────────────────────────────────────────────────────────

/// Failures while obtaining or using credentials.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid application credentials: {message}")]
    InvalidCredentials { message: String },

    #[error("Access denied: {message}")]
    AccessDenied { message: String },

    /// Another session holds the same credentials. Retryable after a delay.
    #[error("Simultaneous login detected: {message}")]
    SimultaneousLogin {
        message: String,
        retry_after: Duration,
    },

    #[error("Transient authentication failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
}

impl AuthError {
    /// Only transient failures are retried by the token manager.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Upstream retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::SimultaneousLogin { retry_after, .. } => Some(*retry_after),
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<smartgarden_api::Error> for AuthError {
    fn from(err: smartgarden_api::Error) -> Self {
        use smartgarden_api::Error as Api;

        match err {
            Api::Authentication { message, .. } => Self::InvalidCredentials { message },
            Api::AccessDenied { message } => Self::AccessDenied { message },
            Api::SimultaneousLogin { message } => Self::SimultaneousLogin {
                message,
                retry_after: SIMULTANEOUS_LOGIN_BACKOFF,
            },
            other => Self::Transient {
                retry_after: other.retry_after(),
                message: other.to_string(),
            },
        }
    }
}

// ── Channel ──────────────────────────────────────────────────────────

/// Push channel failures. All of them lead to a reconnect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Push channel handshake failed: {reason}")]
    HandshakeFailed {
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("Push channel keepalive timed out ({missed} pings unanswered)")]
    KeepaliveTimeout { missed: u32 },

    #[error("Push channel dropped: {reason}")]
    Dropped { reason: String },

    #[error("Malformed push message: {reason}")]
    MalformedMessage { reason: String },
}

impl ChannelError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HandshakeFailed { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

// ── Command ──────────────────────────────────────────────────────────

/// Failures of [`CommandGate::issue`](crate::gate::CommandGate::issue).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid command: {message}")]
    Validation { message: String },

    #[error("Command rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Command service unavailable: {message}")]
    Unavailable { message: String },

    #[error("Command rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: DeviceId },

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl CommandError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether the gate retries this failure with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::RateLimited { .. })
    }
}

impl From<smartgarden_api::Error> for CommandError {
    fn from(err: smartgarden_api::Error) -> Self {
        use smartgarden_api::Error as Api;

        match err {
            Api::RateLimited { retry_after_secs } => Self::RateLimited {
                retry_after: retry_after_secs.map(Duration::from_secs),
            },
            Api::Api { status, message } if (400..500).contains(&status) => {
                Self::Rejected { status, message }
            }
            Api::AccessDenied { message } => Self::Auth(AuthError::AccessDenied { message }),
            Api::Authentication { message, .. } => {
                Self::Auth(AuthError::InvalidCredentials { message })
            }
            Api::SimultaneousLogin { message } => Self::Auth(AuthError::SimultaneousLogin {
                message,
                retry_after: SIMULTANEOUS_LOGIN_BACKOFF,
            }),
            other => Self::Unavailable {
                message: other.to_string(),
            },
        }
    }
}

// ── State ────────────────────────────────────────────────────────────

/// Non-fatal registry outcomes. Stale updates are counted and dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Stale update for {device_id} discarded")]
    StaleUpdate { device_id: DeviceId },

    #[error("Update for unknown device {device_id}")]
    UnknownDevice { device_id: DeviceId },

    #[error("Service {service_id} does not fit device {device_id}")]
    UnsupportedService {
        device_id: DeviceId,
        service_id: ServiceId,
    },
}

// ── Umbrella ─────────────────────────────────────────────────────────

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("No locations found -- check if your account has registered devices")]
    NoLocations,

    #[error("Location not found: {location_id}")]
    LocationNotFound { location_id: LocationId },

    #[error("Not connected -- call connect() first")]
    NotConnected,

    #[error("Cancelled by shutdown")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("API error: {message}")]
    Api {
        message: String,
        status: Option<u16>,
    },
}

impl From<smartgarden_api::Error> for CoreError {
    fn from(err: smartgarden_api::Error) -> Self {
        use smartgarden_api::Error as Api;

        match err {
            Api::NoLocations => Self::NoLocations,
            Api::Authentication { .. } | Api::AccessDenied { .. } | Api::SimultaneousLogin { .. } => {
                Self::Auth(AuthError::from(err))
            }
            Api::InvalidUrl(e) => Self::Config {
                message: e.to_string(),
            },
            other => Self::Api {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }
}

// ── Client configuration ──
//
// Plain data handed to `GardenClient`. The core never reads files or the
// environment; `smartgarden-config` builds this from TOML, env and keyring.

use std::time::Duration;

use secrecy::SecretString;
use smartgarden_api::TransportConfig;

use crate::channel::ChannelConfig;
use crate::model::LocationId;
use crate::retry::RetryPolicy;

/// Default guard window after an accepted command.
pub const DEFAULT_GUARD_WINDOW: Duration = Duration::from_secs(10);

/// Default command durations per device type, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationDefaults {
    pub mower_minutes: u64,
    pub watering_minutes: u64,
    pub irrigation_minutes: u64,
}

impl Default for DurationDefaults {
    fn default() -> Self {
        Self {
            mower_minutes: 60,
            watering_minutes: 30,
            irrigation_minutes: 30,
        }
    }
}

/// Upstream hosts. Parsed when the client is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub auth: String,
    pub smart: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth: smartgarden_api::DEFAULT_AUTH_HOST.to_owned(),
            smart: smartgarden_api::DEFAULT_SMART_HOST.to_owned(),
        }
    }
}

/// Command gate tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
    pub durations: DurationDefaults,
    pub guard_window: Duration,
    pub retry: RetryPolicy,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            durations: DurationDefaults::default(),
            guard_window: DEFAULT_GUARD_WINDOW,
            retry: RetryPolicy::command(),
        }
    }
}

/// Everything a [`GardenClient`](crate::GardenClient) needs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub application_key: String,
    pub application_secret: SecretString,
    /// Location to serve; the first one found when unset.
    pub location_id: Option<LocationId>,
    pub endpoints: Endpoints,
    pub transport: TransportConfig,
    pub gate: GateSettings,
    pub token_retry: RetryPolicy,
    pub channel: ChannelConfig,
}

impl ClientConfig {
    pub fn new(application_key: impl Into<String>, application_secret: SecretString) -> Self {
        Self {
            application_key: application_key.into(),
            application_secret,
            location_id: None,
            endpoints: Endpoints::default(),
            transport: TransportConfig::default(),
            gate: GateSettings::default(),
            token_retry: RetryPolicy::token(),
            channel: ChannelConfig::default(),
        }
    }

    pub fn with_location(mut self, location_id: impl Into<LocationId>) -> Self {
        self.location_id = Some(location_id.into());
        self
    }

    pub fn with_durations(mut self, durations: DurationDefaults) -> Self {
        self.gate.durations = durations;
        self
    }

    pub fn with_guard_window(mut self, window: Duration) -> Self {
        self.gate.guard_window = window;
        self
    }
}

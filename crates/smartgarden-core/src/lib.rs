//! Session, realtime sync and command engine for the GARDENA smart system.
//!
//! This crate sits between `smartgarden-api` and its consumers (the CLI or
//! any other presentation layer):
//!
//! - **[`GardenClient`]**: Facade owning the whole lifecycle.
//!   [`connect()`](GardenClient::connect) negotiates a session and loads the
//!   location snapshot; [`start_realtime()`](GardenClient::start_realtime)
//!   keeps it current over the push channel.
//!
//! - **[`TokenManager`]**: Single-flight OAuth2 token cache with proactive
//!   refresh.
//!
//! - **[`SessionCoordinator`]**: At most one live session per application
//!   key, with simultaneous-login teardown and retry.
//!
//! - **[`RealtimeChannel`]**: Push connection state machine: keepalive,
//!   proactive replacement before the lifetime limit, reconnect with backoff.
//!
//! - **[`DeviceRegistry`]**: Authoritative device state with per-service
//!   freshness markers, per-device subscriptions and a reactive
//!   [`DeviceStream`].
//!
//! - **[`CommandGate`]**: Validates and sends commands, applies their
//!   optimistic effect and guards it against in-flight push updates.

pub mod backend;
pub mod channel;
pub mod client;
pub mod clock;
pub mod config;
pub mod convert;
pub mod error;
pub mod gate;
pub mod model;
pub mod registry;
pub mod retry;
pub mod session;
pub mod stream;
pub mod token;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod fakes;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backend::{Backends, PushConnection, PushConnector, SmartSystemApi, TokenEndpoint};
pub use channel::{ChannelConfig, ChannelDiagnostics, ChannelExit, ChannelState, RealtimeChannel};
pub use client::{Diagnostics, GardenClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, DurationDefaults, Endpoints, GateSettings};
pub use error::{AuthError, ChannelError, CommandError, CoreError, StateError};
pub use gate::{CommandGate, CommandKind, CommandParameters, CommandReceipt, GateStats};
pub use registry::{DeltaOutcome, DeviceQuery, DeviceRegistry, RegistryStats, SubscriptionHandle};
pub use retry::{Backoff, RetryPolicy};
pub use session::{EndReason, Session, SessionCoordinator, SessionLedger};
pub use stream::{DeviceFilter, DeviceSnapshot, DeviceStream};
pub use token::{Token, TokenManager};

pub use model::{Device, DeviceId, DeviceKind, DeviceState, Location, LocationId, ServiceId};

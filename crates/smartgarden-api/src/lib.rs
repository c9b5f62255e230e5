// smartgarden-api: Async Rust client for the GARDENA smart system cloud API

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod transport;
pub mod websocket;

pub use auth::{AccessGrant, ApplicationCredentials, AuthClient};
pub use client::SmartSystemClient;
pub use error::Error;
pub use models::{CommandRequest, LocationDocument, Resource};
pub use transport::TransportConfig;
pub use websocket::{PushFrame, PushSocket};

/// Default host for the OAuth2 token and revoke endpoints.
pub const DEFAULT_AUTH_HOST: &str = "https://api.authentication.husqvarnagroup.dev";

/// Default host for the smart system REST and websocket negotiation endpoints.
pub const DEFAULT_SMART_HOST: &str = "https://api.smart.gardena.dev";

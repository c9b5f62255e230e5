// ── Collaborator seams ──
//
// The engine talks to the cloud through these traits. Production wires in
// the `smartgarden-api` clients; tests substitute in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use smartgarden_api::{
    AccessGrant, AuthClient, CommandRequest, Error, LocationDocument, PushFrame, PushSocket,
    Resource, SmartSystemClient,
};
use url::Url;

/// OAuth2 token endpoint.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange(&self) -> Result<AccessGrant, Error>;
    async fn revoke(&self, token: &SecretString) -> Result<(), Error>;
}

/// Smart system REST surface.
#[async_trait]
pub trait SmartSystemApi: Send + Sync {
    async fn list_locations(&self, token: &SecretString) -> Result<Vec<Resource>, Error>;
    async fn location_snapshot(
        &self,
        token: &SecretString,
        location_id: &str,
    ) -> Result<LocationDocument, Error>;
    async fn websocket_url(&self, token: &SecretString, location_id: &str) -> Result<Url, Error>;
    async fn send_command(
        &self,
        token: &SecretString,
        service_id: &str,
        command: &CommandRequest,
    ) -> Result<(), Error>;
}

/// Opens push connections.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn PushConnection>, Error>;
}

/// One live push connection, driven frame by frame.
#[async_trait]
pub trait PushConnection: Send {
    /// Must be cancel-safe.
    async fn next_frame(&mut self) -> Result<PushFrame, Error>;
    async fn ping(&mut self) -> Result<(), Error>;
    async fn close(&mut self) -> Result<(), Error>;
}

/// The full set of collaborators a [`GardenClient`](crate::GardenClient) needs.
#[derive(Clone)]
pub struct Backends {
    pub tokens: Arc<dyn TokenEndpoint>,
    pub api: Arc<dyn SmartSystemApi>,
    pub push: Arc<dyn PushConnector>,
}

// ── Production implementations ───────────────────────────────────────

#[async_trait]
impl TokenEndpoint for AuthClient {
    async fn exchange(&self) -> Result<AccessGrant, Error> {
        AuthClient::exchange(self).await
    }

    async fn revoke(&self, token: &SecretString) -> Result<(), Error> {
        AuthClient::revoke(self, token).await
    }
}

#[async_trait]
impl SmartSystemApi for SmartSystemClient {
    async fn list_locations(&self, token: &SecretString) -> Result<Vec<Resource>, Error> {
        SmartSystemClient::list_locations(self, token).await
    }

    async fn location_snapshot(
        &self,
        token: &SecretString,
        location_id: &str,
    ) -> Result<LocationDocument, Error> {
        self.get_location(token, location_id).await
    }

    async fn websocket_url(&self, token: &SecretString, location_id: &str) -> Result<Url, Error> {
        SmartSystemClient::websocket_url(self, token, location_id).await
    }

    async fn send_command(
        &self,
        token: &SecretString,
        service_id: &str,
        command: &CommandRequest,
    ) -> Result<(), Error> {
        SmartSystemClient::send_command(self, token, service_id, command).await
    }
}

/// Connects real websockets through tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl PushConnector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn PushConnection>, Error> {
        Ok(Box::new(PushSocket::connect(url).await?))
    }
}

#[async_trait]
impl PushConnection for PushSocket {
    async fn next_frame(&mut self) -> Result<PushFrame, Error> {
        PushSocket::next_frame(self).await
    }

    async fn ping(&mut self) -> Result<(), Error> {
        PushSocket::ping(self).await
    }

    async fn close(&mut self) -> Result<(), Error> {
        PushSocket::close(self).await
    }
}

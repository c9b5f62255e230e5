// ── GardenClient facade ──
//
// Wires the token manager, session coordinator, registry, command gate
// and push channel together behind one cheaply cloneable handle.

use std::sync::Arc;

use serde::Serialize;
use smartgarden_api::{ApplicationCredentials, AuthClient, SmartSystemClient};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::backend::{Backends, TungsteniteConnector};
use crate::channel::{ChannelDiagnostics, ChannelExit, ChannelState, RealtimeChannel};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::convert::{self, MarkerSource};
use crate::error::{CommandError, CoreError};
use crate::gate::{CommandGate, CommandKind, CommandParameters, CommandReceipt, GateStats};
use crate::model::{Device, DeviceId, Location, LocationId};
use crate::registry::{DeviceRegistry, RegistryStats};
use crate::session::{Session, SessionCoordinator, SessionLedger};
use crate::token::TokenManager;

/// Everything [`GardenClient::diagnostics`] reports.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub session_id: Option<Uuid>,
    pub location_id: Option<LocationId>,
    pub simultaneous_logins: u64,
    pub token_exchanges: u64,
    pub channel: ChannelDiagnostics,
    pub registry: RegistryStats,
    pub commands: GateStats,
}

/// The main entry point for consumers.
///
/// [`connect()`](Self::connect) negotiates a session and loads the device
/// snapshot. [`start_realtime()`](Self::start_realtime) then keeps the
/// registry current over the push channel. After
/// [`shutdown()`](Self::shutdown) the client cannot be reused.
#[derive(Clone)]
pub struct GardenClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    session: Arc<SessionCoordinator>,
    registry: Arc<DeviceRegistry>,
    markers: Arc<MarkerSource>,
    gate: CommandGate,
    channel: Arc<RealtimeChannel>,
    backends: Backends,
    shutdown: CancellationToken,
}

impl GardenClient {
    /// Build a client talking to the real cloud endpoints.
    pub fn new(config: ClientConfig) -> Result<Self, CoreError> {
        let auth_url = parse_endpoint("auth", &config.endpoints.auth)?;
        let smart_url = parse_endpoint("smart", &config.endpoints.smart)?;

        let credentials = ApplicationCredentials::new(
            config.application_key.clone(),
            config.application_secret.clone(),
        );
        let auth = AuthClient::new(auth_url, credentials, &config.transport)?;
        let api = SmartSystemClient::new(smart_url, config.application_key.clone(), &config.transport)?;

        let backends = Backends {
            tokens: Arc::new(auth),
            api: Arc::new(api),
            push: Arc::new(TungsteniteConnector),
        };
        Ok(Self::with_backends(
            config,
            backends,
            Arc::new(SystemClock),
            Arc::new(SessionLedger::new()),
        ))
    }

    /// Build a client over explicit collaborators.
    ///
    /// Clients that share `ledger` see each other's sessions, so a second
    /// client for the same application key closes the first one's session.
    pub fn with_backends(
        config: ClientConfig,
        backends: Backends,
        clock: Arc<dyn Clock>,
        ledger: Arc<SessionLedger>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let registry = Arc::new(DeviceRegistry::new(Arc::clone(&clock)));
        let markers = Arc::new(MarkerSource::new());

        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&backends.tokens),
            Arc::clone(&clock),
            config.token_retry,
            shutdown.clone(),
        ));
        let session = Arc::new(SessionCoordinator::new(
            config.application_key.clone(),
            config.location_id.clone(),
            tokens,
            Arc::clone(&backends.api),
            ledger,
            Arc::clone(&clock),
            shutdown.clone(),
        ));
        let gate = CommandGate::new(
            Arc::clone(&registry),
            Arc::clone(&session),
            Arc::clone(&backends.api),
            Arc::clone(&clock),
            config.gate,
            shutdown.clone(),
        );
        let channel = Arc::new(RealtimeChannel::new(
            config.channel,
            Arc::clone(&session),
            Arc::clone(&backends.api),
            Arc::clone(&backends.push),
            Arc::clone(&registry),
            Arc::clone(&markers),
            clock,
            &shutdown,
        ));

        Self {
            inner: Arc::new(ClientInner {
                config,
                session,
                registry,
                markers,
                gate,
                channel,
                backends,
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Negotiate a session and load the location snapshot.
    pub async fn connect(&self) -> Result<Arc<Session>, CoreError> {
        let session = self.inner.session.start_session().await?;
        self.refresh().await?;
        Ok(session)
    }

    /// Start the push channel. Idempotent.
    pub fn start_realtime(&self) {
        self.inner.channel.start();
    }

    /// Resolves when the push channel exits on its own: session ended,
    /// fatal error, or shutdown.
    pub async fn realtime_finished(&self) {
        self.inner.channel.finished().await;
    }

    /// Stop the push channel and report why it ended. `None` if it was
    /// never started or has already been collected.
    pub async fn stop_realtime(&self) -> Option<ChannelExit> {
        self.inner.channel.stop().await
    }

    /// Re-fetch the location snapshot over REST and apply it.
    ///
    /// Runs on the caller's task, alongside the push channel. Both go
    /// through the registry's ordered publish path. Returns the number of
    /// devices in the location.
    pub async fn refresh(&self) -> Result<usize, CoreError> {
        let session = self.inner.session.start_session().await?;
        let location_id = session.location().id.clone();
        let tokens = self.inner.session.tokens();

        let mut retried = false;
        let doc = loop {
            let token = tokens.acquire().await?;
            match self
                .inner
                .backends
                .api
                .location_snapshot(token.secret(), location_id.as_str())
                .await
            {
                Ok(doc) => break doc,
                Err(smartgarden_api::Error::Unauthorized) if !retried => {
                    debug!("Snapshot token rejected, refreshing once");
                    tokens.reject(&token);
                    retried = true;
                }
                Err(smartgarden_api::Error::SimultaneousLogin { message }) => {
                    self.inner.session.handle_simultaneous_login(&message);
                    return Err(CoreError::from(smartgarden_api::Error::SimultaneousLogin {
                        message,
                    }));
                }
                Err(e) => return Err(e.into()),
            }
        };

        let devices = self
            .inner
            .registry
            .apply_snapshot(convert::location_state(&doc, &self.inner.markers));
        debug!(location_id = %location_id, devices, "Snapshot applied");
        Ok(devices)
    }

    /// Stop the push channel, end the session and revoke its token.
    pub async fn shutdown(&self) {
        match self.inner.channel.stop().await {
            Some(ChannelExit::Failed(e)) => warn!(error = %e, "Push channel had failed"),
            Some(exit) => debug!(?exit, "Push channel stopped"),
            None => {}
        }
        if let Some(session) = self.inner.session.current() {
            self.inner.session.end_session(&session).await;
        }
        self.inner.gate.close().await;
        self.inner.shutdown.cancel();
        info!("Garden client shut down");
    }

    /// Connect, run `f`, shut down. For single CLI invocations.
    pub async fn oneshot<F, Fut, T>(config: ClientConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(GardenClient) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let client = Self::new(config)?;
        let result = match client.connect().await {
            Ok(_) => f(client.clone()).await,
            Err(e) => Err(e),
        };
        client.shutdown().await;
        result
    }

    // ── State ────────────────────────────────────────────────────────

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    pub fn device(&self, device_id: &DeviceId) -> Option<Arc<Device>> {
        self.inner.registry.get(device_id)
    }

    /// Locations known to the live session, or the registry's when none.
    pub fn locations(&self) -> Vec<Location> {
        match self.inner.session.current() {
            Some(session) => session.locations().to_vec(),
            None => self.inner.registry.locations(),
        }
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.inner.session.current()
    }

    pub fn channel_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.channel.watch_state()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let session = self.inner.session.current();
        Diagnostics {
            session_id: session.as_ref().map(|s| s.id()),
            location_id: session.as_ref().map(|s| s.location().id.clone()),
            simultaneous_logins: self.inner.session.conflicts(),
            token_exchanges: self.inner.session.tokens().exchange_count(),
            channel: self.inner.channel.diagnostics(),
            registry: self.inner.registry.stats(),
            commands: self.inner.gate.stats(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub async fn issue(
        &self,
        device_id: &DeviceId,
        kind: CommandKind,
        params: CommandParameters,
    ) -> Result<CommandReceipt, CommandError> {
        self.inner.gate.issue(device_id, kind, params).await
    }
}

fn parse_endpoint(name: &str, raw: &str) -> Result<Url, CoreError> {
    Url::parse(raw).map_err(|e| CoreError::Config {
        message: format!("invalid {name} endpoint '{raw}': {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use secrecy::SecretString;
    use tokio::time::sleep;

    use super::*;
    use crate::fakes::{Fakes, valve_message};
    use crate::model::{DeviceKind, DeviceState, ValveActivity};
    use crate::session::EndReason;

    fn config() -> ClientConfig {
        ClientConfig::new("app-key", SecretString::from("secret"))
    }

    fn client(fakes: &Fakes, ledger: &Arc<SessionLedger>) -> GardenClient {
        GardenClient::with_backends(
            config(),
            fakes.backends(),
            Arc::new(SystemClock),
            Arc::clone(ledger),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn connect_loads_snapshot() {
        let fakes = Fakes::new();
        let client = client(&fakes, &Arc::new(SessionLedger::new()));

        let session = client.connect().await.unwrap();
        assert_eq!(session.location().id, LocationId::from("loc-1"));
        assert_eq!(client.registry().len(), 5);
        assert_eq!(client.registry().find_by_type(DeviceKind::IrrigationValve).len(), 1);
        assert_eq!(client.locations().len(), 1);

        let diag = client.diagnostics();
        assert_eq!(diag.session_id, Some(session.id()));
        assert_eq!(diag.token_exchanges, 1);
        assert_eq!(diag.channel.state, ChannelState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_updates_reach_the_registry() {
        let fakes = Fakes::new();
        let client = client(&fakes, &Arc::new(SessionLedger::new()));
        client.connect().await.unwrap();
        client.start_realtime();
        fakes.push.wait_for_connects(1).await;

        fakes
            .push
            .latest()
            .send_json(&valve_message("valve-1:1", "MANUAL_WATERING"));
        sleep(Duration::from_millis(10)).await;

        let valve = client.device(&DeviceId::from("valve-1")).unwrap();
        assert!(matches!(
            &valve.state,
            DeviceState::Valve(v) if v.activity == ValveActivity::ManualWatering
        ));
        assert_eq!(*client.channel_state().borrow(), ChannelState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_channel_and_revokes() {
        let fakes = Fakes::new();
        let client = client(&fakes, &Arc::new(SessionLedger::new()));
        let session = client.connect().await.unwrap();
        client.start_realtime();
        fakes.push.wait_for_connects(1).await;

        client.shutdown().await;
        assert!(fakes.push.remote(0).is_closed());
        assert_eq!(session.end_reason(), Some(EndReason::Ended));
        assert_eq!(fakes.tokens.revoked(), vec!["tok-1".to_owned()]);
        assert!(client.session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn second_client_replaces_first_session() {
        let ledger = Arc::new(SessionLedger::new());
        let fakes = Fakes::new();
        let first = client(&fakes, &ledger);
        let old = first.connect().await.unwrap();

        let second = client(&fakes, &ledger);
        let new = second.connect().await.unwrap();

        assert_ne!(old.id(), new.id());
        assert_eq!(old.end_reason(), Some(EndReason::Replaced));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_session_finishes_realtime() {
        let ledger = Arc::new(SessionLedger::new());
        let fakes = Fakes::new();
        let first = client(&fakes, &ledger);
        first.connect().await.unwrap();
        first.start_realtime();
        fakes.push.wait_for_connects(1).await;

        let second = client(&fakes, &ledger);
        second.connect().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), first.realtime_finished())
            .await
            .unwrap();
        assert!(matches!(
            first.stop_realtime().await,
            Some(ChannelExit::SessionEnded)
        ));
        assert!(first.stop_realtime().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn commands_go_through_the_gate() {
        let fakes = Fakes::new();
        let client = client(&fakes, &Arc::new(SessionLedger::new()));
        client.connect().await.unwrap();

        let receipt = client
            .issue(
                &DeviceId::from("sock-1"),
                CommandKind::StartOverride,
                CommandParameters::default(),
            )
            .await
            .unwrap();
        assert_eq!(receipt.seconds, None);
        assert_eq!(client.diagnostics().commands.accepted, 1);
        assert_eq!(fakes.api.sent()[0].command, "START_OVERRIDE");
    }

    #[test]
    fn bad_endpoint_is_a_config_error() {
        let mut cfg = config();
        cfg.endpoints.smart = "not a url".into();
        assert!(matches!(
            GardenClient::new(cfg),
            Err(CoreError::Config { .. })
        ));
    }
}

// ── In-memory collaborators ──
//
// Scriptable stand-ins for the token endpoint, the REST API and the push
// socket. Every fake records what it was asked to do.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use smartgarden_api::{AccessGrant, CommandRequest, Error, LocationDocument, PushFrame, Resource};
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::backend::{Backends, PushConnection, PushConnector, SmartSystemApi, TokenEndpoint};

fn locked<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

// ── Tokens ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub(crate) enum TokenReply {
    /// Grant with the given lifetime in seconds.
    Ok(u64),
    Invalid,
    Denied,
    Simultaneous,
    Transient,
}

#[derive(Default)]
pub(crate) struct FakeTokens {
    delay: Duration,
    script: Mutex<VecDeque<TokenReply>>,
    exchanges: AtomicU64,
    revoked: Mutex<Vec<String>>,
}

impl FakeTokens {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Queue replies; once exhausted every exchange succeeds with one hour.
    pub(crate) fn script(&self, replies: impl IntoIterator<Item = TokenReply>) {
        locked(&self.script).extend(replies);
    }

    pub(crate) fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub(crate) fn revoked(&self) -> Vec<String> {
        locked(&self.revoked).clone()
    }
}

#[async_trait]
impl TokenEndpoint for FakeTokens {
    async fn exchange(&self) -> Result<AccessGrant, Error> {
        let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = locked(&self.script)
            .pop_front()
            .unwrap_or(TokenReply::Ok(3600));
        match reply {
            TokenReply::Ok(secs) => Ok(AccessGrant {
                access_token: SecretString::from(format!("tok-{n}")),
                token_type: "Bearer".into(),
                expires_in: Duration::from_secs(secs),
                scope: None,
                user_id: Some("user-1".into()),
            }),
            TokenReply::Invalid => Err(Error::Authentication {
                status: 400,
                message: "invalid_client".into(),
            }),
            TokenReply::Denied => Err(Error::AccessDenied {
                message: "application not connected".into(),
            }),
            TokenReply::Simultaneous => Err(Error::SimultaneousLogin {
                message: "simultaneous login detected".into(),
            }),
            TokenReply::Transient => Err(Error::Api {
                status: 503,
                message: "service unavailable".into(),
            }),
        }
    }

    async fn revoke(&self, token: &SecretString) -> Result<(), Error> {
        locked(&self.revoked).push(token.expose_secret().to_owned());
        Ok(())
    }
}

// ── REST API ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    Accepted,
    Status(u16),
    RateLimited(Option<u64>),
    Unauthorized,
    Simultaneous,
}

impl Reply {
    fn into_result(self) -> Result<(), Error> {
        match self {
            Self::Accepted => Ok(()),
            Self::Status(status) => Err(Error::Api {
                status,
                message: format!("HTTP {status}"),
            }),
            Self::RateLimited(retry_after_secs) => Err(Error::RateLimited { retry_after_secs }),
            Self::Unauthorized => Err(Error::Unauthorized),
            Self::Simultaneous => Err(Error::SimultaneousLogin {
                message: "simultaneous login detected".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentCommand {
    pub service_id: String,
    pub control: String,
    pub command: String,
    pub seconds: Option<u64>,
    pub token: String,
}

pub(crate) struct FakeApi {
    document: Mutex<LocationDocument>,
    locations_empty: AtomicBool,
    location_script: Mutex<VecDeque<Reply>>,
    command_script: Mutex<VecDeque<Reply>>,
    sent: Mutex<Vec<SentCommand>>,
    websocket_failures: AtomicU32,
    websocket_urls: AtomicU32,
    websocket_attempts: AtomicU32,
    snapshots: AtomicU32,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            document: Mutex::new(garden_document()),
            locations_empty: AtomicBool::new(false),
            location_script: Mutex::new(VecDeque::new()),
            command_script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            websocket_failures: AtomicU32::new(0),
            websocket_urls: AtomicU32::new(0),
            websocket_attempts: AtomicU32::new(0),
            snapshots: AtomicU32::new(0),
        }
    }
}

impl FakeApi {
    pub(crate) fn set_document(&self, doc: LocationDocument) {
        *locked(&self.document) = doc;
    }

    pub(crate) fn set_no_locations(&self) {
        self.locations_empty.store(true, Ordering::SeqCst);
    }

    /// Replies for `list_locations`, consumed before the default success.
    pub(crate) fn script_locations(&self, replies: impl IntoIterator<Item = Reply>) {
        locked(&self.location_script).extend(replies);
    }

    /// Replies for `send_command`, consumed before the default `Accepted`.
    pub(crate) fn script_commands(&self, replies: impl IntoIterator<Item = Reply>) {
        locked(&self.command_script).extend(replies);
    }

    pub(crate) fn fail_websocket_urls(&self, n: u32) {
        self.websocket_failures.store(n, Ordering::SeqCst);
    }

    /// Every `websocket_url` call, failed ones included.
    pub(crate) fn websocket_attempts(&self) -> u32 {
        self.websocket_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> Vec<SentCommand> {
        locked(&self.sent).clone()
    }

    pub(crate) fn snapshots(&self) -> u32 {
        self.snapshots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SmartSystemApi for FakeApi {
    async fn list_locations(&self, _token: &SecretString) -> Result<Vec<Resource>, Error> {
        if let Some(reply) = locked(&self.location_script).pop_front() {
            reply.into_result()?;
        }
        if self.locations_empty.load(Ordering::SeqCst) {
            return Err(Error::NoLocations);
        }
        Ok(vec![locked(&self.document).data.clone()])
    }

    async fn location_snapshot(
        &self,
        _token: &SecretString,
        location_id: &str,
    ) -> Result<LocationDocument, Error> {
        let doc = locked(&self.document).clone();
        if doc.data.id != location_id {
            return Err(Error::Api {
                status: 404,
                message: format!("location {location_id} not found"),
            });
        }
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(doc)
    }

    async fn websocket_url(&self, _token: &SecretString, _location_id: &str) -> Result<Url, Error> {
        self.websocket_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .websocket_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Api {
                status: 502,
                message: "bad gateway".into(),
            });
        }
        let n = self.websocket_urls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Url::parse(&format!("wss://push.test/socket/{n}")).unwrap())
    }

    async fn send_command(
        &self,
        token: &SecretString,
        service_id: &str,
        command: &CommandRequest,
    ) -> Result<(), Error> {
        locked(&self.sent).push(SentCommand {
            service_id: service_id.to_owned(),
            control: command.data.control.clone(),
            command: command.data.attributes.command.clone(),
            seconds: command.data.attributes.seconds,
            token: token.expose_secret().to_owned(),
        });
        let reply = locked(&self.command_script)
            .pop_front()
            .unwrap_or(Reply::Accepted);
        reply.into_result()
    }
}

// ── Push socket ──────────────────────────────────────────────────────

#[derive(Debug)]
struct LinkState {
    pings: u32,
    auto_pong: bool,
    closed: bool,
}

/// The server side of one fake connection.
#[derive(Clone)]
pub(crate) struct FakeRemote {
    tx: mpsc::UnboundedSender<PushFrame>,
    link: Arc<Mutex<LinkState>>,
}

impl FakeRemote {
    pub(crate) fn send_json(&self, message: &Value) {
        let _ = self.tx.send(PushFrame::Text(message.to_string()));
    }

    pub(crate) fn send_raw(&self, text: &str) {
        let _ = self.tx.send(PushFrame::Text(text.to_owned()));
    }

    pub(crate) fn send_close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(PushFrame::Closed {
            code,
            reason: reason.to_owned(),
        });
    }

    pub(crate) fn set_auto_pong(&self, on: bool) {
        locked(&self.link).auto_pong = on;
    }

    pub(crate) fn pings(&self) -> u32 {
        locked(&self.link).pings
    }

    pub(crate) fn is_closed(&self) -> bool {
        locked(&self.link).closed
    }
}

struct FakeConnection {
    rx: mpsc::UnboundedReceiver<PushFrame>,
    tx: mpsc::UnboundedSender<PushFrame>,
    link: Arc<Mutex<LinkState>>,
}

#[async_trait]
impl PushConnection for FakeConnection {
    async fn next_frame(&mut self) -> Result<PushFrame, Error> {
        Ok(self.rx.recv().await.unwrap_or(PushFrame::Closed {
            code: 1006,
            reason: "stream ended".into(),
        }))
    }

    async fn ping(&mut self) -> Result<(), Error> {
        let mut link = locked(&self.link);
        if link.closed {
            return Err(Error::WebSocketClosed {
                code: 1000,
                reason: "closed".into(),
            });
        }
        link.pings += 1;
        if link.auto_pong {
            let _ = self.tx.send(PushFrame::Pong);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        locked(&self.link).closed = true;
        Ok(())
    }
}

pub(crate) struct FakePush {
    failures: AtomicU32,
    auto_pong: AtomicBool,
    remotes: Mutex<Vec<FakeRemote>>,
    urls: Mutex<Vec<Url>>,
    connected: watch::Sender<usize>,
}

impl Default for FakePush {
    fn default() -> Self {
        let (connected, _) = watch::channel(0);
        Self {
            failures: AtomicU32::new(0),
            auto_pong: AtomicBool::new(true),
            remotes: Mutex::new(Vec::new()),
            urls: Mutex::new(Vec::new()),
            connected,
        }
    }
}

impl FakePush {
    pub(crate) fn fail_connects(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Whether connections opened from now on answer pings.
    pub(crate) fn set_auto_pong(&self, on: bool) {
        self.auto_pong.store(on, Ordering::SeqCst);
    }

    pub(crate) fn connects(&self) -> usize {
        *self.connected.borrow()
    }

    pub(crate) fn remote(&self, index: usize) -> FakeRemote {
        locked(&self.remotes)[index].clone()
    }

    pub(crate) fn latest(&self) -> FakeRemote {
        locked(&self.remotes).last().cloned().unwrap()
    }

    pub(crate) fn urls(&self) -> Vec<Url> {
        locked(&self.urls).clone()
    }

    pub(crate) async fn wait_for_connects(&self, n: usize) {
        let mut rx = self.connected.subscribe();
        rx.wait_for(|count| *count >= n).await.unwrap();
    }
}

#[async_trait]
impl PushConnector for FakePush {
    async fn connect(&self, url: &Url) -> Result<Box<dyn PushConnection>, Error> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::WebSocketConnect("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(Mutex::new(LinkState {
            pings: 0,
            auto_pong: self.auto_pong.load(Ordering::SeqCst),
            closed: false,
        }));
        locked(&self.remotes).push(FakeRemote {
            tx: tx.clone(),
            link: Arc::clone(&link),
        });
        locked(&self.urls).push(url.clone());
        self.connected.send_modify(|c| *c += 1);
        Ok(Box::new(FakeConnection { rx, tx, link }))
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

pub(crate) struct Fakes {
    pub tokens: Arc<FakeTokens>,
    pub api: Arc<FakeApi>,
    pub push: Arc<FakePush>,
}

impl Fakes {
    pub(crate) fn new() -> Self {
        Self {
            tokens: Arc::new(FakeTokens::default()),
            api: Arc::new(FakeApi::default()),
            push: Arc::new(FakePush::default()),
        }
    }

    /// Like `new`, with every token exchange taking `delay`.
    pub(crate) fn with_token_delay(delay: Duration) -> Self {
        Self {
            tokens: Arc::new(FakeTokens::with_delay(delay)),
            ..Self::new()
        }
    }

    pub(crate) fn backends(&self) -> Backends {
        Backends {
            tokens: Arc::clone(&self.tokens) as Arc<dyn TokenEndpoint>,
            api: Arc::clone(&self.api) as Arc<dyn SmartSystemApi>,
            push: Arc::clone(&self.push) as Arc<dyn PushConnector>,
        }
    }
}

/// A push message for one service.
pub(crate) fn service_message(id: &str, kind: &str, attributes: Value) -> Value {
    json!({ "id": id, "type": kind, "attributes": attributes })
}

/// A valve activity push message.
pub(crate) fn valve_message(id: &str, activity: &str) -> Value {
    service_message(id, "VALVE", json!({ "activity": { "value": activity } }))
}

/// Location `loc-1` with a valve, a mower, a socket, a two-valve irrigation
/// controller and a soil sensor. Everything is idle.
pub(crate) fn garden_document() -> LocationDocument {
    serde_json::from_value(json!({
        "data": {
            "id": "loc-1",
            "type": "LOCATION",
            "attributes": { "name": "Garden" },
            "relationships": { "devices": { "data": [
                { "id": "valve-1", "type": "DEVICE" },
                { "id": "mower-1", "type": "DEVICE" },
                { "id": "sock-1", "type": "DEVICE" },
                { "id": "irr-1", "type": "DEVICE" },
                { "id": "soil-1", "type": "DEVICE" }
            ] } }
        },
        "included": [
            { "id": "valve-1", "type": "COMMON", "attributes": {
                "name": { "value": "Front lawn" },
                "batteryLevel": { "value": 90 }
            } },
            { "id": "valve-1:1", "type": "VALVE", "attributes": {
                "activity": { "value": "CLOSED" },
                "state": { "value": "OK" }
            } },
            { "id": "mower-1", "type": "COMMON", "attributes": { "name": { "value": "Sileno" } } },
            { "id": "mower-1", "type": "MOWER", "attributes": {
                "activity": { "value": "PARKED_PARK_SELECTED" },
                "state": { "value": "OK" }
            } },
            { "id": "sock-1", "type": "COMMON", "attributes": { "name": { "value": "Pump" } } },
            { "id": "sock-1", "type": "POWER_SOCKET", "attributes": {
                "activity": { "value": "OFF" },
                "state": { "value": "OK" }
            } },
            { "id": "irr-1", "type": "COMMON", "attributes": { "name": { "value": "Beds" } } },
            { "id": "irr-1:1", "type": "VALVE", "attributes": { "activity": { "value": "CLOSED" } } },
            { "id": "irr-1:2", "type": "VALVE", "attributes": { "activity": { "value": "CLOSED" } } },
            { "id": "soil-1", "type": "COMMON", "attributes": { "name": { "value": "Bed sensor" } } },
            { "id": "soil-1", "type": "SENSOR", "attributes": {
                "soilHumidity": { "value": 40 },
                "soilTemperature": { "value": 18.5 }
            } }
        ]
    }))
    .unwrap()
}

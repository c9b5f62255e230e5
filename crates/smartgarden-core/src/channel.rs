// ── Realtime push channel ──
//
// One long-lived task owns the push connection and applies what it receives
// to the registry. Command callers and snapshot refreshes write to the same
// registry concurrently; the registry orders those writers.
//
// The task cycles through connect → serve → backoff until stopped, the
// session ends, or a credential failure makes retrying pointless.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use smartgarden_api::PushFrame;

use crate::backend::{PushConnection, PushConnector, SmartSystemApi};
use crate::clock::Clock;
use crate::convert::{self, MarkerSource, PushMessage};
use crate::error::{AuthError, ChannelError, CoreError, StateError};
use crate::registry::{DeltaOutcome, DeviceRegistry};
use crate::retry::{Backoff, RetryPolicy, sleep_or_cancel};
use crate::session::{EndReason, Session, SessionCoordinator};
use crate::token::Token;

// ── Configuration ────────────────────────────────────────────────────

/// Keepalive, lifetime and reconnect tuning for the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Interval between liveness pings.
    pub ping_interval: Duration,
    /// Unanswered pings tolerated before the connection is declared dead.
    pub max_missed_pongs: u32,
    /// Upstream-enforced maximum connection lifetime.
    pub max_lifetime: Duration,
    /// How long before `max_lifetime` the replacement connection is opened.
    pub expiry_grace: Duration,
    /// Upper bound for session, snapshot and socket setup.
    pub handshake_timeout: Duration,
    pub reconnect: RetryPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(150),
            max_missed_pongs: 3,
            max_lifetime: Duration::from_secs(2 * 60 * 60),
            expiry_grace: Duration::from_secs(5 * 60),
            handshake_timeout: Duration::from_secs(30),
            reconnect: RetryPolicy::reconnect(),
        }
    }
}

impl ChannelConfig {
    /// Age at which a connection is proactively replaced.
    fn rotate_after(&self) -> Duration {
        self.max_lifetime.saturating_sub(self.expiry_grace)
    }
}

// ── State & diagnostics ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Replacing a connection that is about to hit its lifetime.
    Expiring,
    Disconnecting,
}

/// Why the channel task finished.
#[derive(Debug)]
pub enum ChannelExit {
    Stopped,
    /// The session was ended or replaced by another coordinator.
    SessionEnded,
    /// Non-retryable failure, typically rejected credentials.
    Failed(CoreError),
}

/// Point-in-time view of the channel for diagnostics output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDiagnostics {
    pub state: ChannelState,
    pub session_id: Option<Uuid>,
    pub connected_since: Option<DateTime<Utc>>,
    pub connects: u64,
    pub reconnects: u64,
    pub messages: u64,
    pub applied: u64,
    pub buffered: u64,
    pub stale: u64,
    pub malformed: u64,
    pub unsupported: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Counters {
    connects: AtomicU64,
    reconnects: AtomicU64,
    messages: AtomicU64,
    applied: AtomicU64,
    buffered: AtomicU64,
    stale: AtomicU64,
    malformed: AtomicU64,
    unsupported: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Default)]
struct LinkInfo {
    session_id: Option<Uuid>,
    connected_since: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

// ── Internal plumbing ────────────────────────────────────────────────

/// A live connection plus the session it serves.
struct Link {
    conn: Box<dyn PushConnection>,
    session: Arc<Session>,
    opened_at: Instant,
    // Keeps `end_session` waiting until the connection is closed.
    _hold: TaskTrackerToken,
}

impl Link {
    async fn close(mut self) {
        if let Err(e) = self.conn.close().await {
            debug!(error = %e, "Error closing push connection");
        }
    }
}

enum Setup {
    Stopped,
    Fatal(CoreError),
    Retry(ChannelError),
}

enum ServeEnd {
    Stopped,
    SessionEnded,
    Rotated(Link),
    Failed(ChannelError),
    Fatal(CoreError),
}

enum Event {
    Stop,
    SessionEnded,
    Rotate,
    Keepalive,
    Frame(Result<PushFrame, smartgarden_api::Error>),
}

// ── RealtimeChannel ──────────────────────────────────────────────────

pub struct RealtimeChannel {
    config: ChannelConfig,
    session: Arc<SessionCoordinator>,
    api: Arc<dyn SmartSystemApi>,
    push: Arc<dyn PushConnector>,
    registry: Arc<DeviceRegistry>,
    markers: Arc<MarkerSource>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<ChannelState>,
    stop: CancellationToken,
    finished: CancellationToken,
    task: Mutex<Option<JoinHandle<ChannelExit>>>,
    counters: Counters,
    info: Mutex<LinkInfo>,
}

impl RealtimeChannel {
    /// Build a stopped channel. `shutdown` cancels it along with
    /// everything else owned by the client.
    ///
    /// `markers` must be the same source used for any other conversion
    /// into `registry`, so snapshot and push markers stay comparable.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ChannelConfig,
        session: Arc<SessionCoordinator>,
        api: Arc<dyn SmartSystemApi>,
        push: Arc<dyn PushConnector>,
        registry: Arc<DeviceRegistry>,
        markers: Arc<MarkerSource>,
        clock: Arc<dyn Clock>,
        shutdown: &CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            config,
            session,
            api,
            push,
            registry,
            markers,
            clock,
            state,
            stop: shutdown.child_token(),
            finished: CancellationToken::new(),
            task: Mutex::new(None),
            counters: Counters::default(),
            info: Mutex::new(LinkInfo::default()),
        }
    }

    /// Spawn the channel task. A second call while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() || self.stop.is_cancelled() {
            return;
        }
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move { this.run().await }));
    }

    /// Stop the channel and wait for the task to finish. Effective during
    /// backoff sleeps and handshakes. The channel cannot be restarted.
    pub async fn stop(&self) -> Option<ChannelExit> {
        self.stop.cancel();
        let exit = self.join().await;
        self.set_state(ChannelState::Disconnected);
        exit
    }

    /// Wait for the channel task to finish on its own.
    pub async fn join(&self) -> Option<ChannelExit> {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle?.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!(error = %e, "Push channel task failed");
                None
            }
        }
    }

    /// Resolves once the channel task has exited, without consuming its
    /// result. Never resolves for a channel that was not started.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub fn diagnostics(&self) -> ChannelDiagnostics {
        let info = self.info.lock().unwrap_or_else(PoisonError::into_inner);
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ChannelDiagnostics {
            state: self.state(),
            session_id: info.session_id,
            connected_since: info.connected_since,
            connects: load(&self.counters.connects),
            reconnects: load(&self.counters.reconnects),
            messages: load(&self.counters.messages),
            applied: load(&self.counters.applied),
            buffered: load(&self.counters.buffered),
            stale: load(&self.counters.stale),
            malformed: load(&self.counters.malformed),
            unsupported: load(&self.counters.unsupported),
            last_error: info.last_error.clone(),
        }
    }

    // ── Main loop ────────────────────────────────────────────────────

    /// Connect, serve and reconnect until stopped or failed.
    async fn run(&self) -> ChannelExit {
        let mut backoff = self.config.reconnect.backoff();
        let mut next: Option<Link> = None;

        let exit = loop {
            let link = match next.take() {
                Some(link) => link,
                None => {
                    self.set_state(ChannelState::Connecting);
                    match self.establish().await {
                        Ok(link) => link,
                        Err(Setup::Stopped) => break ChannelExit::Stopped,
                        Err(Setup::Fatal(e)) => break self.fatal(e),
                        Err(Setup::Retry(err)) => {
                            if self.wait_to_retry(&err, &mut backoff).await {
                                continue;
                            }
                            break ChannelExit::Stopped;
                        }
                    }
                }
            };

            self.mark_connected(&link);
            match self.serve(link, &mut backoff).await {
                ServeEnd::Stopped => break ChannelExit::Stopped,
                ServeEnd::SessionEnded => break ChannelExit::SessionEnded,
                ServeEnd::Fatal(e) => break self.fatal(e),
                ServeEnd::Rotated(link) => {
                    bump(&self.counters.reconnects);
                    next = Some(link);
                }
                ServeEnd::Failed(err) => {
                    bump(&self.counters.reconnects);
                    if !self.wait_to_retry(&err, &mut backoff).await {
                        break ChannelExit::Stopped;
                    }
                }
            }
        };

        self.set_state(ChannelState::Disconnected);
        debug!(?exit, "Push channel loop exiting");
        self.finished.cancel();
        exit
    }

    /// Record the failure and sleep out the backoff. `false` when stopped.
    async fn wait_to_retry(&self, err: &ChannelError, backoff: &mut Backoff) -> bool {
        self.set_state(ChannelState::Disconnected);
        self.record_error(err.to_string());

        // The reconnect policy is unbounded; fall back to its cap otherwise.
        let delay = backoff
            .next_delay(err.retry_after())
            .unwrap_or(self.config.reconnect.max_delay);
        warn!(
            error = %err,
            attempt = backoff.attempt(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Push channel down, reconnecting after backoff"
        );
        sleep_or_cancel(delay, &self.stop).await
    }

    fn fatal(&self, err: CoreError) -> ChannelExit {
        error!(error = %err, "Push channel giving up");
        self.record_error(err.to_string());
        ChannelExit::Failed(err)
    }

    // ── Handshake ────────────────────────────────────────────────────

    /// Open a connection and apply a fresh snapshot.
    ///
    /// The socket is opened before the snapshot is fetched so no update
    /// falls between the two.
    async fn establish(&self) -> Result<Link, Setup> {
        let handshake = tokio::time::timeout(self.config.handshake_timeout, self.handshake());
        tokio::select! {
            biased;
            () = self.stop.cancelled() => Err(Setup::Stopped),
            result = handshake => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(Setup::Retry(ChannelError::HandshakeFailed {
                    reason: "handshake timed out".into(),
                    retry_after: None,
                })),
            },
        }
    }

    async fn handshake(&self) -> Result<Link, Setup> {
        let session = self
            .session
            .start_session()
            .await
            .map_err(Self::classify_session)?;
        let hold = session.hold();
        let location_id = session.location().id.clone();

        let token = self
            .session
            .tokens()
            .acquire()
            .await
            .map_err(|e| Self::classify_session(CoreError::Auth(e)))?;

        let url = self
            .api
            .websocket_url(token.secret(), location_id.as_str())
            .await
            .map_err(|e| self.classify_api(e, &token))?;
        debug!(url = %url, "Opening push connection");
        let conn = self
            .push
            .connect(&url)
            .await
            .map_err(|e| self.classify_api(e, &token))?;

        let doc = self
            .api
            .location_snapshot(token.secret(), location_id.as_str())
            .await
            .map_err(|e| self.classify_api(e, &token))?;
        let devices = self
            .registry
            .apply_snapshot(convert::location_state(&doc, &self.markers));
        bump(&self.counters.connects);
        info!(
            session_id = %session.id(),
            location_id = %location_id,
            devices,
            "Push channel connected"
        );

        Ok(Link {
            conn,
            session,
            opened_at: Instant::now(),
            _hold: hold,
        })
    }

    fn classify_session(err: CoreError) -> Setup {
        match err {
            CoreError::Cancelled => Setup::Stopped,
            CoreError::Auth(auth) => match auth {
                AuthError::SimultaneousLogin { .. } | AuthError::Transient { .. } => {
                    Setup::Retry(ChannelError::HandshakeFailed {
                        retry_after: auth.retry_after(),
                        reason: auth.to_string(),
                    })
                }
                other => Setup::Fatal(CoreError::Auth(other)),
            },
            CoreError::NoLocations
            | CoreError::LocationNotFound { .. }
            | CoreError::Config { .. } => Setup::Fatal(err),
            other => Setup::Retry(ChannelError::HandshakeFailed {
                reason: other.to_string(),
                retry_after: None,
            }),
        }
    }

    fn classify_api(&self, err: smartgarden_api::Error, token: &Token) -> Setup {
        use smartgarden_api::Error as Api;

        match err {
            Api::Unauthorized => {
                self.session.tokens().reject(token);
                Setup::Retry(ChannelError::HandshakeFailed {
                    reason: "access token rejected".into(),
                    retry_after: None,
                })
            }
            Api::SimultaneousLogin { ref message } => {
                self.session.handle_simultaneous_login(message);
                Self::classify_session(CoreError::Auth(AuthError::from(err)))
            }
            Api::Authentication { .. } | Api::AccessDenied { .. } => {
                Setup::Fatal(CoreError::Auth(AuthError::from(err)))
            }
            other => Setup::Retry(ChannelError::HandshakeFailed {
                retry_after: other.retry_after(),
                reason: other.to_string(),
            }),
        }
    }

    // ── Serving one connection ───────────────────────────────────────

    async fn serve(&self, mut link: Link, backoff: &mut Backoff) -> ServeEnd {
        let period = self.config.ping_interval;
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rotate_at = link.opened_at + self.config.rotate_after();
        // Failed replacements back off like reconnects. A successful one
        // ends this connection, so the next serve starts from scratch.
        let mut rotation = self.config.reconnect.backoff();
        let mut outstanding: u32 = 0;
        let mut proven = false;

        loop {
            let event = tokio::select! {
                biased;
                () = self.stop.cancelled() => Event::Stop,
                () = link.session.ended() => Event::SessionEnded,
                () = tokio::time::sleep_until(rotate_at) => Event::Rotate,
                _ = keepalive.tick() => Event::Keepalive,
                frame = link.conn.next_frame() => Event::Frame(frame),
            };

            match event {
                Event::Stop => {
                    self.set_state(ChannelState::Disconnecting);
                    link.close().await;
                    return ServeEnd::Stopped;
                }
                Event::SessionEnded => {
                    self.set_state(ChannelState::Disconnecting);
                    let reason = link.session.end_reason();
                    link.close().await;
                    if reason == Some(EndReason::Conflict) {
                        return ServeEnd::Failed(ChannelError::Dropped {
                            reason: "session torn down after simultaneous login".into(),
                        });
                    }
                    info!(?reason, "Session over, push channel closing");
                    return ServeEnd::SessionEnded;
                }
                Event::Rotate => {
                    self.set_state(ChannelState::Expiring);
                    info!("Connection nearing its lifetime, opening a replacement");
                    match self.establish().await {
                        Ok(replacement) => {
                            link.close().await;
                            return ServeEnd::Rotated(replacement);
                        }
                        Err(Setup::Stopped) => {
                            link.close().await;
                            return ServeEnd::Stopped;
                        }
                        Err(Setup::Fatal(e)) => {
                            link.close().await;
                            return ServeEnd::Fatal(e);
                        }
                        Err(Setup::Retry(err)) => {
                            let delay = rotation
                                .next_delay(err.retry_after())
                                .unwrap_or(self.config.reconnect.max_delay);
                            warn!(
                                error = %err,
                                attempt = rotation.attempt(),
                                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                "Replacement connection failed, keeping the current one"
                            );
                            self.record_error(err.to_string());
                            self.set_state(ChannelState::Connected);
                            rotate_at = Instant::now() + delay;
                        }
                    }
                }
                Event::Keepalive => {
                    if outstanding >= self.config.max_missed_pongs {
                        self.set_state(ChannelState::Disconnecting);
                        link.close().await;
                        return ServeEnd::Failed(ChannelError::KeepaliveTimeout {
                            missed: outstanding,
                        });
                    }
                    if let Err(e) = link.conn.ping().await {
                        self.set_state(ChannelState::Disconnecting);
                        return ServeEnd::Failed(ChannelError::Dropped {
                            reason: e.to_string(),
                        });
                    }
                    outstanding += 1;
                    trace!(outstanding, "Ping sent");
                }
                Event::Frame(Ok(PushFrame::Pong)) => {
                    outstanding = 0;
                    Self::prove(&mut proven, backoff);
                }
                Event::Frame(Ok(PushFrame::Text(text))) => {
                    if let Err(err) = self.dispatch(&text) {
                        self.set_state(ChannelState::Disconnecting);
                        link.close().await;
                        return ServeEnd::Failed(err);
                    }
                    Self::prove(&mut proven, backoff);
                }
                Event::Frame(Ok(PushFrame::Closed { code, reason })) => {
                    self.set_state(ChannelState::Disconnecting);
                    return ServeEnd::Failed(ChannelError::Dropped {
                        reason: format!("closed by server ({code}): {reason}"),
                    });
                }
                Event::Frame(Err(e)) => {
                    self.set_state(ChannelState::Disconnecting);
                    link.close().await;
                    return ServeEnd::Failed(ChannelError::Dropped {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// The first sign of life on a connection resets the reconnect backoff.
    fn prove(proven: &mut bool, backoff: &mut Backoff) {
        if !*proven {
            *proven = true;
            backoff.reset();
        }
    }

    // ── Message handling ─────────────────────────────────────────────

    /// Apply one inbound message. Malformed messages are skipped; a panic
    /// while applying drops the connection.
    fn dispatch(&self, text: &str) -> Result<(), ChannelError> {
        bump(&self.counters.messages);
        match catch_unwind(AssertUnwindSafe(|| self.apply_message(text))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                bump(&self.counters.malformed);
                warn!(error = %err, "Skipping push message");
                Ok(())
            }
            Err(_) => {
                error!("Push message handler panicked");
                Err(ChannelError::Dropped {
                    reason: "message handler panicked".into(),
                })
            }
        }
    }

    fn apply_message(&self, text: &str) -> Result<(), ChannelError> {
        let resource = smartgarden_api::websocket::parse_message(text).map_err(|e| {
            ChannelError::MalformedMessage {
                reason: e.to_string(),
            }
        })?;

        match convert::push_message(&resource, &self.markers) {
            PushMessage::Service(update) => match self.registry.apply_delta(update) {
                Ok(DeltaOutcome::Applied | DeltaOutcome::Confirmed) => {
                    bump(&self.counters.applied);
                }
                Ok(DeltaOutcome::Buffered) => bump(&self.counters.buffered),
                Err(StateError::StaleUpdate { device_id }) => {
                    bump(&self.counters.stale);
                    debug!(device_id = %device_id, "Stale push update dropped");
                }
                Err(e) => debug!(error = %e, "Push update not applied"),
            },
            PushMessage::Location { id, name } => {
                self.registry.rename_location(&id, &name);
            }
            PushMessage::Device { id } => trace!(device_id = %id, "Device envelope"),
            PushMessage::Unsupported { kind } => {
                bump(&self.counters.unsupported);
                debug!(kind, "Ignoring unsupported push message");
            }
        }
        Ok(())
    }

    // ── Bookkeeping ──────────────────────────────────────────────────

    fn set_state(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Push channel state");
        }
    }

    fn mark_connected(&self, link: &Link) {
        {
            let mut info = self.info.lock().unwrap_or_else(PoisonError::into_inner);
            info.session_id = Some(link.session.id());
            info.connected_since = Some(self.clock.wall_now());
        }
        self.set_state(ChannelState::Connected);
    }

    fn record_error(&self, message: String) {
        self.info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_error = Some(message);
    }
}

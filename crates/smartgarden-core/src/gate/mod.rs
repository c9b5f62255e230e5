// ── Command gate ──
//
// Sends user commands and protects their optimistic effect from push
// updates that were already in flight. Commands for one device are
// serialized through a per-device async lane; unrelated devices proceed
// in parallel.

mod command;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use smartgarden_api::CommandRequest;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub use command::{CommandKind, CommandParameters};

use crate::backend::SmartSystemApi;
use crate::clock::Clock;
use crate::config::GateSettings;
use crate::error::{AuthError, CommandError};
use crate::model::{DeviceId, ServiceId};
use crate::registry::DeviceRegistry;
use crate::retry::sleep_or_cancel;
use crate::session::SessionCoordinator;
use crate::token::TokenManager;

/// Outcome of an accepted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReceipt {
    pub request_id: String,
    pub device_id: DeviceId,
    pub service_id: ServiceId,
    pub command: CommandKind,
    pub seconds: Option<u64>,
    /// HTTP attempts including the successful one.
    pub attempts: u32,
    /// Guard protecting the optimistic effect, if one was installed.
    pub guard_id: Option<u64>,
}

/// Counters for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub accepted: u64,
    pub failed: u64,
    pub retries: u64,
}

type Failure = (CommandError, Option<Duration>);

pub struct CommandGate {
    registry: Arc<DeviceRegistry>,
    session: Arc<SessionCoordinator>,
    api: Arc<dyn SmartSystemApi>,
    clock: Arc<dyn Clock>,
    settings: GateSettings,
    shutdown: CancellationToken,
    lanes: DashMap<DeviceId, Arc<Mutex<()>>>,
    timers: TaskTracker,
    accepted: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

impl CommandGate {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        session: Arc<SessionCoordinator>,
        api: Arc<dyn SmartSystemApi>,
        clock: Arc<dyn Clock>,
        settings: GateSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            session,
            api,
            clock,
            settings,
            shutdown,
            lanes: DashMap::new(),
            timers: TaskTracker::new(),
            accepted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// Validate, send and optimistically apply a command.
    ///
    /// Validation and rejection fail without touching local state.
    /// Unavailable and rate-limited sends are retried with backoff.
    pub async fn issue(
        &self,
        device_id: &DeviceId,
        kind: CommandKind,
        params: CommandParameters,
    ) -> Result<CommandReceipt, CommandError> {
        let lane = self.lane(device_id);
        let _lane = lane.lock().await;

        let device = self
            .registry
            .get(device_id)
            .ok_or_else(|| CommandError::DeviceNotFound {
                device_id: device_id.clone(),
            })?;
        let prepared = command::prepare(
            &device,
            kind,
            &params,
            &self.settings.durations,
            self.clock.wall_now(),
        )?;

        let request = CommandRequest::new(prepared.control, &kind.to_string(), prepared.seconds);
        let attempts = match self.send(&prepared.service_id, &request).await {
            Ok(attempts) => attempts,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(device_id = %device_id, command = %kind, error = %e, "Command failed");
                return Err(e);
            }
        };
        self.accepted.fetch_add(1, Ordering::Relaxed);

        let guard_id = match &prepared.optimistic {
            Some(patch) => self
                .registry
                .apply_optimistic(
                    device_id,
                    &prepared.service_id,
                    patch,
                    prepared.expected_active,
                    self.settings.guard_window,
                )
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Optimistic update skipped");
                    None
                }),
            None => None,
        };
        if let Some(id) = guard_id {
            self.schedule_expiry(device_id.clone(), id);
        }

        info!(
            device_id = %device_id,
            service_id = %prepared.service_id,
            command = %kind,
            attempts,
            "Command accepted"
        );
        Ok(CommandReceipt {
            request_id: request.data.id,
            device_id: device_id.clone(),
            service_id: prepared.service_id,
            command: kind,
            seconds: prepared.seconds,
            attempts,
            guard_id,
        })
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting guard timers and wait for pending ones.
    pub async fn close(&self) {
        self.timers.close();
        self.timers.wait().await;
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn tokens(&self) -> &Arc<TokenManager> {
        self.session.tokens()
    }

    fn lane(&self, device_id: &DeviceId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.lanes
                .entry(device_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    async fn send(&self, service_id: &ServiceId, request: &CommandRequest) -> Result<u32, CommandError> {
        let mut backoff = self.settings.retry.backoff();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let (err, hint) = match self.attempt(service_id, request).await {
                Ok(()) => return Ok(attempts),
                Err(failure) => failure,
            };
            if !err.is_retryable() {
                return Err(err);
            }
            let Some(delay) = backoff.next_delay(hint) else {
                return Err(err);
            };
            self.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                service_id = %service_id,
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Command send failed, retrying"
            );
            if !sleep_or_cancel(delay, &self.shutdown).await {
                return Err(err);
            }
        }
    }

    async fn attempt(&self, service_id: &ServiceId, request: &CommandRequest) -> Result<(), Failure> {
        let token = self
            .tokens()
            .acquire()
            .await
            .map_err(|e| self.classify_auth(e))?;

        match self
            .api
            .send_command(token.secret(), service_id.as_str(), request)
            .await
        {
            Ok(()) => Ok(()),
            Err(smartgarden_api::Error::Unauthorized) => {
                self.tokens().reject(&token);
                Err((
                    CommandError::Unavailable {
                        message: "access token rejected".into(),
                    },
                    Some(Duration::ZERO),
                ))
            }
            Err(e) => match CommandError::from(e) {
                CommandError::Auth(auth) => Err(self.classify_auth(auth)),
                CommandError::RateLimited { retry_after } => {
                    Err((CommandError::RateLimited { retry_after }, retry_after))
                }
                other => Err((other, None)),
            },
        }
    }

    /// Simultaneous login tears the session down and is retried like an
    /// outage; other credential failures surface as-is.
    fn classify_auth(&self, err: AuthError) -> Failure {
        match err {
            AuthError::SimultaneousLogin {
                message,
                retry_after,
            } => {
                self.session.handle_simultaneous_login(&message);
                (CommandError::Unavailable { message }, Some(retry_after))
            }
            AuthError::Transient {
                message,
                retry_after,
            } => (CommandError::Unavailable { message }, retry_after),
            other => (CommandError::Auth(other), None),
        }
    }

    fn schedule_expiry(&self, device_id: DeviceId, guard_id: u64) {
        let registry = Arc::clone(&self.registry);
        let window = self.settings.guard_window;
        let cancel = self.shutdown.clone();
        self.timers.spawn(async move {
            if sleep_or_cancel(window, &cancel).await && registry.expire_guard(&device_id, guard_id)
            {
                debug!(device_id = %device_id, guard_id, "Guard window elapsed");
            }
        });
    }
}

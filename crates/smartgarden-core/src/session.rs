// ── Session coordination ──
//
// At most one live session per application key. Session transitions are
// serialized behind an async mutex; reads of the current session are
// lock-free. A `SessionLedger` shared between clients lets a new session
// find and close a prior one for the same credentials.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::SmartSystemApi;
use crate::clock::Clock;
use crate::convert;
use crate::error::{AuthError, CoreError};
use crate::model::{Location, LocationId};
use crate::retry::sleep_or_cancel;
use crate::token::TokenManager;

/// Session negotiation attempts when the upstream reports a simultaneous login.
const NEGOTIATION_ATTEMPTS: u32 = 3;

/// Added to the upstream backoff for each failed negotiation attempt.
const CONFLICT_STEP: Duration = Duration::from_secs(10);

/// Upper bound on waiting for a closing session's tasks.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

// ── Session ──────────────────────────────────────────────────────────

/// Why a session stopped being live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EndReason {
    /// `end_session` was called.
    Ended,
    /// Another login for the same credentials was reported.
    Conflict,
    /// A newer session for the same credentials took over.
    Replaced,
}

/// One authenticated connection identity.
pub struct Session {
    id: Uuid,
    application_key: String,
    location: Location,
    locations: Vec<Location>,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    end_reason: Mutex<Option<EndReason>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("location", &self.location.id)
            .field("started_at", &self.started_at)
            .field("end_reason", &self.end_reason())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn application_key(&self) -> &str {
        &self.application_key
    }

    /// The location this session serves.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Every location visible to the credentials.
    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        *self.end_reason.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves once the session stops being live.
    pub async fn ended(&self) {
        self.cancel.cancelled().await;
    }

    /// Keep `end_session` waiting until the returned token is dropped.
    pub(crate) fn hold(&self) -> TaskTrackerToken {
        self.tasks.token()
    }

    fn terminate(&self, reason: EndReason) {
        {
            let mut slot = self.end_reason.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    async fn wait_closed(&self) {
        self.tasks.close();
        if tokio::time::timeout(CLOSE_TIMEOUT, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(session_id = %self.id, "Timed out waiting for session tasks to finish");
        }
    }
}

// ── SessionLedger ────────────────────────────────────────────────────

/// Live sessions by application key, shared by every coordinator that
/// should see each other's sessions.
#[derive(Default)]
pub struct SessionLedger {
    live: DashMap<String, Arc<Session>>,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, application_key: &str) -> Option<Arc<Session>> {
        self.live.get(application_key).map(|s| Arc::clone(s.value()))
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn take(&self, application_key: &str) -> Option<Arc<Session>> {
        self.live.remove(application_key).map(|(_, s)| s)
    }

    fn register(&self, session: &Arc<Session>) {
        self.live
            .insert(session.application_key.clone(), Arc::clone(session));
    }

    fn remove(&self, session: &Session) {
        self.live
            .remove_if(&session.application_key, |_, s| s.id == session.id);
    }
}

// ── SessionCoordinator ───────────────────────────────────────────────

pub struct SessionCoordinator {
    application_key: String,
    location_id: Option<LocationId>,
    tokens: Arc<TokenManager>,
    api: Arc<dyn SmartSystemApi>,
    ledger: Arc<SessionLedger>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    current: ArcSwapOption<Session>,
    transition: tokio::sync::Mutex<()>,
    conflicts: AtomicU64,
}

impl SessionCoordinator {
    pub fn new(
        application_key: impl Into<String>,
        location_id: Option<LocationId>,
        tokens: Arc<TokenManager>,
        api: Arc<dyn SmartSystemApi>,
        ledger: Arc<SessionLedger>,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            application_key: application_key.into(),
            location_id,
            tokens,
            api,
            ledger,
            clock,
            shutdown,
            current: ArcSwapOption::const_empty(),
            transition: tokio::sync::Mutex::new(()),
            conflicts: AtomicU64::new(0),
        }
    }

    /// Return the live session, negotiating a new one if there is none.
    ///
    /// Concurrent callers share one negotiation. A prior session for the
    /// same credentials is closed first. Simultaneous-login conflicts are
    /// retried with growing delays.
    pub async fn start_session(&self) -> Result<Arc<Session>, CoreError> {
        if let Some(session) = self.live() {
            return Ok(session);
        }

        let _transition = self.transition.lock().await;
        if let Some(session) = self.live() {
            return Ok(session);
        }
        if self.shutdown.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        if let Some(prior) = self.ledger.take(&self.application_key) {
            warn!(session_id = %prior.id, "Closing prior session for the same credentials");
            prior.terminate(EndReason::Replaced);
            prior.wait_closed().await;
        }

        let mut attempt: u32 = 0;
        let (locations, location) = loop {
            attempt += 1;
            match self.negotiate().await {
                Ok(found) => break found,
                Err(CoreError::Auth(AuthError::SimultaneousLogin {
                    message,
                    retry_after,
                })) if attempt < NEGOTIATION_ATTEMPTS => {
                    self.conflicts.fetch_add(1, Ordering::Relaxed);
                    self.tokens.invalidate();
                    let delay = retry_after + CONFLICT_STEP * attempt;
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %message,
                        "Simultaneous login detected, retrying session"
                    );
                    if !sleep_or_cancel(delay, &self.shutdown).await {
                        return Err(CoreError::Cancelled);
                    }
                }
                Err(e) => return Err(e),
            }
        };

        let session = Arc::new(Session {
            id: Uuid::new_v4(),
            application_key: self.application_key.clone(),
            location,
            locations,
            started_at: self.clock.wall_now(),
            cancel: self.shutdown.child_token(),
            tasks: TaskTracker::new(),
            end_reason: Mutex::new(None),
        });
        self.ledger.register(&session);
        self.current.store(Some(Arc::clone(&session)));

        info!(
            session_id = %session.id,
            location_id = %session.location.id,
            "Session started"
        );
        Ok(session)
    }

    /// Close `session`: stop its tasks, wait for them, revoke the token.
    pub async fn end_session(&self, session: &Session) {
        let _transition = self.transition.lock().await;

        session.terminate(EndReason::Ended);
        session.wait_closed().await;
        self.ledger.remove(session);

        let was_current = self
            .current
            .load()
            .as_ref()
            .is_some_and(|c| c.id == session.id);
        if was_current {
            self.current.store(None);
            self.tokens.revoke().await;
        }
        info!(session_id = %session.id, "Session ended");
    }

    /// Tear down after another client logged in with the same credentials.
    ///
    /// The token is invalidated and the next `start_session` negotiates
    /// from scratch. Callers treat the failure as retryable.
    pub fn handle_simultaneous_login(&self, message: &str) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        warn!(%message, "Simultaneous login reported, tearing down session");
        if let Some(session) = self.current.swap(None) {
            session.terminate(EndReason::Conflict);
            self.ledger.remove(&session);
            debug!(session_id = %session.id, "Session torn down");
        }
        self.tokens.invalidate();
    }

    /// The live session, if any. Never negotiates.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.live()
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Simultaneous-login conflicts seen so far.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn live(&self) -> Option<Arc<Session>> {
        self.current.load_full().filter(|s| s.is_live())
    }

    async fn negotiate(&self) -> Result<(Vec<Location>, Location), CoreError> {
        let token = self.tokens.acquire().await?;
        let resources = match self.api.list_locations(token.secret()).await {
            Ok(found) => found,
            Err(smartgarden_api::Error::Unauthorized) => {
                self.tokens.reject(&token);
                let token = self.tokens.acquire().await?;
                self.api.list_locations(token.secret()).await?
            }
            Err(e) => return Err(e.into()),
        };

        let locations: Vec<Location> = resources.iter().map(convert::location_summary).collect();
        let chosen = match &self.location_id {
            Some(id) => locations
                .iter()
                .find(|l| &l.id == id)
                .cloned()
                .ok_or_else(|| CoreError::LocationNotFound {
                    location_id: id.clone(),
                })?,
            None => locations.first().cloned().ok_or(CoreError::NoLocations)?,
        };
        Ok((locations, chosen))
    }
}

// ── Token lifecycle ──
//
// The token manager is the only writer of the access token. Readers take an
// `Arc<Token>` snapshot from an `ArcSwapOption`; refreshes are single-flight
// behind an async mutex.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use secrecy::SecretString;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::TokenEndpoint;
use crate::clock::Clock;
use crate::error::AuthError;
use crate::retry::{RetryPolicy, sleep_or_cancel};

/// Minimum remaining lifetime before a proactive refresh.
const MIN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

// ── Token ────────────────────────────────────────────────────────────

/// A bearer token snapshot.
#[derive(Clone)]
pub struct Token {
    value: SecretString,
    pub token_type: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
    /// Increments with every exchange; identifies which token a caller used.
    pub serial: u64,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl Token {
    pub fn secret(&self) -> &SecretString {
        &self.value
    }

    pub fn lifetime(&self) -> Duration {
        self.expires_at.saturating_duration_since(self.issued_at)
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime is below 10% of the total or 60 s, whichever is larger.
    pub fn needs_refresh(&self, now: Instant) -> bool {
        let margin = (self.lifetime() / 10).max(MIN_REFRESH_MARGIN);
        self.remaining(now) <= margin
    }
}

// ── TokenManager ─────────────────────────────────────────────────────

/// Owns the client-credentials token: acquisition, proactive refresh,
/// invalidation and revocation.
pub struct TokenManager {
    endpoint: Arc<dyn TokenEndpoint>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    current: ArcSwapOption<Token>,
    refresh_lock: Mutex<()>,
    serial: AtomicU64,
    exchanges: AtomicU64,
    shutdown: CancellationToken,
}

impl TokenManager {
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            endpoint,
            clock,
            policy,
            current: ArcSwapOption::const_empty(),
            refresh_lock: Mutex::new(()),
            serial: AtomicU64::new(0),
            exchanges: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Return a token that is valid and not due for refresh, exchanging
    /// credentials if needed. Concurrent callers share one exchange.
    pub async fn acquire(&self) -> Result<Arc<Token>, AuthError> {
        if let Some(token) = self.fresh() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.fresh() {
            return Ok(token);
        }

        self.refresh_locked().await
    }

    /// Current token snapshot, if any. Never exchanges.
    pub fn current(&self) -> Option<Arc<Token>> {
        self.current.load_full()
    }

    /// Forget the current token; the next `acquire` re-authenticates.
    pub fn invalidate(&self) {
        if self.current.swap(None).is_some() {
            debug!("Access token invalidated");
        }
    }

    /// Forget `token` if it is still the current one.
    ///
    /// Used after a 401: a refresh that already replaced the rejected token
    /// is left in place.
    pub fn reject(&self, token: &Token) {
        let current = self.current.load();
        if current.as_ref().is_some_and(|t| t.serial == token.serial) {
            drop(current);
            self.invalidate();
        }
    }

    /// Revoke and forget the current token. Failures are logged only.
    pub async fn revoke(&self) {
        let Some(token) = self.current.swap(None) else {
            return;
        };
        if token.is_expired(self.clock.now()) {
            return;
        }
        match self.endpoint.revoke(token.secret()).await {
            Ok(()) => info!(serial = token.serial, "Access token revoked"),
            Err(e) => warn!(error = %e, "Failed to revoke access token"),
        }
    }

    /// Number of network exchanges performed so far.
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn fresh(&self) -> Option<Arc<Token>> {
        let now = self.clock.now();
        self.current
            .load_full()
            .filter(|t| !t.is_expired(now) && !t.needs_refresh(now))
    }

    async fn refresh_locked(&self) -> Result<Arc<Token>, AuthError> {
        let mut backoff = self.policy.backoff();

        loop {
            self.exchanges.fetch_add(1, Ordering::Relaxed);
            let err = match self.endpoint.exchange().await {
                Ok(grant) => {
                    let issued_at = self.clock.now();
                    let serial = self.serial.fetch_add(1, Ordering::Relaxed) + 1;
                    let token = Arc::new(Token {
                        value: grant.access_token,
                        token_type: grant.token_type,
                        issued_at,
                        expires_at: issued_at + grant.expires_in,
                        serial,
                    });
                    self.current.store(Some(Arc::clone(&token)));
                    info!(
                        serial,
                        expires_in_secs = grant.expires_in.as_secs(),
                        "Access token issued"
                    );
                    return Ok(token);
                }
                Err(e) => AuthError::from(e),
            };

            if !err.is_retryable() {
                return Err(err);
            }

            // A token that is due for refresh but not expired is still usable.
            if let Some(token) = self
                .current
                .load_full()
                .filter(|t| !t.is_expired(self.clock.now()))
            {
                warn!(error = %err, "Token refresh failed, keeping current token");
                return Ok(token);
            }

            let Some(delay) = backoff.next_delay(err.retry_after()) else {
                return Err(err);
            };
            warn!(
                error = %err,
                attempt = backoff.attempt(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Token exchange failed, retrying"
            );
            if !sleep_or_cancel(delay, &self.shutdown).await {
                return Err(err);
            }
        }
    }
}

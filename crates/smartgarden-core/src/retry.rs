// ── Exponential backoff ──
//
// One policy type shared by token refresh, channel reconnect and command
// retry. Each call site owns its own `Backoff` counter.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Exponential backoff with deterministic jitter and a hard cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any computed delay.
    pub max_delay: Duration,
    /// Maximum number of retries (`None` = unlimited).
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::reconnect()
    }
}

impl RetryPolicy {
    /// Push channel reconnects: 5 s base, 15 min cap, retry forever.
    pub const fn reconnect() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(900),
            max_retries: None,
        }
    }

    /// Token exchange after transient failures.
    pub const fn token() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(900),
            max_retries: Some(5),
        }
    }

    /// Outbound command calls.
    pub const fn command() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(900),
            max_retries: Some(3),
        }
    }

    /// Computed delay for a zero-based retry attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.min(30)).unwrap_or(30);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exp);

        // Deterministic jitter seeded from the attempt number.
        let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
        let with_jitter = (base * jitter_factor)
            .max(0.0)
            .min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(with_jitter)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(*self)
    }
}

/// Attempt counter for one retry site.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Retries consumed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    ///
    /// An upstream `hint` (retry-after) is used as-is instead of the
    /// computed delay.
    pub fn next_delay(&mut self, hint: Option<Duration>) -> Option<Duration> {
        if self
            .policy
            .max_retries
            .is_some_and(|max| self.attempt >= max)
        {
            return None;
        }
        let computed = self.policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(hint.unwrap_or(computed))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancel.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn first_delay_is_initial() {
        assert_eq!(RetryPolicy::reconnect().delay_for(0), Duration::from_secs(5));
    }

    #[test]
    fn delays_grow_then_cap() {
        let policy = RetryPolicy::reconnect();
        let delays: Vec<Duration> = (0..7).map(|a| policy.delay_for(a)).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] > pair[0], "{pair:?} not increasing");
        }
        for attempt in 0..64 {
            assert!(policy.delay_for(attempt) <= Duration::from_secs(900));
        }
        assert_eq!(policy.delay_for(40), Duration::from_secs(900));
    }

    #[test]
    fn hint_overrides_computed_delay() {
        let mut backoff = RetryPolicy::command().backoff();
        let hint = Duration::from_secs(42);
        assert_eq!(backoff.next_delay(Some(hint)), Some(hint));
        assert_eq!(backoff.attempt(), 1);
    }

    #[test]
    fn bounded_policy_exhausts() {
        let mut backoff = RetryPolicy::command().backoff();
        assert!(backoff.next_delay(None).is_some());
        assert!(backoff.next_delay(None).is_some());
        assert!(backoff.next_delay(None).is_some());
        assert_eq!(backoff.next_delay(None), None);

        backoff.reset();
        assert_eq!(backoff.next_delay(None), Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_cancellable() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            child.cancel();
        });

        let start = tokio::time::Instant::now();
        assert!(!sleep_or_cancel(Duration::from_secs(900), &cancel).await);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}

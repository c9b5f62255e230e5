use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::model::{DeviceUpdate, ServiceId};

/// Protects an optimistic command effect from contradicting push updates.
///
/// While active, deltas for the guarded service that report the opposite
/// activity are buffered instead of applied. On expiry the buffer is
/// replayed in arrival order; a confirming delta clears the guard and
/// drops the buffer.
#[derive(Debug, Clone)]
pub struct PendingGuard {
    pub id: u64,
    pub service_id: ServiceId,
    /// Activity class the command is expected to produce.
    pub expected_active: bool,
    pub initiated_at: Instant,
    pub window: Duration,
    pub(crate) buffered: Vec<DeviceUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardVerdict {
    /// Other service, or no activity and nothing queued.
    Unrelated,
    Confirms,
    Contradicts,
    /// No activity, but an earlier delta for the service is buffered.
    QueueBehind,
}

impl PendingGuard {
    pub fn expires_at(&self) -> Instant {
        self.initiated_at + self.window
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }

    pub(crate) fn verdict(&self, update: &DeviceUpdate) -> GuardVerdict {
        if update.service_id != self.service_id {
            return GuardVerdict::Unrelated;
        }
        match update.patch.activity_active() {
            Some(active) if active == self.expected_active => GuardVerdict::Confirms,
            Some(_) => GuardVerdict::Contradicts,
            None if !self.buffered.is_empty() => GuardVerdict::QueueBehind,
            None => GuardVerdict::Unrelated,
        }
    }

    pub fn status(&self) -> GuardStatus {
        GuardStatus {
            guard_id: self.id,
            service_id: self.service_id.clone(),
            expected_active: self.expected_active,
            window_ms: u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX),
            buffered: self.buffered.len(),
        }
    }
}

/// Read-only view of an active guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardStatus {
    pub guard_id: u64,
    pub service_id: ServiceId,
    pub expected_active: bool,
    pub window_ms: u64,
    pub buffered: usize,
}

// ── Per-device subscriptions ──
//
// Subscribers are tagged by delivery mechanism. Notification happens outside
// every registry lock, in registration order, and a panicking subscriber is
// contained so the rest still hear about the change.
//
// Each device has a delivery lane. Only one caller drains a lane at a time
// and it always delivers the newest pending revision, so subscribers never
// see a device go back to an older state. Revisions that arrive while a
// delivery is running are coalesced.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::model::{Device, DeviceId};

/// Implemented by long-lived consumers that want device updates without
/// being kept alive by the registry.
pub trait DeviceObserver: Send + Sync {
    fn device_updated(&self, device: &Device);
}

pub type DeviceCallback = Arc<dyn Fn(&Device) + Send + Sync>;

/// How a subscriber receives updates.
#[derive(Clone)]
pub enum Subscriber {
    /// Invoked synchronously with the new state.
    Callback(DeviceCallback),
    /// Sent the new state; removed once the receiver is dropped.
    Channel(mpsc::UnboundedSender<Arc<Device>>),
    /// Weakly held; removed once the observer is dropped.
    Observer(Weak<dyn DeviceObserver>),
}

/// Returned by `subscribe`; pass to `unsubscribe` to stop notifications.
/// Dropping the handle does not unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    device_id: DeviceId,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }
}

/// Outcome of notifying one device's subscribers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NotifyReport {
    pub delivered: usize,
    pub failed: usize,
    pub pruned: usize,
}

#[derive(Default)]
struct Lane {
    delivered: u64,
    pending: Option<(u64, Arc<Device>)>,
    draining: bool,
}

#[derive(Default)]
pub(crate) struct SubscriberTable {
    next_id: AtomicU64,
    by_device: DashMap<DeviceId, Vec<(u64, Subscriber)>>,
    lanes: DashMap<DeviceId, Arc<Mutex<Lane>>>,
}

fn lock_lane(lane: &Mutex<Lane>) -> MutexGuard<'_, Lane> {
    lane.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SubscriberTable {
    pub(crate) fn add(&self, device_id: DeviceId, subscriber: Subscriber) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.by_device
            .entry(device_id.clone())
            .or_default()
            .push((id, subscriber));
        SubscriptionHandle { id, device_id }
    }

    pub(crate) fn remove(&self, handle: &SubscriptionHandle) -> bool {
        let Some(mut subs) = self.by_device.get_mut(&handle.device_id) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|(id, _)| *id != handle.id);
        let removed = subs.len() != before;
        let empty = subs.is_empty();
        drop(subs);
        if empty {
            self.by_device.remove_if(&handle.device_id, |_, v| v.is_empty());
        }
        removed
    }

    pub(crate) fn count(&self, device_id: &DeviceId) -> usize {
        self.by_device.get(device_id).map_or(0, |s| s.len())
    }

    /// Deliver revision `revision` of `device` to every subscriber of its
    /// id, unless a newer revision was already delivered or is queued.
    pub(crate) fn notify(&self, device: &Arc<Device>, revision: u64) -> NotifyReport {
        if self.count(&device.id) == 0 {
            return NotifyReport::default();
        }
        let lane = Arc::clone(self.lanes.entry(device.id.clone()).or_default().value());
        {
            let mut l = lock_lane(&lane);
            let queued = l.pending.as_ref().map_or(0, |(r, _)| *r);
            if revision <= l.delivered.max(queued) {
                return NotifyReport::default();
            }
            l.pending = Some((revision, Arc::clone(device)));
            if l.draining {
                return NotifyReport::default();
            }
            l.draining = true;
        }

        let mut report = NotifyReport::default();
        loop {
            let next = {
                let mut l = lock_lane(&lane);
                let next = l.pending.take();
                match &next {
                    Some((r, _)) => l.delivered = *r,
                    None => l.draining = false,
                }
                next
            };
            let Some((_, latest)) = next else {
                return report;
            };
            let one = self.deliver_all(&latest);
            report.delivered += one.delivered;
            report.failed += one.failed;
            report.pruned += one.pruned;
        }
    }

    fn deliver_all(&self, device: &Arc<Device>) -> NotifyReport {
        // Clone the list so no map lock is held while user code runs.
        let subs: Vec<(u64, Subscriber)> = match self.by_device.get(&device.id) {
            Some(list) => list.clone(),
            None => return NotifyReport::default(),
        };

        let mut report = NotifyReport::default();
        let mut dead = Vec::new();

        for (id, subscriber) in subs {
            let outcome = catch_unwind(AssertUnwindSafe(|| deliver(&subscriber, device)));
            match outcome {
                Ok(true) => report.delivered += 1,
                Ok(false) => dead.push(id),
                Err(_) => {
                    report.failed += 1;
                    warn!(device_id = %device.id, subscription = id, "Device subscriber panicked");
                }
            }
        }

        if !dead.is_empty() {
            report.pruned = dead.len();
            if let Some(mut list) = self.by_device.get_mut(&device.id) {
                list.retain(|(id, _)| !dead.contains(id));
            }
        }
        report
    }
}

/// Returns `false` if the subscriber is gone.
fn deliver(subscriber: &Subscriber, device: &Arc<Device>) -> bool {
    match subscriber {
        Subscriber::Callback(f) => {
            f(device);
            true
        }
        Subscriber::Channel(tx) => tx.send(Arc::clone(device)).is_ok(),
        Subscriber::Observer(weak) => match weak.upgrade() {
            Some(observer) => {
                observer.device_updated(device);
                true
            }
            None => false,
        },
    }
}

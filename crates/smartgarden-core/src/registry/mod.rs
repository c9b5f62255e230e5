// ── Device registry ──
//
// Authoritative in-memory state for every device of every location.
// Each device lives in its own mutex-protected slot inside a `DashMap`, so
// the push loop, command callers and snapshot refreshes only contend on the
// same device. Every change gets a registry-wide revision while its slot is
// locked. A `watch` channel carries a sorted snapshot of all devices;
// building and sending it is serialized so the newest list always wins.

mod guard;
mod query;
mod subscription;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::debug;

pub use guard::{GuardStatus, PendingGuard};
pub use query::{DeviceIter, DeviceQuery};
pub use subscription::{DeviceCallback, DeviceObserver, Subscriber, SubscriptionHandle};

use self::guard::GuardVerdict;
use self::subscription::SubscriberTable;
use crate::clock::Clock;
use crate::error::StateError;
use crate::model::{
    Device, DeviceId, DeviceKind, DeviceUpdate, Location, LocationId, LocationState, ServiceId,
    ServicePatch,
};
use crate::stream::DeviceStream;

/// What `apply_delta` did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Merged into the device.
    Applied,
    /// Held back by an active guard; replayed when the guard expires.
    Buffered,
    /// Merged, and it confirmed a pending command so the guard was cleared.
    Confirmed,
}

/// Counters for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub applied: u64,
    pub stale: u64,
    pub buffered: u64,
    pub unknown: u64,
    pub snapshots: u64,
    pub subscriber_failures: u64,
}

#[derive(Default)]
struct Counters {
    applied: AtomicU64,
    stale: AtomicU64,
    buffered: AtomicU64,
    unknown: AtomicU64,
    snapshots: AtomicU64,
    subscriber_failures: AtomicU64,
}

pub(crate) struct DeviceSlot {
    pub(crate) device: Arc<Device>,
    guard: Option<PendingGuard>,
}

pub(crate) fn lock_slot(slot: &Mutex<DeviceSlot>) -> MutexGuard<'_, DeviceSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

type Snapshot = Arc<Vec<Arc<Device>>>;

pub struct DeviceRegistry {
    clock: Arc<dyn Clock>,
    devices: DashMap<DeviceId, Arc<Mutex<DeviceSlot>>>,
    locations: DashMap<LocationId, Location>,
    subscribers: SubscriberTable,
    snapshot: watch::Sender<Snapshot>,
    publishing: Mutex<()>,
    revision: AtomicU64,
    guard_seq: AtomicU64,
    counters: Counters,
}

impl DeviceRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            clock,
            devices: DashMap::new(),
            locations: DashMap::new(),
            subscribers: SubscriberTable::default(),
            snapshot,
            publishing: Mutex::new(()),
            revision: AtomicU64::new(0),
            guard_seq: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    // ── Snapshots ────────────────────────────────────────────────────

    /// Replace a location's full device set.
    ///
    /// Devices missing from `state` are removed, pending guards of the
    /// location are dropped, and every device in `state` is announced.
    pub fn apply_snapshot(&self, state: LocationState) -> usize {
        let location = state.location();
        let location_id = state.id;
        let mut touched = Vec::with_capacity(state.devices.len());

        for device in state.devices {
            let device = Arc::new(device);
            let slot = Arc::clone(
                self.devices
                    .entry(device.id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(DeviceSlot::new(Arc::clone(&device)))))
                    .value(),
            );
            let mut s = lock_slot(&slot);
            if let Some(guard) = s.guard.take() {
                debug!(device_id = %device.id, guard_id = guard.id, "Snapshot cleared pending guard");
            }
            s.device = Arc::clone(&device);
            let revision = self.next_revision();
            drop(s);
            touched.push((device, revision));
        }

        let keep: &BTreeSet<DeviceId> = &location.device_ids;
        self.devices.retain(|id, slot| {
            lock_slot(slot).device.location_id != location_id || keep.contains(id)
        });
        self.locations.insert(location_id.clone(), location);
        self.counters.snapshots.fetch_add(1, Ordering::Relaxed);

        debug!(location_id = %location_id, devices = touched.len(), "Snapshot applied");
        self.publish();
        for (device, revision) in &touched {
            self.notify(device, *revision);
        }
        touched.len()
    }

    /// Update a location's display name (LOCATION push messages).
    pub fn rename_location(&self, location_id: &LocationId, name: &str) -> bool {
        match self.locations.get_mut(location_id) {
            Some(mut loc) => {
                loc.name = name.to_owned();
                true
            }
            None => false,
        }
    }

    // ── Deltas ───────────────────────────────────────────────────────

    /// Merge a partial update into its device.
    ///
    /// Updates whose marker is not newer than the last one applied to the
    /// same service are discarded as stale. An expired guard is resolved
    /// before the update is looked at.
    pub fn apply_delta(&self, update: DeviceUpdate) -> Result<DeltaOutcome, StateError> {
        let Some(slot) = self.slot(&update.device_id) else {
            self.counters.unknown.fetch_add(1, Ordering::Relaxed);
            return Err(StateError::UnknownDevice {
                device_id: update.device_id,
            });
        };
        let now = self.clock.now();

        let mut s = lock_slot(&slot);
        let mut changed = false;
        if s.guard.as_ref().is_some_and(|g| g.is_expired(now)) {
            changed |= self.flush_guard(&mut s);
        }

        let verdict = s
            .guard
            .as_ref()
            .map_or(GuardVerdict::Unrelated, |g| g.verdict(&update));

        let result = match verdict {
            GuardVerdict::Contradicts | GuardVerdict::QueueBehind => {
                self.check_fresh(&s.device, &update).map(|()| {
                    debug!(
                        device_id = %update.device_id,
                        service_id = %update.service_id,
                        "Buffering update behind pending command"
                    );
                    if let Some(guard) = s.guard.as_mut() {
                        guard.buffered.push(update);
                    }
                    self.counters.buffered.fetch_add(1, Ordering::Relaxed);
                    DeltaOutcome::Buffered
                })
            }
            GuardVerdict::Confirms => self.merge(&mut s, &update).map(|()| {
                // Buffered deltas newer than the confirmation still apply;
                // older ones fail the freshness check.
                if let Some(guard) = s.guard.take() {
                    debug!(
                        device_id = %update.device_id,
                        guard_id = guard.id,
                        buffered = guard.buffered.len(),
                        "Pending command confirmed"
                    );
                    self.replay(&mut s, guard.buffered);
                }
                DeltaOutcome::Confirmed
            }),
            GuardVerdict::Unrelated => self.merge(&mut s, &update).map(|()| DeltaOutcome::Applied),
        };

        changed |= matches!(result, Ok(DeltaOutcome::Applied | DeltaOutcome::Confirmed));
        if changed {
            let device = Arc::clone(&s.device);
            let revision = self.next_revision();
            drop(s);
            self.publish();
            self.notify(&device, revision);
        }
        result
    }

    // ── Optimistic updates & guards ──────────────────────────────────

    /// Apply a command's expected effect ahead of confirmation.
    ///
    /// Does not advance freshness markers. With `expected_active` set, a
    /// guard is installed for `window`, replacing any earlier guard on the
    /// device. Returns the new guard id.
    pub fn apply_optimistic(
        &self,
        device_id: &DeviceId,
        service_id: &ServiceId,
        patch: &ServicePatch,
        expected_active: Option<bool>,
        window: Duration,
    ) -> Result<Option<u64>, StateError> {
        let slot = self.slot(device_id).ok_or_else(|| StateError::UnknownDevice {
            device_id: device_id.clone(),
        })?;

        let mut s = lock_slot(&slot);
        let mut device = (*s.device).clone();
        if !patch.apply_to(service_id, &mut device) {
            return Err(StateError::UnsupportedService {
                device_id: device_id.clone(),
                service_id: service_id.clone(),
            });
        }
        s.device = Arc::new(device);

        let guard_id = expected_active.map(|expected| {
            let id = self.guard_seq.fetch_add(1, Ordering::Relaxed) + 1;
            let previous = s.guard.replace(PendingGuard {
                id,
                service_id: service_id.clone(),
                expected_active: expected,
                initiated_at: self.clock.now(),
                window,
                buffered: Vec::new(),
            });
            if let Some(prev) = previous {
                debug!(device_id = %device_id, guard_id = prev.id, "Replaced pending guard");
            }
            id
        });

        let device = Arc::clone(&s.device);
        let revision = self.next_revision();
        drop(s);
        self.publish();
        self.notify(&device, revision);
        Ok(guard_id)
    }

    /// Resolve a guard once its window has passed. Returns `false` if the
    /// guard is gone, was replaced, or has not expired yet.
    pub fn expire_guard(&self, device_id: &DeviceId, guard_id: u64) -> bool {
        let Some(slot) = self.slot(device_id) else {
            return false;
        };
        self.expire_slot(&slot, Some(guard_id))
    }

    /// Resolve every expired guard. Returns the number resolved.
    pub fn sweep_expired(&self) -> usize {
        let slots: Vec<_> = self.devices.iter().map(|e| Arc::clone(e.value())).collect();
        slots
            .iter()
            .filter(|slot| self.expire_slot(slot, None))
            .count()
    }

    pub fn pending_guard(&self, device_id: &DeviceId) -> Option<GuardStatus> {
        let slot = self.slot(device_id)?;
        let s = lock_slot(&slot);
        s.guard.as_ref().map(PendingGuard::status)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn get(&self, device_id: &DeviceId) -> Option<Arc<Device>> {
        self.slot(device_id).map(|slot| Arc::clone(&lock_slot(&slot).device))
    }

    /// All devices, sorted by id.
    pub fn devices(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn locations(&self) -> Vec<Location> {
        let mut all: Vec<Location> = self.locations.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Devices of one type. See [`DeviceQuery`].
    pub fn find_by_type(&self, kind: DeviceKind) -> DeviceQuery {
        let mut members: Vec<(DeviceId, Arc<Mutex<DeviceSlot>>)> = self
            .devices
            .iter()
            .filter(|e| lock_slot(e.value()).device.kind == kind)
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        members.sort_by(|a, b| a.0.cmp(&b.0));
        DeviceQuery::new(kind, members.into_iter().map(|(_, slot)| slot).collect())
    }

    /// Reactive view of all devices.
    pub fn stream(&self) -> DeviceStream {
        DeviceStream::new(self.snapshot.subscribe())
    }

    pub fn stats(&self) -> RegistryStats {
        let c = &self.counters;
        RegistryStats {
            applied: c.applied.load(Ordering::Relaxed),
            stale: c.stale.load(Ordering::Relaxed),
            buffered: c.buffered.load(Ordering::Relaxed),
            unknown: c.unknown.load(Ordering::Relaxed),
            snapshots: c.snapshots.load(Ordering::Relaxed),
            subscriber_failures: c.subscriber_failures.load(Ordering::Relaxed),
        }
    }

    /// Drop all state (teardown).
    pub fn clear(&self) {
        self.devices.clear();
        self.locations.clear();
        self.publish();
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Call `handler` with the new state whenever `device_id` changes.
    pub fn subscribe<F>(&self, device_id: &DeviceId, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Device) + Send + Sync + 'static,
    {
        self.subscribers
            .add(device_id.clone(), Subscriber::Callback(Arc::new(handler)))
    }

    /// Receive the new state over a channel. The subscription ends when the
    /// receiver is dropped.
    pub fn subscribe_channel(
        &self,
        device_id: &DeviceId,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Arc<Device>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribers.add(device_id.clone(), Subscriber::Channel(tx));
        (handle, rx)
    }

    /// Notify `observer` without keeping it alive.
    pub fn subscribe_observer<O>(&self, device_id: &DeviceId, observer: &Arc<O>) -> SubscriptionHandle
    where
        O: DeviceObserver + 'static,
    {
        let observer: Arc<dyn DeviceObserver> = Arc::clone(observer) as Arc<dyn DeviceObserver>;
        self.subscribers
            .add(device_id.clone(), Subscriber::Observer(Arc::downgrade(&observer)))
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.subscribers.remove(handle)
    }

    pub fn subscriber_count(&self, device_id: &DeviceId) -> usize {
        self.subscribers.count(device_id)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn slot(&self, device_id: &DeviceId) -> Option<Arc<Mutex<DeviceSlot>>> {
        self.devices.get(device_id).map(|r| Arc::clone(r.value()))
    }

    fn check_fresh(&self, device: &Device, update: &DeviceUpdate) -> Result<(), StateError> {
        match device.marker_for(&update.service_id) {
            Some(current) if !update.marker.is_newer_than(&current) => {
                self.counters.stale.fetch_add(1, Ordering::Relaxed);
                debug!(
                    device_id = %update.device_id,
                    service_id = %update.service_id,
                    seq = update.marker.seq,
                    "Discarding stale update"
                );
                Err(StateError::StaleUpdate {
                    device_id: update.device_id.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn merge(&self, slot: &mut DeviceSlot, update: &DeviceUpdate) -> Result<(), StateError> {
        self.check_fresh(&slot.device, update)?;
        let mut device = (*slot.device).clone();
        if !update.patch.apply_to(&update.service_id, &mut device) {
            return Err(StateError::UnsupportedService {
                device_id: update.device_id.clone(),
                service_id: update.service_id.clone(),
            });
        }
        device.record_marker(update.service_id.clone(), update.marker);
        slot.device = Arc::new(device);
        self.counters.applied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove the guard and replay its buffer. Returns whether state changed.
    fn flush_guard(&self, slot: &mut DeviceSlot) -> bool {
        let Some(guard) = slot.guard.take() else {
            return false;
        };
        debug!(
            device_id = %slot.device.id,
            guard_id = guard.id,
            buffered = guard.buffered.len(),
            "Pending guard expired"
        );
        self.replay(slot, guard.buffered)
    }

    /// Merge buffered updates in arrival order, dropping stale ones.
    fn replay(&self, slot: &mut DeviceSlot, buffered: Vec<DeviceUpdate>) -> bool {
        let mut changed = false;
        for update in buffered {
            match self.merge(slot, &update) {
                Ok(()) => changed = true,
                Err(e) => debug!(error = %e, "Dropping buffered update"),
            }
        }
        changed
    }

    fn expire_slot(&self, slot: &Mutex<DeviceSlot>, guard_id: Option<u64>) -> bool {
        let now = self.clock.now();
        let mut s = lock_slot(slot);
        let due = s
            .guard
            .as_ref()
            .is_some_and(|g| g.is_expired(now) && guard_id.is_none_or(|id| id == g.id));
        if !due {
            return false;
        }
        if self.flush_guard(&mut s) {
            let device = Arc::clone(&s.device);
            let revision = self.next_revision();
            drop(s);
            self.publish();
            self.notify(&device, revision);
        }
        true
    }

    /// Revision for a change. Call with the device's slot locked so
    /// revisions of one device follow the order of its changes.
    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn publish(&self) {
        // Held while building and sending, so a list read before another
        // writer's change can never replace the list that includes it.
        let _publishing = self.publishing.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Arc<Device>> = self
            .devices
            .iter()
            .map(|e| Arc::clone(&lock_slot(e.value()).device))
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(all));
    }

    fn notify(&self, device: &Arc<Device>, revision: u64) {
        let report = self.subscribers.notify(device, revision);
        if report.failed > 0 {
            self.counters
                .subscriber_failures
                .fetch_add(u64::try_from(report.failed).unwrap_or(u64::MAX), Ordering::Relaxed);
        }
    }
}

impl DeviceSlot {
    fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            guard: None,
        }
    }
}

// ── Reactive device streams ──
//
// Snapshot subscriptions over the device registry.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::{Device, DeviceKind, LocationId};

pub type DeviceSnapshot = Arc<Vec<Arc<Device>>>;

/// A subscription to the full device set.
///
/// `current()` is the snapshot seen last; `changed()` waits for the next
/// mutation. Convert with `into_stream()` for `StreamExt` combinators.
pub struct DeviceStream {
    current: DeviceSnapshot,
    receiver: watch::Receiver<DeviceSnapshot>,
}

impl DeviceStream {
    pub(crate) fn new(receiver: watch::Receiver<DeviceSnapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    pub fn current(&self) -> &DeviceSnapshot {
        &self.current
    }

    /// Latest snapshot, which may be newer than `current()`.
    pub fn latest(&self) -> DeviceSnapshot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. `None` once the registry is gone.
    pub async fn changed(&mut self) -> Option<DeviceSnapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    pub fn into_stream(self) -> DeviceWatchStream {
        DeviceWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` of device snapshots, one per registry mutation.
pub struct DeviceWatchStream {
    inner: WatchStream<DeviceSnapshot>,
}

impl Stream for DeviceWatchStream {
    type Item = DeviceSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Predicate for narrowing snapshots without another registry query.
pub enum DeviceFilter {
    All,
    ByKind(DeviceKind),
    ByLocation(LocationId),
    /// Devices with at least one running service.
    Active,
    Custom(Box<dyn Fn(&Device) -> bool + Send + Sync>),
}

impl DeviceFilter {
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            Self::All => true,
            Self::ByKind(kind) => device.kind == *kind,
            Self::ByLocation(id) => device.location_id == *id,
            Self::Active => device.has_active_service(),
            Self::Custom(f) => f(device),
        }
    }

    pub fn apply(&self, snapshot: &DeviceSnapshot) -> Vec<Arc<Device>> {
        snapshot
            .iter()
            .filter(|d| self.matches(d))
            .cloned()
            .collect()
    }
}

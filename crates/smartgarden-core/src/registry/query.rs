use std::sync::{Arc, Mutex};

use super::{DeviceSlot, lock_slot};
use crate::model::{Device, DeviceKind};

/// Devices of one type, as returned by
/// [`DeviceRegistry::find_by_type`](super::DeviceRegistry::find_by_type).
///
/// Membership is fixed when the query is created. Iteration is lazy: each
/// step reads the member's state at that moment, and the query can be
/// iterated any number of times.
pub struct DeviceQuery {
    kind: DeviceKind,
    members: Vec<Arc<Mutex<DeviceSlot>>>,
}

impl DeviceQuery {
    pub(crate) fn new(kind: DeviceKind, members: Vec<Arc<Mutex<DeviceSlot>>>) -> Self {
        Self { kind, members }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> DeviceIter<'_> {
        DeviceIter {
            inner: self.members.iter(),
        }
    }
}

pub struct DeviceIter<'a> {
    inner: std::slice::Iter<'a, Arc<Mutex<DeviceSlot>>>,
}

impl Iterator for DeviceIter<'_> {
    type Item = Arc<Device>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|slot| Arc::clone(&lock_slot(slot).device))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for DeviceIter<'_> {}

impl<'a> IntoIterator for &'a DeviceQuery {
    type Item = Arc<Device>;
    type IntoIter = DeviceIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

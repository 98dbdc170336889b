//! Per-entity change notification
//!
//! A [`Signal`] is an ordered list of subscriber callbacks owned by the
//! entity that emits it. Emission is synchronous, in registration order.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies one connected callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

type Slot<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Synchronous observer list
pub struct Signal<T> {
    slots: Mutex<Vec<(SlotId, Slot<T>)>>,
    next_id: AtomicU64,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Connect a callback, returning the id needed to disconnect it
    pub fn connect<F>(&self, callback: F) -> SlotId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SlotId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if it was not connected.
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|(slot_id, _)| *slot_id != id);
        slots.len() != before
    }

    pub fn is_connected(&self, id: SlotId) -> bool {
        self.slots.lock().iter().any(|(slot_id, _)| *slot_id == id)
    }

    /// Number of connected callbacks
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Invoke every connected callback with `value`
    ///
    /// The slot list is snapshotted first: callbacks may connect or
    /// disconnect without deadlocking, and changes apply from the next emit.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Slot<T>> = self
            .slots
            .lock()
            .iter()
            .map(|(_, slot)| Arc::clone(slot))
            .collect();

        for slot in snapshot {
            slot(value);
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").field("slots", &self.len()).finish()
    }
}

//! Callback registry
//!
//! Correlates asynchronous requests with their eventual replies. Each pending
//! handler lives in a slot whose index is the callback identifier sent over
//! the wire. Freed slots are reused lowest-first and the slot array is trimmed
//! whenever its tail becomes empty.

use std::sync::{Mutex, MutexGuard};

/// Identifier correlating a request to its asynchronous reply
pub type CallbackId = usize;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("callback {0} is not registered")]
    NotRegistered(CallbackId),
}

/// Slot arena with a "lowest known free" cursor.
///
/// Not synchronized; see [`CallbackRegistry`] for the shared version.
#[derive(Debug)]
pub struct CallbackSlots<H> {
    slots: Vec<Option<H>>,
    /// Every slot below this index is occupied
    free: usize,
}

impl<H> CallbackSlots<H> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: 0,
        }
    }

    /// Store a handler in the lowest free slot and return its identifier
    pub fn register(&mut self, handler: H) -> CallbackId {
        let id = self.free;

        if id == self.slots.len() {
            self.slots.push(Some(handler));
            self.free = self.slots.len();
            return id;
        }

        self.slots[id] = Some(handler);

        // Lazily advance the cursor to the next hole
        let mut next = id + 1;
        while next < self.slots.len() && self.slots[next].is_some() {
            next += 1;
        }
        self.free = next;

        id
    }

    /// Remove and return the handler registered under `id`
    pub fn release(&mut self, id: CallbackId) -> Result<H, RegistryError> {
        let handler = self
            .slots
            .get_mut(id)
            .and_then(Option::take)
            .ok_or(RegistryError::NotRegistered(id))?;

        if id < self.free {
            self.free = id;
        }
        self.trim();

        Ok(handler)
    }

    pub fn contains(&self, id: CallbackId) -> bool {
        matches!(self.slots.get(id), Some(Some(_)))
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of the underlying slot array, holes included
    pub fn capacity_in_use(&self) -> usize {
        self.slots.len()
    }

    fn trim(&mut self) {
        let live = self
            .slots
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |last| last + 1);

        if live < self.slots.len() {
            self.slots.truncate(live);
            self.free = self.free.min(live);
        }
    }
}

impl<H> Default for CallbackSlots<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe callback registry.
///
/// Each operation is a single critical section over the slot array and its
/// free cursor. The lock is never held while a handler runs.
#[derive(Debug)]
pub struct CallbackRegistry<H> {
    inner: Mutex<CallbackSlots<H>>,
}

impl<H> CallbackRegistry<H> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CallbackSlots::new()),
        }
    }

    pub fn register(&self, handler: H) -> CallbackId {
        self.slots().register(handler)
    }

    pub fn release(&self, id: CallbackId) -> Result<H, RegistryError> {
        self.slots().release(id)
    }

    pub fn contains(&self, id: CallbackId) -> bool {
        self.slots().contains(id)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    pub fn capacity_in_use(&self) -> usize {
        self.slots().capacity_in_use()
    }

    fn slots(&self) -> MutexGuard<'_, CallbackSlots<H>> {
        // Slot bookkeeping stays consistent even if a holder panicked
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<H> Default for CallbackRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

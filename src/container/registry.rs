//! Independently locked listener registries.
//!
//! A container keeps secondary indexes over its children (scene builders,
//! per-frame update listeners) and over external data-changed listeners.
//! Each registry owns its own mutex so that iterating one for callback
//! dispatch never holds the container's primary lock; a callback that
//! re-enters the container to add or remove a sibling must not deadlock.
//!
//! Order of entries is insertion order and is preserved across dispatch.
//! Duplicates are allowed and independently removable: `remove` drops the
//! first pointer-equal occurrence only.

use std::sync::{Arc, Mutex};

pub(crate) struct Registry<T: ?Sized> {
    entries: Mutex<Vec<Arc<T>>>,
}

impl<T: ?Sized> Registry<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Append an entry.
    pub(crate) fn add(&self, entry: Arc<T>) {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .push(entry);
    }

    /// Remove the first pointer-equal occurrence, if any.
    pub(crate) fn remove(&self, entry: &Arc<T>) {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        if let Some(pos) = entries.iter().position(|e| Arc::ptr_eq(e, entry)) {
            entries.remove(pos);
        }
    }

    /// Remove everything.
    pub(crate) fn clear(&self) {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .clear();
    }

    /// Number of entries.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("registry lock poisoned").len()
    }

    /// Snapshot of the entries in order.
    ///
    /// Dispatch iterates the snapshot, so the registry lock is released
    /// before any callback runs.
    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.lock().expect("registry lock poisoned").clone()
    }
}

//! Viewer registry: the live set of connections eligible for broadcast.
//!
//! The registry is an explicit value (cheaply cloneable, `Arc` inside) that
//! the server hands to the broadcaster and to every connection handler.  It is
//! never a global.
//!
//! # Locking
//!
//! A `std::sync::Mutex` guards the map.  Every critical section is a single
//! map operation and never spans an `.await`, so the lock is uncontended in
//! practice and safe to take from `Drop`.  That last property is what makes
//! [`Registration`] work: removal happens synchronously when the guard is
//! dropped, whether the handler returned, failed, panicked, or was aborted.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Default number of payloads buffered per viewer before it counts as lagging.
pub const DEFAULT_VIEWER_BUFFER: usize = 256;

/// Opaque identity of one viewer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(Uuid);

impl ViewerId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ViewerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first UUID group is plenty to tell viewers apart in logs.
        let full = self.0.to_string();
        f.write_str(&full[..8])
    }
}

/// Why a payload could not be queued for a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ViewerSendError {
    /// The viewer's outbound buffer is full; it is not keeping up.
    #[error("viewer outbound buffer is full")]
    Lagging,

    /// The viewer's writer has gone away; the handler is tearing it down.
    #[error("viewer connection is closed")]
    Closed,
}

// ── Viewer handle ─────────────────────────────────────────────────────────────

/// The broadcaster's view of one connection: an id plus a send capability.
///
/// Cloning a handle shares the same outbound channel.  The socket itself stays
/// with the connection handler, which drains the matching receiver.
#[derive(Debug, Clone)]
pub struct ViewerHandle {
    id: ViewerId,
    label: Arc<str>,
    tx: mpsc::Sender<Arc<str>>,
}

impl ViewerHandle {
    /// Creates a handle and the receiver its connection handler must drain.
    ///
    /// `label` is only used in log messages (typically the peer address).
    pub fn channel(
        label: impl Into<Arc<str>>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ViewerId::new(),
            label: label.into(),
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queues `payload` for this viewer without waiting.
    ///
    /// # Errors
    ///
    /// [`ViewerSendError::Lagging`] if the buffer is full,
    /// [`ViewerSendError::Closed`] if the handler dropped its receiver.
    pub fn try_deliver(&self, payload: Arc<str>) -> Result<(), ViewerSendError> {
        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => ViewerSendError::Lagging,
            TrySendError::Closed(_) => ViewerSendError::Closed,
        })
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Concurrency-safe set of registered viewers.
#[derive(Debug, Clone, Default)]
pub struct ViewerRegistry {
    inner: Arc<Mutex<HashMap<ViewerId, ViewerHandle>>>,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the map, recovering from a poisoned lock.
    ///
    /// A panic while holding the lock can only interrupt a single `HashMap`
    /// call, which leaves the map structurally valid.
    fn lock(&self) -> MutexGuard<'_, HashMap<ViewerId, ViewerHandle>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Adds `handle`.  Returns `false` (and keeps the existing entry) if a
    /// viewer with the same id is already registered.
    pub fn add(&self, handle: ViewerHandle) -> bool {
        let mut map = self.lock();
        if map.contains_key(&handle.id) {
            return false;
        }
        map.insert(handle.id, handle);
        true
    }

    /// Removes the viewer with `id`.  Returns `false` if it was not present,
    /// so a second removal from a racing teardown path is a no-op.
    pub fn remove(&self, id: ViewerId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Point-in-time copy of every registered viewer, in no particular order.
    pub fn snapshot(&self) -> Vec<ViewerHandle> {
        self.lock().values().cloned().collect()
    }

    /// Adds `handle` and returns a guard that removes it again on drop.
    pub fn register(&self, handle: ViewerHandle) -> Registration {
        let id = handle.id;
        self.add(handle);
        Registration {
            registry: self.clone(),
            id,
            released: false,
        }
    }

    pub fn contains(&self, id: ViewerId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ── Scoped registration ───────────────────────────────────────────────────────

/// Keeps a viewer registered for as long as the guard is alive.
#[derive(Debug)]
#[must_use = "dropping the registration immediately unregisters the viewer"]
pub struct Registration {
    registry: ViewerRegistry,
    id: ViewerId,
    released: bool,
}

impl Registration {
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Unregisters now.  Returns whether the viewer was still present.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.registry.remove(self.id)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.released {
            self.registry.remove(self.id);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

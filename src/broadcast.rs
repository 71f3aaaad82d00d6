//! Cancellation channel between a map and the iterators reading it.
//!
//! Before any structural change the map runs two phases:
//!
//! 1. [`IteratorBroadcast::cancel_all`] flags every registered iterator as
//!    cancelled and returns immediately. Iterators poll
//!    [`IteratorToken::is_cancelled`] at their safe points and stop early.
//! 2. [`IteratorBroadcast::close_all`] flags every iterator as closed and
//!    blocks until none of them is inside a [`ReadSection`]. Closed iterators
//!    can never enter a read section again. The returned [`ForcedClose`] keeps
//!    iterators registered in the meantime from entering until the structural
//!    change is done.
//!
//! An iterator must not trigger a structural change of its own map while it
//! holds a read section, the forced phase would wait for itself.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

pub type IteratorId = u64;

#[derive(Debug, Default)]
struct IteratorState {
    cancelled: bool,
    closed: bool,
    readers: usize,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: IteratorId,
    iterators: HashMap<IteratorId, IteratorState>,
    /// Number of forced phases in progress.
    forced: usize,
}

impl Registry {
    fn busy(&self) -> usize {
        self.iterators
            .values()
            .filter(|state| state.closed && state.readers > 0)
            .count()
    }
}

#[derive(Debug, Default)]
struct Shared {
    registry: Mutex<Registry>,
    changed: Condvar,
}

/// Observer list of the iterators reading one map.
#[derive(Clone, Debug, Default)]
pub struct IteratorBroadcast {
    shared: Arc<Shared>,
}

impl IteratorBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new iterator. Dropping the token deregisters it.
    pub fn register(&self) -> IteratorToken {
        let mut registry = self.shared.registry.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.iterators.insert(id, IteratorState::default());
        trace!(id, "Registered iterator");
        IteratorToken {
            id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of registered iterators.
    pub fn registered(&self) -> usize {
        self.shared.registry.lock().iterators.len()
    }

    /// Ask every registered iterator to stop at its next safe point. Does not wait.
    pub fn cancel_all(&self) {
        let mut registry = self.shared.registry.lock();
        for state in registry.iterators.values_mut() {
            state.cancelled = true;
        }
        trace!(iterators = registry.iterators.len(), "Cancel broadcast");
    }

    /// Close every registered iterator and wait until none of them is reading.
    ///
    /// There is no timeout, the caller must not hold any lock a reading
    /// iterator may need to finish its read section.
    pub fn close_all(&self) -> ForcedClose<'_> {
        let mut registry = self.shared.registry.lock();
        registry.forced += 1;
        for state in registry.iterators.values_mut() {
            state.cancelled = true;
            state.closed = true;
        }
        trace!(iterators = registry.iterators.len(), "Close broadcast");
        while registry.busy() > 0 {
            self.shared.changed.wait(&mut registry);
        }
        trace!("All iterators closed");
        ForcedClose { broadcast: self }
    }

    /// Run both phases.
    pub fn close_all_iterators(&self) -> ForcedClose<'_> {
        self.cancel_all();
        self.close_all()
    }
}

/// End of a forced phase, iterators registered after the broadcast may read
/// again once this is dropped.
#[must_use = "the structural change must happen while the forced close is held"]
#[derive(Debug)]
pub struct ForcedClose<'a> {
    broadcast: &'a IteratorBroadcast,
}

impl Drop for ForcedClose<'_> {
    fn drop(&mut self) {
        let shared = &self.broadcast.shared;
        let mut registry = shared.registry.lock();
        registry.forced -= 1;
        if registry.forced == 0 {
            shared.changed.notify_all();
        }
    }
}

/// Registration of one iterator.
#[derive(Debug)]
pub struct IteratorToken {
    id: IteratorId,
    shared: Arc<Shared>,
}

impl IteratorToken {
    pub fn id(&self) -> IteratorId {
        self.id
    }

    /// Set by either broadcast phase. Poll at safe points.
    pub fn is_cancelled(&self) -> bool {
        self.state(|state| state.cancelled)
    }

    /// Set by the forced phase. A closed iterator cannot read anymore.
    pub fn is_closed(&self) -> bool {
        self.state(|state| state.closed)
    }

    /// Start accessing the map. Returns `None` once the iterator is closed.
    ///
    /// Waits while a structural change that started after this iterator was
    /// registered is in progress.
    pub fn enter(&self) -> Option<ReadSection<'_>> {
        let mut registry = self.shared.registry.lock();
        loop {
            let forced = registry.forced > 0;
            let state = registry.iterators.get_mut(&self.id)?;
            if state.closed {
                return None;
            }
            if !forced {
                state.readers += 1;
                return Some(ReadSection { token: self });
            }
            self.shared.changed.wait(&mut registry);
        }
    }

    fn state<T>(&self, f: impl FnOnce(&IteratorState) -> T) -> T
    where
        T: Default,
    {
        self.shared
            .registry
            .lock()
            .iterators
            .get(&self.id)
            .map(f)
            .unwrap_or_default()
    }
}

impl Drop for IteratorToken {
    fn drop(&mut self) {
        let mut registry = self.shared.registry.lock();
        registry.iterators.remove(&self.id);
        trace!(id = self.id, "Deregistered iterator");
        self.shared.changed.notify_all();
    }
}

/// Proof that an iterator is accessing map internals. The forced phase waits
/// for all of these to be dropped.
#[derive(Debug)]
pub struct ReadSection<'a> {
    token: &'a IteratorToken,
}

impl Drop for ReadSection<'_> {
    fn drop(&mut self) {
        let shared = &self.token.shared;
        let mut registry = shared.registry.lock();
        if let Some(state) = registry.iterators.get_mut(&self.token.id) {
            state.readers -= 1;
        }
        shared.changed.notify_all();
    }
}

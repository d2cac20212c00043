#![forbid(unsafe_code)]

//! Handler storage with stable slot identities.
//!
//! # Design
//!
//! Handlers live in a [`Slab`] arena behind one reader/writer lock. Each slot
//! is tagged with a generation number drawn from a per-registry counter, and
//! a [`HandlerId`] names a slot by `(index, generation)`. Slab indices are
//! reused after removal; the generation tag is what keeps an old id from
//! matching the slot's new occupant.
//!
//! [`Registry::add`] returns a [`RemovalToken`]: a one-shot callable that
//! holds a `Weak` reference back to the slot storage plus the new slot's id.
//! Firing it removes exactly that slot. Firing it again, or after the
//! registry is gone, does nothing.
//!
//! # Locking
//!
//! | Operation   | Lock   |
//! |-------------|--------|
//! | `add`       | write  |
//! | token fire  | write  |
//! | `len`       | read   |
//! | dispatch    | read, held for the whole round |
//!
//! # Failure Modes
//!
//! - **Re-entrant mutation**: adding or removing from inside a handler while
//!   the same registry is being dispatched blocks forever, because the round
//!   holds the read lock the writer is waiting on.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockReadGuard};
use slab::Slab;
use tracing::debug;

use crate::callable::{Callable, DisposableCallable};

/// One-shot callable that removes a single handler from its registry.
pub type RemovalToken = DisposableCallable<()>;

/// Stable identity of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId {
    index: usize,
    generation: u64,
}

impl HandlerId {
    pub(crate) const fn new(index: usize, generation: u64) -> Self {
        Self { index, generation }
    }

    /// Arena slot index. Reused after the handler is removed.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }

    /// Generation tag, unique per registry.
    #[must_use]
    pub const fn generation(self) -> u64 {
        self.generation
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Slot<A> {
    generation: u64,
    handler: Callable<A>,
}

/// Lock-free view of the arena; every access goes through [`Registry`].
pub(crate) struct Slots<A> {
    entries: Slab<Slot<A>>,
    next_generation: u64,
}

impl<A> Slots<A> {
    fn new() -> Self {
        Self {
            entries: Slab::new(),
            next_generation: 0,
        }
    }

    fn insert(&mut self, handler: Callable<A>) -> HandlerId {
        let generation = self.next_generation;
        self.next_generation += 1;
        let index = self.entries.insert(Slot {
            generation,
            handler,
        });
        HandlerId::new(index, generation)
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let live = self
            .entries
            .get(id.index)
            .is_some_and(|slot| slot.generation == id.generation);
        if live {
            self.entries.remove(id.index);
        }
        live
    }

    fn contains(&self, id: HandlerId) -> bool {
        self.entries
            .get(id.index)
            .is_some_and(|slot| slot.generation == id.generation)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Live handlers in slot-index order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (HandlerId, &Callable<A>)> {
        self.entries
            .iter()
            .map(|(index, slot)| (HandlerId::new(index, slot.generation), &slot.handler))
    }
}

fn remove_slot<A>(slots: &RwLock<Slots<A>>, id: HandlerId) -> bool {
    let removed = slots.write().remove(id);
    if removed {
        debug!(handler = %id, "handler removed");
    }
    removed
}

/// Ordered set of handlers guarded by one reader/writer lock.
pub struct Registry<A> {
    slots: Arc<RwLock<Slots<A>>>,
}

impl<A> Registry<A> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(RwLock::new(Slots::new())),
        }
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the handler with this id is still registered.
    #[must_use]
    pub fn contains(&self, id: HandlerId) -> bool {
        self.slots.read().contains(id)
    }

    /// Erase the slot named by `id`. Stale or already-removed ids are a no-op.
    #[cfg(test)]
    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        remove_slot(&self.slots, id)
    }

    /// Shared view for a dispatch round.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Slots<A>> {
        self.slots.read()
    }
}

impl<A: 'static> Registry<A> {
    /// Register a handler and return the token that removes it.
    ///
    /// The token is the only way to remove the handler. Dropping it without
    /// firing keeps the handler registered for the registry's lifetime; wrap
    /// it in a [`Subscription`] for drop-based removal.
    pub fn add(&self, handler: impl Into<Callable<A>>) -> RemovalToken {
        let (token, _) = self.add_with_id(handler);
        token
    }

    /// Register a handler, returning both its removal token and its id.
    pub fn add_with_id(&self, handler: impl Into<Callable<A>>) -> (RemovalToken, HandlerId) {
        let id = self.slots.write().insert(handler.into());
        debug!(handler = %id, "handler added");

        let slots: Weak<RwLock<Slots<A>>> = Arc::downgrade(&self.slots);
        let token = RemovalToken::new(move |_| {
            if let Some(slots) = slots.upgrade() {
                remove_slot(&slots, id);
            }
        });
        (token, id)
    }
}

impl<A> Default for Registry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Registry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("handlers", &self.len())
            .finish()
    }
}

/// RAII guard that fires a [`RemovalToken`] when dropped.
#[must_use = "dropping a Subscription removes its handler immediately"]
pub struct Subscription {
    token: RemovalToken,
}

impl Subscription {
    pub fn new(token: RemovalToken) -> Self {
        Self { token }
    }

    /// Whether the guarded handler has not been removed through this guard.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_empty()
    }

    /// Remove the handler now.
    pub fn cancel(self) {
        drop(self);
    }

    /// Release the guard without removing the handler.
    pub fn forget(mut self) {
        let _spent = std::mem::take(&mut self.token);
    }
}

impl From<RemovalToken> for Subscription {
    fn from(token: RemovalToken) -> Self {
        Self::new(token)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.call();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#![forbid(unsafe_code)]

//! A no-argument broadcaster that fires itself when dropped.
//!
//! Adding another broadcaster's [`RemovalToken`] to a hook ties the lifetime
//! of that registration to the hook's owner:
//!
//! ```
//! use pulse_core::{Broadcaster, Callable, DestructionHook};
//!
//! struct Listener {
//!     // Declared first so it fires before the other fields are dropped.
//!     on_drop: DestructionHook,
//! }
//!
//! let source: Broadcaster<()> = Broadcaster::new();
//! let listener = Listener { on_drop: DestructionHook::new() };
//! listener.on_drop.add(source.add(Callable::new(|_: &()| {})));
//! assert_eq!(source.len(), 1);
//!
//! drop(listener);
//! assert!(source.is_empty());
//! ```

use std::fmt;

use tracing::warn;

use crate::broadcaster::Broadcaster;
use crate::callable::Callable;
use crate::error::DispatchError;
use crate::registry::{HandlerId, RemovalToken};

/// Broadcaster that triggers exactly once, at the start of its own drop.
///
/// Rust drops struct fields in declaration order after the owner's own
/// `Drop::drop` runs, so an owner that wants its hook to fire before any of
/// its other state is released declares the hook as its first field.
pub struct DestructionHook {
    broadcaster: Broadcaster<()>,
}

impl DestructionHook {
    #[must_use]
    pub fn new() -> Self {
        Self {
            broadcaster: Broadcaster::new(),
        }
    }

    /// Register a handler to run at teardown.
    pub fn add(&self, handler: impl Into<Callable<()>>) -> RemovalToken {
        self.broadcaster.add(handler)
    }

    /// Register a handler, also returning its id.
    pub fn add_with_id(&self, handler: impl Into<Callable<()>>) -> (RemovalToken, HandlerId) {
        self.broadcaster.add_with_id(handler)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.broadcaster.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.broadcaster.is_empty()
    }

    /// Fire the handlers early. They fire again at drop unless removed.
    ///
    /// # Errors
    ///
    /// Returns the faults of the round; see [`Broadcaster::trigger`].
    pub fn trigger(&self) -> Result<(), DispatchError> {
        self.broadcaster.trigger(())
    }
}

impl Default for DestructionHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DestructionHook {
    fn drop(&mut self) {
        if let Err(err) = self.broadcaster.trigger(()) {
            warn!(%err, "destruction hook handlers panicked");
        }
    }
}

impl fmt::Debug for DestructionHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestructionHook")
            .field("handlers", &self.len())
            .finish()
    }
}

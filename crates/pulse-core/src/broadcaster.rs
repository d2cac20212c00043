#![forbid(unsafe_code)]

//! Concurrent fan-out over a [`Registry`].
//!
//! # Dispatch round
//!
//! ```text
//! trigger(args)
//!     │ read lock ──────────────────────────────────────────┐
//!     ├──► handler 1 ──► catch_unwind ──► ok                │
//!     ├──► handler 2 ──► catch_unwind ──► panic → fault     │ rayon pool
//!     └──► handler N ──► catch_unwind ──► ok                │
//!     │ join ◄──────────────────────────────────────────────┘
//!     └──► Ok(()) or Err(DispatchError { faults })
//! ```
//!
//! # Rules
//! - **Join point**: `trigger` returns only after every handler of the round
//!   has finished.
//! - **No ordering**: handlers of one round run in any order, possibly at
//!   the same time.
//! - **Consistent view**: the round holds the read lock, so it never sees a
//!   half-applied `add` or removal.
//! - **Isolation**: a panicking handler is reported, never propagated, and
//!   never stops its siblings.
//!
//! **Warning**: panics are caught with `AssertUnwindSafe`. A handler that
//! panics while holding a lock of its own may leave that state poisoned or
//! inconsistent; the broadcaster itself is unaffected.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use rayon::prelude::*;
use tracing::{trace, warn};

use crate::callable::Callable;
use crate::error::{DispatchError, HandlerFault, panic_message};
use crate::registry::{HandlerId, Registry, RemovalToken};

/// A registry of handlers that can all be invoked at once.
pub struct Broadcaster<A> {
    registry: Registry<A>,
}

impl<A> Broadcaster<A> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
        }
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Whether the handler with this id is still registered.
    #[must_use]
    pub fn contains(&self, id: HandlerId) -> bool {
        self.registry.contains(id)
    }

    /// The underlying handler registry.
    #[must_use]
    pub fn registry(&self) -> &Registry<A> {
        &self.registry
    }
}

impl<A: 'static> Broadcaster<A> {
    /// Register a handler. See [`Registry::add`].
    pub fn add(&self, handler: impl Into<Callable<A>>) -> RemovalToken {
        self.registry.add(handler)
    }

    /// Register a handler, also returning its id.
    pub fn add_with_id(&self, handler: impl Into<Callable<A>>) -> (RemovalToken, HandlerId) {
        self.registry.add_with_id(handler)
    }
}

impl<A: Sync> Broadcaster<A> {
    /// Invoke every registered handler with `args` and wait for all of them.
    ///
    /// A lone handler runs on the calling thread; larger rounds fan out over
    /// the rayon pool.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] listing every handler that panicked. All
    /// other handlers of the round still ran.
    pub fn trigger(&self, args: A) -> Result<(), DispatchError> {
        self.trigger_within(args, |handler| handler())
    }

    /// Like [`trigger`](Self::trigger), but every handler invocation runs
    /// inside `scope`, on whichever thread executes it.
    ///
    /// `scope` receives the invocation and must call it exactly once. It is
    /// the hook for per-handler context such as thread-local markers, which
    /// the caller's own thread cannot pass to pool workers.
    ///
    /// # Errors
    ///
    /// Same as [`trigger`](Self::trigger).
    pub fn trigger_within<S>(&self, args: A, scope: S) -> Result<(), DispatchError>
    where
        S: Fn(&dyn Fn()) + Sync,
    {
        let slots = self.registry.read();
        let handlers: Vec<(HandlerId, &Callable<A>)> = slots.iter().collect();
        let dispatched = handlers.len();
        trace!(handlers = dispatched, "dispatch round");

        let faults: Vec<HandlerFault> = match handlers.as_slice() {
            [] => return Ok(()),
            [(id, handler)] => invoke_isolated(*id, handler, &args, &scope)
                .into_iter()
                .collect(),
            _ => handlers
                .par_iter()
                .filter_map(|(id, handler)| invoke_isolated(*id, handler, &args, &scope))
                .collect(),
        };
        drop(slots);

        if faults.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::new(faults, dispatched))
        }
    }
}

fn invoke_isolated<A, S>(
    id: HandlerId,
    handler: &Callable<A>,
    args: &A,
    scope: &S,
) -> Option<HandlerFault>
where
    S: Fn(&dyn Fn()),
{
    match catch_unwind(AssertUnwindSafe(|| scope(&|| handler.execute(args)))) {
        Ok(()) => None,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(handler = %id, %message, "handler panicked during dispatch");
            Some(HandlerFault {
                handler: id,
                message,
            })
        }
    }
}

impl<A> Default for Broadcaster<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Broadcaster<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("handlers", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn counting(count: &Arc<AtomicUsize>) -> Callable<()> {
        let count = Arc::clone(count);
        Callable::new(move |_: &()| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn empty_trigger_is_noop() {
        let broadcaster: Broadcaster<()> = Broadcaster::new();
        assert!(broadcaster.trigger(()).is_ok());
    }

    #[test]
    fn every_handler_runs_once_per_round() {
        let broadcaster: Broadcaster<()> = Broadcaster::new();
        let counts: Vec<_> = (0..16).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let _tokens: Vec<_> = counts
            .iter()
            .map(|c| broadcaster.add(counting(c)))
            .collect();

        broadcaster.trigger(()).expect("no handler panics");

        for count in &counts {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn handlers_receive_arguments() {
        let broadcaster: Broadcaster<(usize, usize)> = Broadcaster::new();
        let total = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let total = Arc::clone(&total);
            let _token = broadcaster.add(move |(a, b): &(usize, usize)| {
                total.fetch_add(a + b, Ordering::SeqCst);
            });
        }

        broadcaster.trigger((2, 3)).expect("no handler panics");

        assert_eq!(total.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn removal_scenario() {
        let broadcaster: Broadcaster<()> = Broadcaster::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));

        let _t1 = broadcaster.add(counting(&first));
        let t2 = broadcaster.add(counting(&second));
        let _t3 = broadcaster.add(counting(&third));

        broadcaster.trigger(()).expect("round 1");
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 1);

        t2.call();
        broadcaster.trigger(()).expect("round 2");
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 2);

        t2.call();
        assert!(t2.is_empty());
        assert_eq!(broadcaster.len(), 2);
    }

    #[test]
    fn panicking_handler_does_not_stop_siblings() {
        let broadcaster: Broadcaster<()> = Broadcaster::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _a = broadcaster.add(counting(&count));
        let (_bad, bad_id) = broadcaster.add_with_id(Callable::new(|_: &()| panic!("handler exploded")));
        let _c = broadcaster.add(counting(&count));

        let err = broadcaster.trigger(()).expect_err("one handler panics");

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(err.dispatched(), 3);
        assert_eq!(err.faults().len(), 1);
        assert_eq!(err.faults()[0].handler, bad_id);
        assert_eq!(err.faults()[0].message, "handler exploded");

        // The broadcaster keeps working after a faulty round.
        let err = broadcaster.trigger(()).expect_err("still panics");
        assert_eq!(err.faults().len(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    #[traced_test]
    fn panicking_handler_is_logged() {
        let broadcaster: Broadcaster<()> = Broadcaster::new();
        let _bad = broadcaster.add(Callable::new(|_: &()| panic!("logged failure")));

        assert!(broadcaster.trigger(()).is_err());
        assert!(logs_contain("handler panicked during dispatch"));
    }

    #[test]
    fn empty_callable_handler_is_harmless() {
        let broadcaster: Broadcaster<()> = Broadcaster::new();
        let _token = broadcaster.add(Callable::empty());

        assert!(broadcaster.trigger(()).is_ok());
        assert_eq!(broadcaster.len(), 1);
    }

    #[test]
    fn scope_wraps_every_parallel_invocation() {
        thread_local! {
            static IN_SCOPE: Cell<bool> = const { Cell::new(false) };
        }

        let broadcaster: Broadcaster<()> = Broadcaster::new();
        let scoped = Arc::new(AtomicUsize::new(0));
        let _tokens: Vec<_> = (0..16)
            .map(|_| {
                let scoped = Arc::clone(&scoped);
                broadcaster.add(Callable::new(move |_: &()| {
                    if IN_SCOPE.get() {
                        scoped.fetch_add(1, Ordering::SeqCst);
                    }
                }))
            })
            .collect();
        let entered = AtomicUsize::new(0);

        broadcaster
            .trigger_within((), |handler| {
                entered.fetch_add(1, Ordering::SeqCst);
                let previous = IN_SCOPE.replace(true);
                handler();
                IN_SCOPE.set(previous);
            })
            .expect("no handler panics");

        assert_eq!(entered.load(Ordering::SeqCst), 16);
        assert_eq!(scoped.load(Ordering::SeqCst), 16);
        assert!(!IN_SCOPE.get());
    }

    #[test]
    fn scoped_panic_is_still_isolated() {
        let broadcaster: Broadcaster<()> = Broadcaster::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _good = broadcaster.add(counting(&count));
        let _bad = broadcaster.add(Callable::new(|_: &()| panic!("scoped failure")));

        let err = broadcaster
            .trigger_within((), |handler| handler())
            .expect_err("one handler panics");

        assert_eq!(err.faults().len(), 1);
        assert_eq!(err.faults()[0].message, "scoped failure");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_triggers_and_mutation() {
        let broadcaster: Broadcaster<()> = Broadcaster::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _stable = broadcaster.add(counting(&count));

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..50 {
                        broadcaster.trigger(()).expect("no handler panics");
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..50 {
                    let token = broadcaster.add(Callable::new(|_: &()| {}));
                    token.call();
                }
            });
        });

        assert_eq!(count.load(Ordering::SeqCst), 200);
        assert_eq!(broadcaster.len(), 1);
    }
}

#![forbid(unsafe_code)]

//! Optional actions with a fixed argument signature.
//!
//! # Design
//!
//! The argument signature is a single type parameter `A`. The no-argument
//! signature is `A = ()`; multi-argument signatures are tuples. Actions
//! receive `&A` because a broadcaster shares one argument value between
//! every handler of a concurrent round.
//!
//! Two flavours exist:
//!
//! - [`Callable<A>`]: a reusable action that may be executed any number of
//!   times. Cloning shares the same action.
//! - [`DisposableCallable<A>`]: a one-shot action. The action is moved out of
//!   its slot before it runs, so it executes at most once regardless of how
//!   many threads race to fire it, and it reports empty afterwards even if
//!   the action panicked.
//!
//! Both implement [`Invoke<A>`], which lets a disposable be used wherever a
//! plain callable is expected.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

type SharedAction<A> = Arc<dyn Fn(&A) + Send + Sync>;
type OnceAction<A> = Box<dyn FnOnce(&A) + Send>;

/// Common interface of every callable flavour.
pub trait Invoke<A> {
    /// Run the stored action, or do nothing if there is none.
    fn invoke(&self, args: &A);

    /// Whether invoking would be a no-op.
    fn is_empty(&self) -> bool;
}

/// A reusable, optionally-empty action.
///
/// Executing an empty callable is a no-op.
pub struct Callable<A> {
    action: Option<SharedAction<A>>,
}

impl<A> Callable<A> {
    /// An empty callable.
    #[must_use]
    pub const fn empty() -> Self {
        Self { action: None }
    }

    /// Whether no action is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.action.is_none()
    }

    /// Execute the stored action if present.
    pub fn execute(&self, args: &A) {
        if let Some(action) = &self.action {
            action(args);
        }
    }

    /// Drop the stored action.
    pub fn clear(&mut self) {
        self.action = None;
    }

    /// Move the stored action out, leaving this callable empty.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            action: self.action.take(),
        }
    }
}

impl<A: 'static> Callable<A> {
    /// Wrap an action.
    #[must_use]
    pub fn new(action: impl Fn(&A) + Send + Sync + 'static) -> Self {
        Self {
            action: Some(Arc::new(action)),
        }
    }

    /// Replace the stored action.
    pub fn set(&mut self, action: impl Fn(&A) + Send + Sync + 'static) {
        self.action = Some(Arc::new(action));
    }
}

impl Callable<()> {
    /// Execute a no-argument callable.
    pub fn call(&self) {
        self.execute(&());
    }
}

// Manual Clone: shares the same action without requiring `A: Clone`.
impl<A> Clone for Callable<A> {
    fn clone(&self) -> Self {
        Self {
            action: self.action.clone(),
        }
    }
}

impl<A> Default for Callable<A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<A> fmt::Debug for Callable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("empty", &self.is_empty())
            .finish()
    }
}

impl<A, F> From<F> for Callable<A>
where
    A: 'static,
    F: Fn(&A) + Send + Sync + 'static,
{
    fn from(action: F) -> Self {
        Self::new(action)
    }
}

impl<A: 'static> From<DisposableCallable<A>> for Callable<A> {
    /// Adapt a one-shot action into a reusable handler. Every execution after
    /// the first is a no-op.
    fn from(disposable: DisposableCallable<A>) -> Self {
        Self::new(move |args| disposable.execute(args))
    }
}

impl<A> Invoke<A> for Callable<A> {
    fn invoke(&self, args: &A) {
        self.execute(args);
    }

    fn is_empty(&self) -> bool {
        Callable::is_empty(self)
    }
}

/// A one-shot action that empties itself when executed.
///
/// # Invariants
///
/// 1. At most one real invocation ever happens, even under concurrent
///    execution from several threads.
/// 2. After the first execution starts, [`is_empty`](Self::is_empty) reports
///    `true` for good, including when the action panics.
pub struct DisposableCallable<A> {
    action: Mutex<Option<OnceAction<A>>>,
}

impl<A> DisposableCallable<A> {
    /// An already-spent callable.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            action: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.action.lock().is_none()
    }

    /// Execute the action if it has not run yet, then stay empty.
    pub fn execute(&self, args: &A) {
        // Take under the lock, run outside it: the action may be slow or may
        // re-enter this callable.
        let action = self.action.lock().take();
        if let Some(action) = action {
            action(args);
        }
    }
}

impl<A: 'static> DisposableCallable<A> {
    #[must_use]
    pub fn new(action: impl FnOnce(&A) + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }
}

impl DisposableCallable<()> {
    /// Execute a no-argument disposable.
    pub fn call(&self) {
        self.execute(&());
    }
}

impl<A> Default for DisposableCallable<A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<A> fmt::Debug for DisposableCallable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposableCallable")
            .field("empty", &self.is_empty())
            .finish()
    }
}

impl<A> Invoke<A> for DisposableCallable<A> {
    fn invoke(&self, args: &A) {
        self.execute(args);
    }

    fn is_empty(&self) -> bool {
        DisposableCallable::is_empty(self)
    }
}

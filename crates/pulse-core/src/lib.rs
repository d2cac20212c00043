#![forbid(unsafe_code)]

//! Core: thread-safe broadcast primitives.
//!
//! # Role in pulse
//! `pulse-core` owns everything that does not need a thread of its own:
//! callables, the handler registry, concurrent dispatch, and the
//! destruction hook. The timer broadcaster lives in `pulse-runtime` and is
//! built on the [`Broadcaster`] defined here.
//!
//! # Primary responsibilities
//! - **Callable / DisposableCallable**: optional actions of a fixed argument
//!   signature; the disposable flavour runs at most once.
//! - **Registry**: arena of handler slots with generation-checked ids and
//!   one-shot [`RemovalToken`]s.
//! - **Broadcaster**: invokes every registered handler concurrently, joins
//!   the round, and reports panicking handlers as [`DispatchError`].
//! - **DestructionHook**: a no-argument broadcaster that fires itself on drop.
//!
//! # Example
//! ```
//! use pulse_core::Broadcaster;
//!
//! let clicks: Broadcaster<(u16, u16)> = Broadcaster::new();
//! let token = clicks.add(|(x, y): &(u16, u16)| println!("click at {x},{y}"));
//!
//! clicks.trigger((3, 4)).expect("no handler panicked");
//!
//! token.call();
//! token.call(); // second removal is a no-op
//! assert!(clicks.is_empty());
//! assert!(token.is_empty());
//! ```

pub mod broadcaster;
pub mod callable;
pub mod destruction;
pub mod error;
pub mod registry;

pub use broadcaster::Broadcaster;
pub use callable::{Callable, DisposableCallable, Invoke};
pub use destruction::DestructionHook;
pub use error::{DispatchError, HandlerFault};
pub use registry::{HandlerId, Registry, RemovalToken, Subscription};

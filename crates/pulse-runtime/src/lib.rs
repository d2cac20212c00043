#![forbid(unsafe_code)]

//! Runtime: thread-backed broadcasters.
//!
//! `pulse-runtime` adds the pieces of pulse that own a thread. Today that is
//! [`IntervalBroadcaster`], a no-argument [`pulse_core::Broadcaster`] fired by
//! a dedicated timer thread at a mutable interval.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use pulse_core::Callable;
//! use pulse_runtime::IntervalBroadcaster;
//!
//! let heartbeat = IntervalBroadcaster::with_interval(Duration::from_millis(10));
//! let _token = heartbeat.add(Callable::new(|_: &()| {}));
//!
//! heartbeat.start()?;
//! heartbeat.set_interval(Duration::from_millis(20));
//! heartbeat.stop();
//! assert!(!heartbeat.is_running());
//! # Ok::<(), pulse_runtime::TimerError>(())
//! ```

pub mod config;
pub mod error;
pub mod interval;

pub use config::{DEFAULT_INTERVAL, DEFAULT_THREAD_NAME, TimerConfig};
pub use error::TimerError;
pub use interval::IntervalBroadcaster;

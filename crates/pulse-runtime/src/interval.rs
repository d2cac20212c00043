#![forbid(unsafe_code)]

//! Interval-driven broadcaster with a dedicated timer thread.
//!
//! # State machine
//!
//! ```text
//! Stopped ──start()──► Running ──stop() / drop──► Stopped
//!    │
//!    └── start() cannot spawn: stays Stopped, returns TimerError::Spawn
//! ```
//!
//! # Timer loop
//!
//! Each cycle snapshots the current interval, parks until that deadline,
//! re-checks the running flag, and triggers the broadcaster. Changing the
//! interval never wakes the thread, so a new value applies from the next
//! cycle. [`IntervalBroadcaster::stop`] clears the flag, unparks the thread,
//! and joins it: once `stop` returns no further round can start.
//!
//! # Failure Modes
//!
//! - **Panicking handler**: isolated by the broadcaster, logged, and the loop
//!   keeps running.
//! - **Stop from a handler**: the loop is waiting for the round, so `stop`
//!   called from one of this timer's handlers cannot join. Rounds driven by
//!   the loop mark every handler invocation with the timer's identity, on
//!   whichever pool thread runs it; a marked `stop` only clears the running
//!   flag and the loop exits once the round finishes. The next `start` reaps
//!   the finished thread.
//! - **Start from a handler**: a no-op, since the loop is by definition
//!   still alive.
//! - **Work stealing**: a handler that blocks on nested pool work may let
//!   its worker run unrelated jobs while still marked. Such a job calling
//!   `stop` on this timer gets the non-joining variant.
//! - **Mutation from a handler**: `add` or token removal on this timer from
//!   inside one of its handlers deadlocks, as for any broadcaster.

use std::cell::Cell;
use std::fmt;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pulse_core::{Broadcaster, Callable, DispatchError, HandlerId, RemovalToken};
use tracing::{debug, info, trace, warn};

use crate::config::TimerConfig;
use crate::error::TimerError;

thread_local! {
    /// Address of the timer whose round this thread is running a handler
    /// for, or zero.
    static ROUND_OWNER: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as running a handler of one timer until dropped.
struct RoundScope {
    previous: usize,
}

impl RoundScope {
    fn enter(owner: usize) -> Self {
        Self {
            previous: ROUND_OWNER.replace(owner),
        }
    }
}

impl Drop for RoundScope {
    fn drop(&mut self) {
        ROUND_OWNER.set(self.previous);
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// State shared between the owner and the timer thread.
struct TimerShared {
    broadcaster: Broadcaster<()>,
    interval_nanos: AtomicU64,
    running: AtomicBool,
}

impl TimerShared {
    fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_nanos.load(Ordering::Acquire))
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn owner_id(&self) -> usize {
        ptr::from_ref(self).addr()
    }

    /// Whether the caller is one of this timer's handlers, run by the loop.
    fn in_own_round(&self) -> bool {
        ROUND_OWNER.get() == self.owner_id()
    }

    /// Park until `interval` has elapsed. Returns `false` as soon as the
    /// running flag is observed cleared.
    fn wait(&self, interval: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(interval) else {
            while self.is_running() {
                thread::park();
            }
            return false;
        };

        loop {
            if !self.is_running() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::park_timeout(deadline - now);
        }
    }

    fn run(&self) {
        let owner = self.owner_id();

        while self.wait(self.interval()) {
            trace!("timer round");
            let round = self.broadcaster.trigger_within((), |handler| {
                let _scope = RoundScope::enter(owner);
                handler();
            });
            if let Err(err) = round {
                warn!(%err, "timer round had panicking handlers");
            }
        }
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!("timer thread terminated by a panic");
    }
}

/// A no-argument broadcaster that triggers itself every interval.
///
/// # Invariants
///
/// 1. [`is_running`](Self::is_running) is `true` from a successful
///    [`start`](Self::start) until [`stop`](Self::stop) begins.
/// 2. After `stop` returns (off the timer thread), no further timer round
///    starts until the next `start`.
/// 3. At most one timer thread exists per instance.
pub struct IntervalBroadcaster {
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    thread_name: String,
}

impl IntervalBroadcaster {
    /// A stopped timer with the default one-second interval.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(TimerConfig::default())
    }

    /// A stopped timer with the given interval.
    #[must_use]
    pub fn with_interval(interval: Duration) -> Self {
        Self::from_config(TimerConfig::new(interval))
    }

    #[must_use]
    pub fn from_config(config: TimerConfig) -> Self {
        Self {
            shared: Arc::new(TimerShared {
                broadcaster: Broadcaster::new(),
                interval_nanos: AtomicU64::new(duration_to_nanos(config.interval)),
                running: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
            thread_name: config.thread_name,
        }
    }

    /// Register a handler to run on every tick.
    pub fn add(&self, handler: impl Into<Callable<()>>) -> RemovalToken {
        self.shared.broadcaster.add(handler)
    }

    /// Register a handler, also returning its id.
    pub fn add_with_id(&self, handler: impl Into<Callable<()>>) -> (RemovalToken, HandlerId) {
        self.shared.broadcaster.add_with_id(handler)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.broadcaster.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.broadcaster.is_empty()
    }

    /// The broadcaster driven by the timer.
    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster<()> {
        &self.shared.broadcaster
    }

    /// Fire the handlers now, independent of the timer.
    ///
    /// # Errors
    ///
    /// Returns the faults of the round; see [`Broadcaster::trigger`].
    pub fn trigger(&self) -> Result<(), DispatchError> {
        self.shared.broadcaster.trigger(())
    }

    /// Current interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Change the interval. A wait already in progress is not shortened or
    /// extended; the new value applies from the next cycle.
    pub fn set_interval(&self, interval: Duration) {
        self.shared
            .interval_nanos
            .store(duration_to_nanos(interval), Ordering::Release);
        debug!(?interval, "timer interval changed");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Spawn the timer thread. No-op if already running.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Spawn`] if the thread cannot be created; the
    /// timer stays stopped.
    pub fn start(&self) -> Result<(), TimerError> {
        if self.shared.in_own_round() {
            return Ok(());
        }

        let mut worker = self.worker.lock();
        if worker.is_some() && self.shared.is_running() {
            return Ok(());
        }
        // A loop stopped from its own thread leaves its handle behind.
        if let Some(finished) = worker.take() {
            join_worker(finished);
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || shared.run());

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!(interval = ?self.interval(), thread = %self.thread_name, "timer started");
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                warn!(%err, "timer thread could not be spawned");
                Err(TimerError::Spawn(err))
            }
        }
    }

    /// Stop the timer and wait for its thread to exit. No-op if stopped.
    ///
    /// Called from one of this timer's own handlers, it only requests the
    /// stop; the loop exits after the current round.
    pub fn stop(&self) {
        if self.shared.in_own_round() {
            self.shared.running.store(false, Ordering::Release);
            debug!("timer stop requested from one of its handlers");
            return;
        }

        let mut worker = self.worker.lock();
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = worker.take() {
            handle.thread().unpark();
            join_worker(handle);
            info!(thread = %self.thread_name, "timer stopped");
        }
    }
}

impl Default for IntervalBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntervalBroadcaster {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for IntervalBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntervalBroadcaster")
            .field("interval", &self.interval())
            .field("running", &self.is_running())
            .field("handlers", &self.len())
            .field("thread_name", &self.thread_name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

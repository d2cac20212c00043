//! Wall-clock behaviour of the interval broadcaster.
//!
//! These tests sleep for real time and assert with scheduling slack:
//!
//! 1. A 500 ms timer fires at least 5 times in 3 s and never after `stop`.
//! 2. Changing the interval mid-run leaves the wait in progress untouched and
//!    governs every later cycle.
//! 3. Dropping a running timer joins its thread; nothing fires afterwards.
//! 4. A destruction hook can tear down a timer registration automatically.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use pulse_core::{Callable, DestructionHook};
use pulse_runtime::{IntervalBroadcaster, TimerConfig};

fn counting(count: &Arc<AtomicUsize>) -> Callable<()> {
    let count = Arc::clone(count);
    Callable::new(move |_: &()| {
        count.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn half_second_timer_fires_then_goes_quiet() {
    let count = Arc::new(AtomicUsize::new(0));
    let timer = IntervalBroadcaster::with_interval(Duration::from_millis(500));
    let _token = timer.add(counting(&count));

    timer.start().expect("spawn timer");
    thread::sleep(Duration::from_secs(3));
    let fired = count.load(Ordering::SeqCst);
    timer.stop();

    assert!(fired >= 5, "expected at least 5 rounds in 3s, saw {fired}");
    assert!(fired <= 7, "expected about 6 rounds in 3s, saw {fired}");

    let after_stop = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_secs(2));
    assert_eq!(count.load(Ordering::SeqCst), after_stop);
}

#[test]
fn interval_change_applies_to_later_cycles() {
    let count = Arc::new(AtomicUsize::new(0));
    let timer = IntervalBroadcaster::with_interval(Duration::from_millis(600));
    let _token = timer.add(counting(&count));

    timer.start().expect("spawn timer");
    // The first 600 ms wait is already under way when the interval shrinks.
    thread::sleep(Duration::from_millis(50));
    timer.set_interval(Duration::from_millis(40));

    thread::sleep(Duration::from_millis(300));
    assert_eq!(count.load(Ordering::SeqCst), 0, "wait in progress was cut short");

    thread::sleep(Duration::from_millis(900));
    timer.stop();
    assert!(count.load(Ordering::SeqCst) >= 5);
}

#[test]
fn drop_stops_the_timer_thread() {
    let count = Arc::new(AtomicUsize::new(0));
    let timer = IntervalBroadcaster::from_config(
        TimerConfig::default()
            .with_interval(Duration::from_millis(10))
            .with_thread_name("drop-probe"),
    );
    let _token = timer.add(counting(&count));

    timer.start().expect("spawn timer");
    thread::sleep(Duration::from_millis(100));
    drop(timer);

    let after_drop = count.load(Ordering::SeqCst);
    assert!(after_drop > 0);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(count.load(Ordering::SeqCst), after_drop);
}

#[test]
fn destruction_hook_detaches_timer_handler() {
    struct Widget {
        on_drop: DestructionHook,
    }

    let count = Arc::new(AtomicUsize::new(0));
    let timer = IntervalBroadcaster::with_interval(Duration::from_millis(10));
    let widget = Widget {
        on_drop: DestructionHook::new(),
    };
    let _chained = widget.on_drop.add(timer.add(counting(&count)));
    assert_eq!(timer.len(), 1);

    timer.start().expect("spawn timer");
    thread::sleep(Duration::from_millis(100));
    drop(widget);
    assert!(timer.is_empty());

    let after_drop = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    timer.stop();

    assert!(after_drop > 0);
    assert_eq!(count.load(Ordering::SeqCst), after_drop);
}

#![forbid(unsafe_code)]

//! Dispatch faults.
//!
//! A handler that panics during a round is isolated: its panic is caught,
//! converted into a [`HandlerFault`], and the rest of the round continues.
//! The faults of a round are returned together as a [`DispatchError`].

use std::any::Any;
use std::fmt;

use crate::registry::HandlerId;

/// One handler that panicked during a dispatch round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    /// Slot of the faulting handler.
    pub handler: HandlerId,
    /// Panic payload rendered as text.
    pub message: String,
}

impl fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler {} panicked: {}", self.handler, self.message)
    }
}

/// Partial-failure report for a dispatch round.
///
/// Every handler of the round ran (or started running); `faults` lists the
/// ones that panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    faults: Vec<HandlerFault>,
    dispatched: usize,
}

impl DispatchError {
    pub(crate) fn new(faults: Vec<HandlerFault>, dispatched: usize) -> Self {
        Self { faults, dispatched }
    }

    /// Faults collected during the round, one per panicking handler.
    #[must_use]
    pub fn faults(&self) -> &[HandlerFault] {
        &self.faults
    }

    /// Number of handlers dispatched in the round, faulting ones included.
    #[must_use]
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Consume the report, returning the faults.
    #[must_use]
    pub fn into_faults(self) -> Vec<HandlerFault> {
        self.faults
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} handlers panicked",
            self.faults.len(),
            self.dispatched
        )?;
        if let Some(first) = self.faults.first() {
            write!(f, " (first: {first})")?;
        }
        Ok(())
    }
}

impl std::error::Error for DispatchError {}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

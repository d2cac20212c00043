#![forbid(unsafe_code)]

use std::fmt;
use std::io;

/// Errors from timer lifecycle operations.
#[derive(Debug)]
pub enum TimerError {
    /// The operating system refused to create the timer thread.
    Spawn(io::Error),
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "failed to spawn timer thread: {err}"),
        }
    }
}

impl std::error::Error for TimerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
        }
    }
}

impl From<io::Error> for TimerError {
    fn from(err: io::Error) -> Self {
        Self::Spawn(err)
    }
}

use std::fmt;

/// Operational states of the worker thread.
///
/// `Invalid` is a sentinel meaning "no request pending". It is never a legal
/// value for the current state once the worker is running, and requesting it
/// is a contract violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsyncState {
    Invalid,
    Idle,
    Pause,
    Authenticate,
    Enroll,
    Stop,
}

impl AsyncState {
    /// Variant name. Exhaustive, so adding a state without a name fails to
    /// compile.
    pub fn as_str(self) -> &'static str {
        match self {
            AsyncState::Invalid => "Invalid",
            AsyncState::Idle => "Idle",
            AsyncState::Pause => "Pause",
            AsyncState::Authenticate => "Authenticate",
            AsyncState::Enroll => "Enroll",
            AsyncState::Stop => "Stop",
        }
    }
}

impl fmt::Display for AsyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

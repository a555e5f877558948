use nix::errno::Errno;

/// Recoverable failures reported to controller threads.
///
/// Fatal conditions (a missed handshake, a failed stop, consuming an invalid
/// request) panic instead of returning a value; see the crate documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// The wake channel could not be signalled.
    #[error("failed to signal wake channel: {0}")]
    Signal(Errno),
}

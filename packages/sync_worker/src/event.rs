use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::eventfd::{EfdFlags, EventFd};
use tracing::{error, trace};

/// Cross-thread wake signal backed by an eventfd.
///
/// Carries no payload: raises before a take coalesce into a single pending
/// flag, which is all the consumer needs since only the most recent request
/// matters.
pub struct EventSignal {
    fd: EventFd,
}

impl EventSignal {
    pub fn new() -> nix::Result<Self> {
        let fd = EventFd::from_flags(EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)?;
        Ok(Self { fd })
    }

    /// Mark the channel pending. Non-blocking.
    pub fn raise(&self) -> Result<(), Errno> {
        match self.fd.arm() {
            Ok(_) => Ok(()),
            Err(errno) => {
                error!("Failed to write to eventfd: {}", errno);
                Err(errno)
            }
        }
    }

    /// Block until the channel is pending or `timeout` elapses; `None` waits
    /// indefinitely. Returns whether the channel is pending. Does not consume
    /// the signal: poll keeps reporting readable while the counter is
    /// non-zero.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let timeout = match timeout {
            None => PollTimeout::NONE,
            Some(duration) => {
                let millis = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
                PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)
            }
        };

        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, timeout) {
            Ok(count) => {
                let available = count > 0;
                trace!("Polled eventfd: available={}", available);
                available
            }
            Err(errno) => {
                error!("Failed to poll eventfd: {}", errno);
                false
            }
        }
    }

    /// Clear the pending flag, reporting whether it had been set.
    pub fn take(&self) -> bool {
        let mut buf = [0u8; 8];
        match nix::unistd::read(self.fd.as_raw_fd(), &mut buf) {
            Ok(_) => true,
            Err(Errno::EAGAIN) => false,
            Err(errno) => {
                error!("Failed to read eventfd: {}", errno);
                false
            }
        }
    }
}

impl AsFd for EventSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

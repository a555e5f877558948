use std::os::fd::{AsFd, BorrowedFd};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::error::WorkerError;
use crate::event::EventSignal;
use crate::state::AsyncState;

/// Bound on every state handshake. A correctly behaving worker acknowledges
/// well within this, so exceeding it is a logic bug rather than a transient
/// condition.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Operation bodies supplied by the driver.
///
/// Each operation runs synchronously on the worker thread, without the state
/// lock held, and must return once its work is finished or a newer request
/// interrupts it. Interruption is observable through the context: a pending
/// request makes [`WorkerContext::wait_for_event`] return.
pub trait WorkHandler: Send + Sync {
    /// Invoked when the worker has nothing to do. The default implementation
    /// blocks until the next request arrives.
    fn on_idle(&self, ctx: &WorkerContext<'_>) {
        ctx.wait_for_event(None);
    }

    fn on_authenticate(&self, ctx: &WorkerContext<'_>);

    fn on_enroll(&self, ctx: &WorkerContext<'_>);
}

/// Worker-side view handed to handler operations.
pub struct WorkerContext<'a> {
    core: &'a Core,
}

impl WorkerContext<'_> {
    /// Block until a new state request is pending, up to `timeout` (`None`
    /// waits indefinitely). Returns whether a request is pending.
    pub fn wait_for_event(&self, timeout: Option<Duration>) -> bool {
        self.core.event.wait(timeout)
    }

    /// The wake channel's descriptor, for handler-side poll loops.
    pub fn event_fd(&self) -> BorrowedFd<'_> {
        self.core.event.as_fd()
    }
}

struct Shared {
    current: AsyncState,
    desired: AsyncState,
}

struct Core {
    event: EventSignal,
    shared: Mutex<Shared>,
    state_changed: Condvar,
    handshake_timeout: Duration,
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A poisoning panic is already fatal by crate policy, and every
        // update to the pair is a single assignment, so the state behind a
        // poisoned lock is still consistent.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A dedicated thread running blocking device operations, driven through
/// state requests from any number of controller threads.
///
/// Requests are last-write-wins: a single pending slot holds the most recent
/// desired state until the worker consumes it. Dropping the coordinator
/// stops and joins the worker if it is still running.
pub struct WorkerThread {
    core: Arc<Core>,
    handler: Arc<dyn WorkHandler>,
    thread: Option<JoinHandle<()>>,
    started: bool,
}

impl WorkerThread {
    /// Create a coordinator around `handler`. The worker thread is not
    /// spawned until [`start`](Self::start).
    ///
    /// # Panics
    ///
    /// If the wake channel cannot be allocated.
    pub fn new(handler: Arc<dyn WorkHandler>) -> Self {
        Self::with_handshake_timeout(handler, HANDSHAKE_TIMEOUT)
    }

    pub(crate) fn with_handshake_timeout(
        handler: Arc<dyn WorkHandler>,
        handshake_timeout: Duration,
    ) -> Self {
        let event = match EventSignal::new() {
            Ok(event) => event,
            Err(errno) => panic!("failed to create eventfd: {errno}"),
        };

        Self {
            core: Arc::new(Core {
                event,
                shared: Mutex::new(Shared {
                    current: AsyncState::Idle,
                    desired: AsyncState::Invalid,
                }),
                state_changed: Condvar::new(),
                handshake_timeout,
            }),
            handler,
            thread: None,
            started: false,
        }
    }

    /// Spawn the worker thread.
    ///
    /// # Panics
    ///
    /// If called a second time. Once stopped, the coordinator cannot be
    /// restarted; build a fresh one instead.
    pub fn start(&mut self) {
        assert!(!self.started, "worker thread cannot be started twice");
        self.started = true;

        let core = Arc::clone(&self.core);
        let handler = Arc::clone(&self.handler);
        self.thread = Some(std::thread::spawn(move || run(&core, handler.as_ref())));
    }

    /// Stop and join the worker thread if it is running. Idempotent, and
    /// invoked implicitly on drop.
    ///
    /// # Panics
    ///
    /// If the stop handshake fails or the worker thread panicked. Stop must
    /// always succeed against a correctly behaving worker.
    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };

        warn!("Requesting worker thread to stop");
        if let Err(err) = self.wait_for_state(AsyncState::Stop) {
            panic!("failed to stop worker thread: {err}");
        }
        if handle.join().is_err() {
            panic!("worker thread panicked before joining");
        }
    }

    /// Park the worker and wait until it acknowledges.
    pub fn pause(&self) -> Result<(), WorkerError> {
        trace!("Waiting for worker thread to pause");
        self.wait_for_state(AsyncState::Pause)
    }

    /// Request the worker back to idle. Fire-and-forget: this returns once
    /// the request is recorded, not once the worker has observed it.
    pub fn resume(&self) -> Result<(), WorkerError> {
        trace!("Requesting worker thread to resume");
        self.move_to_state(AsyncState::Idle)
    }

    /// Record `state` as the pending request and wake the worker. Gives no
    /// guarantee that the worker has observed the request; use
    /// [`wait_for_state`](Self::wait_for_state) for that.
    pub fn move_to_state(&self, state: AsyncState) -> Result<(), WorkerError> {
        let mut shared = self.core.lock();
        self.move_to_state_locked(&mut shared, state)
    }

    /// Like [`move_to_state`](Self::move_to_state), then block until the
    /// worker has entered `state`. On success the worker is guaranteed to
    /// have observed and entered the state.
    ///
    /// # Panics
    ///
    /// If the worker does not acknowledge within the handshake bound. That
    /// only happens when the worker is stalled or the state machine is
    /// miswired, and either must surface immediately instead of hanging.
    pub fn wait_for_state(&self, state: AsyncState) -> Result<(), WorkerError> {
        let shared = self.core.lock();
        self.wait_for_state_locked(shared, state)
    }

    /// The wake channel's descriptor, for integration into an external poll
    /// or select loop.
    pub fn event_fd(&self) -> BorrowedFd<'_> {
        self.core.event.as_fd()
    }

    // The guard parameter is the proof that the caller holds the state lock;
    // there is no way to reach this without having taken it.
    fn move_to_state_locked(
        &self,
        shared: &mut MutexGuard<'_, Shared>,
        state: AsyncState,
    ) -> Result<(), WorkerError> {
        assert!(
            state != AsyncState::Invalid,
            "Invalid is not a requestable state"
        );

        debug!("Setting desired state to {}", state);

        if shared.desired != AsyncState::Invalid {
            warn!(
                "Previous request {} was not consumed, overriding with {}",
                shared.desired, state
            );
        }
        shared.desired = state;

        self.core.event.raise().map_err(WorkerError::Signal)
    }

    fn wait_for_state_locked(
        &self,
        mut shared: MutexGuard<'_, Shared>,
        state: AsyncState,
    ) -> Result<(), WorkerError> {
        if let Err(err) = self.move_to_state_locked(&mut shared, state) {
            error!(
                "Failed to request transition from {} to {}",
                shared.current, state
            );
            return Err(err);
        }

        // Wait for the worker thread to enter the new state.
        let (shared, result) = self
            .core
            .state_changed
            .wait_timeout_while(shared, self.core.handshake_timeout, |s| s.current != state)
            .unwrap_or_else(PoisonError::into_inner);

        // Crash instead of blocking forever: a missed handshake is a race
        // bug, never a condition to retry.
        if result.timed_out() && shared.current != state {
            panic!(
                "timed out waiting for {state} after {:?}; the worker never acknowledged",
                self.core.handshake_timeout
            );
        }

        debug!("Worker acknowledged state {}", state);
        Ok(())
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Consume the pending request under the lock: adopt the desired state
/// (defaulting to `Idle` when nothing is pending), reset the request slot to
/// `Invalid`, publish the new current state, and notify waiters.
fn consume_state(core: &Core) -> AsyncState {
    let mut shared = core.lock();
    let mut state = AsyncState::Idle;

    if core.event.take() {
        if shared.desired == AsyncState::Invalid {
            panic!("woken with no pending request; desired state is Invalid");
        }
        state = shared.desired;
    }

    trace!("Consumed state {}", state);

    shared.current = state;
    shared.desired = AsyncState::Invalid;
    core.state_changed.notify_all();

    state
}

fn run(core: &Core, handler: &dyn WorkHandler) {
    debug!("Worker thread up");
    loop {
        let state = consume_state(core);
        debug!("Switched to state {}", state);

        let ctx = WorkerContext { core };
        match state {
            AsyncState::Idle => handler.on_idle(&ctx),
            AsyncState::Pause => {
                // Poll keeps returning while the eventfd counter is non-zero,
                // so any new request unparks the worker.
                core.event.wait(None);
            }
            AsyncState::Authenticate => handler.on_authenticate(&ctx),
            AsyncState::Enroll => handler.on_enroll(&ctx),
            AsyncState::Stop => {
                info!("Stopping worker thread");
                return;
            }
            AsyncState::Invalid => warn!("Unexpected state {}, ignoring", state),
        }

        // Falling back to idle is not a requested transition, so no
        // notification is needed.
        core.lock().current = AsyncState::Idle;
    }
}

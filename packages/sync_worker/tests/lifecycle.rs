//! Full lifecycle tests: start, pause, resume, handshakes, overwrite
//! semantics, drop behavior, and the descriptor accessor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, channel};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use sync_worker::{AsyncState, WorkHandler, WorkerContext, WorkerThread};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Spin until `cond` holds, failing the test after a second.
fn eventually(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(cond(), "condition not reached within one second");
}

/// Counts every operation; each blocks until the next request arrives, like
/// a real hardware operation waiting for interruption.
#[derive(Default)]
struct RecordingHandler {
    idle_calls: AtomicUsize,
    auth_calls: AtomicUsize,
    enroll_calls: AtomicUsize,
}

impl RecordingHandler {
    fn idle_calls(&self) -> usize {
        self.idle_calls.load(Ordering::SeqCst)
    }
}

impl WorkHandler for RecordingHandler {
    fn on_idle(&self, ctx: &WorkerContext<'_>) {
        self.idle_calls.fetch_add(1, Ordering::SeqCst);
        ctx.wait_for_event(None);
    }

    fn on_authenticate(&self, ctx: &WorkerContext<'_>) {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        ctx.wait_for_event(None);
    }

    fn on_enroll(&self, ctx: &WorkerContext<'_>) {
        self.enroll_calls.fetch_add(1, Ordering::SeqCst);
        ctx.wait_for_event(None);
    }
}

#[test]
fn start_then_stop_joins_cleanly() {
    init_tracing();
    let handler = Arc::new(RecordingHandler::default());
    let mut worker = WorkerThread::new(handler.clone());

    worker.start();
    eventually(|| handler.idle_calls() >= 1);
    worker.stop();

    assert_eq!(handler.auth_calls.load(Ordering::SeqCst), 0);
    assert_eq!(handler.enroll_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn stop_is_idempotent() {
    init_tracing();
    let handler = Arc::new(RecordingHandler::default());
    let mut worker = WorkerThread::new(handler);

    worker.start();
    worker.stop();
    worker.stop();
}

#[test]
fn pause_then_resume_reenters_idle() {
    init_tracing();
    let handler = Arc::new(RecordingHandler::default());
    let mut worker = WorkerThread::new(handler.clone());

    worker.start();
    eventually(|| handler.idle_calls() >= 1);

    worker.pause().unwrap();
    let idles_before_resume = handler.idle_calls();

    worker.resume().unwrap();
    eventually(|| handler.idle_calls() > idles_before_resume);

    worker.stop();
}

#[test]
fn wait_for_state_confirms_authenticate_entered() {
    init_tracing();
    let handler = Arc::new(RecordingHandler::default());
    let mut worker = WorkerThread::new(handler.clone());

    worker.start();
    worker.wait_for_state(AsyncState::Authenticate).unwrap();
    eventually(|| handler.auth_calls.load(Ordering::SeqCst) == 1);

    worker.stop();
}

/// Holds the worker captive in `on_authenticate` until released, so requests
/// submitted meanwhile pile up in the single pending slot.
struct GatedHandler {
    gate: Mutex<Receiver<()>>,
    enroll_calls: AtomicUsize,
}

impl WorkHandler for GatedHandler {
    fn on_authenticate(&self, _ctx: &WorkerContext<'_>) {
        let _ = self.gate.lock().unwrap().recv();
    }

    fn on_enroll(&self, _ctx: &WorkerContext<'_>) {
        self.enroll_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn unconsumed_request_is_overwritten_by_the_newest() {
    init_tracing();
    let (release, gate) = channel();
    let handler = Arc::new(GatedHandler {
        gate: Mutex::new(gate),
        enroll_calls: AtomicUsize::new(0),
    });
    let mut worker = WorkerThread::new(handler.clone());

    worker.start();
    worker.wait_for_state(AsyncState::Authenticate).unwrap();

    // The worker is captive in the handler: neither request below can be
    // consumed until it is released, so Pause overwrites Enroll.
    worker.move_to_state(AsyncState::Enroll).unwrap();
    worker.move_to_state(AsyncState::Pause).unwrap();

    release.send(()).unwrap();
    worker.pause().unwrap();

    assert_eq!(handler.enroll_calls.load(Ordering::SeqCst), 0);
    worker.stop();
}

#[test]
fn drop_stops_the_worker() {
    init_tracing();
    let handler = Arc::new(RecordingHandler::default());
    {
        let mut worker = WorkerThread::new(handler.clone());
        worker.start();
        eventually(|| handler.idle_calls() >= 1);
    }

    // The worker was joined by the drop; nothing runs anymore.
    let idles = handler.idle_calls();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(handler.idle_calls(), idles);
}

#[test]
fn event_fd_integrates_with_an_external_poll_loop() {
    init_tracing();
    let worker = WorkerThread::new(Arc::new(RecordingHandler::default()));

    let mut fds = [PollFd::new(worker.event_fd(), PollFlags::POLLIN)];
    assert_eq!(poll(&mut fds, PollTimeout::ZERO).unwrap(), 0);

    worker.move_to_state(AsyncState::Pause).unwrap();

    let mut fds = [PollFd::new(worker.event_fd(), PollFlags::POLLIN)];
    assert_eq!(poll(&mut fds, PollTimeout::ZERO).unwrap(), 1);
}

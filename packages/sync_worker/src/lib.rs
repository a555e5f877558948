//! Synchronized worker thread for blocking device operations.
//!
//! Biometric sensor drivers have long-running, blocking operations
//! (authenticate, enroll) that must run off the calling thread yet stay
//! interruptible: a pause or stop request arriving mid-operation has to win.
//! This crate provides the coordination backbone for that: one dedicated
//! worker thread, a single-slot state request protected by a mutex, and an
//! eventfd wake channel that the worker and the handler bodies block on.
//!
//! Requests are last-write-wins; only the most recent unconsumed state
//! matters. Handshakes (`pause`, `stop`, `wait_for_state`) are bounded at
//! three seconds, and a worker that misses the bound indicates a logic bug:
//! the process panics rather than hanging silently.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sync_worker::{WorkHandler, WorkerContext, WorkerThread};
//!
//! struct SensorHandler;
//!
//! impl WorkHandler for SensorHandler {
//!     fn on_authenticate(&self, ctx: &WorkerContext<'_>) {
//!         // Talk to the hardware until done or a new request arrives.
//!         while !ctx.wait_for_event(Some(Duration::from_millis(20))) {
//!             // ... capture and match a sample ...
//!         }
//!     }
//!
//!     fn on_enroll(&self, ctx: &WorkerContext<'_>) {
//!         ctx.wait_for_event(None);
//!     }
//! }
//!
//! let mut worker = WorkerThread::new(Arc::new(SensorHandler));
//! worker.start();
//! worker.pause().unwrap();
//! worker.resume().unwrap();
//! worker.stop();
//! ```

mod error;
mod event;
mod state;
mod worker;

pub use error::WorkerError;
pub use event::EventSignal;
pub use state::AsyncState;
pub use worker::{WorkHandler, WorkerContext, WorkerThread};

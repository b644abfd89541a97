//! Cooperative task scheduler and I/O event loop for the vault firmware.
//!
//! Every application flow (UI animation, touch handling, USB
//! request/response processing, timers) is written as a suspendable
//! [`Task`] and multiplexed onto a single thread with no preemption. A task
//! hands control back to the loop at every delay or I/O operation by
//! suspending on a [`Request`]: [`Step::sleep`], [`Step::wait`], a
//! [`Signal`] rendezvous, or a [`Race`] over child tasks. The loop resumes
//! it when the requested event arrives.
//!
//! Use [`schedule`] to enqueue tasks and [`run`] to enter the loop:
//!
//! ```
//! use vault_executor::{Driver, DriverError, InterfaceId, Outcome, PollResult};
//! use vault_executor::{run, schedule, Step, Task};
//!
//! /// Blinks a cursor three times, 10 ms apart.
//! struct Blink {
//!     remaining: u32,
//! }
//!
//! impl Task for Blink {
//!     fn resume(&mut self, _input: Outcome) -> Step {
//!         if self.remaining == 0 {
//!             return Step::done();
//!         }
//!         self.remaining -= 1;
//!         Step::sleep(10_000)
//!     }
//! }
//!
//! /// A driver with no message sources; every poll times out.
//! struct NoIo;
//!
//! impl Driver for NoIo {
//!     fn poll(
//!         &mut self,
//!         _interfaces: &[InterfaceId],
//!         _budget_us: u32,
//!     ) -> Result<PollResult, DriverError> {
//!         Ok(PollResult::Timeout)
//!     }
//! }
//!
//! schedule(Blink { remaining: 3 }).unwrap();
//! run(&mut NoIo).unwrap();
//! ```
//!
//! The scheduler is strictly single-threaded and its state is thread-local;
//! nothing here is `Send`. Timeouts are not a primitive; compose them as a
//! [`Race`] between the work and a sleep.

#![warn(
    elided_lifetimes_in_paths,
    missing_debug_implementations,
    missing_docs
)]

pub mod clock;
mod error;
mod io;
mod machinery;
mod paused;
mod request;
mod task;

pub use error::Error;
pub use io::{Driver, DriverError, InterfaceId, PollResult};
pub use machinery::{
    close, clear, pause, run, schedule, schedule_with, set_after_step_hook, stats, Stats,
    QUEUE_CAPACITY,
};
pub use request::{Race, Request, Signal};
pub use task::{Finalizer, Outcome, Step, Task, TaskId, Value};
pub use vault_timers::{QueueFull, Ticks};

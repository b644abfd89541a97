//! Tick arithmetic and the deadline-ordered timer queue underneath the vault
//! event loop.
//!
//! The firmware measures time with a free-running monotonic microsecond
//! counter that is only 32 bits wide, so it wraps around roughly every 71
//! minutes. Nothing in this crate ever compares two instants with raw integer
//! ordering; all comparisons go through the wrap-aware signed difference of
//! [`Ticks`].

#![warn(
    elided_lifetimes_in_paths,
    missing_debug_implementations,
    missing_docs
)]

mod queue;
mod ticks;

pub use queue::{QueueFull, TimerQueue};
pub use ticks::Ticks;

//! The interface the event loop expects from the host I/O driver.
//!
//! The driver owns the actual hardware: USB endpoints, the touch controller,
//! whatever else delivers asynchronous messages. The loop calls into it
//! exactly once per turn with a time budget and the set of interfaces that
//! currently have waiters.

use thiserror::Error;

use crate::task::Value;

/// Identifies a source of asynchronous messages, such as a USB channel or
/// the touch display. Small and driver-assigned.
pub type InterfaceId = u8;

/// What a single poll of the driver produced.
#[derive(Debug, Clone)]
pub enum PollResult {
    /// A message arrived on `iface` within the budget.
    Message {
        /// Interface the message arrived on.
        iface: InterfaceId,
        /// Opaque message payload, delivered verbatim to every task paused
        /// on the interface.
        payload: Value,
    },
    /// The budget elapsed, or the driver woke spuriously, without a
    /// message.
    Timeout,
}

/// Fatal failure reported by the I/O driver.
///
/// The loop makes no attempt to retry or absorb these; they propagate out of
/// [`run`](crate::run) and the enclosing firmware decides.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("i/o driver failure: {0}")]
pub struct DriverError(
    /// Human-readable cause.
    pub String,
);

/// Host I/O driver polled by the event loop once per turn.
pub trait Driver {
    /// Wait up to `budget_us` microseconds for a message on any of
    /// `interfaces`.
    ///
    /// Returning [`PollResult::Timeout`] before the budget has elapsed is
    /// permitted (spurious wakeup); the loop copes by re-deriving its budget
    /// on the next turn.
    fn poll(
        &mut self,
        interfaces: &[InterfaceId],
        budget_us: u32,
    ) -> Result<PollResult, DriverError>;
}

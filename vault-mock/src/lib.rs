//! Mock tick source and scripted I/O driver for exercising the event loop.
//!
//! Tests driven by these types never wait on the real world: the clock only
//! moves when the driver "sleeps", so a test's notion of time is fully
//! deterministic. Script messages ahead of time with
//! [`MockDriver::deliver_at`] / [`MockDriver::deliver_next`]; every poll
//! either hands out the next due message or advances the clock by the whole
//! poll budget and reports a timeout, which is how deadlines fire.

#![warn(
    elided_lifetimes_in_paths,
    missing_debug_implementations,
    missing_docs
)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use vault_executor::clock::{self, TickSource};
use vault_executor::{Driver, DriverError, InterfaceId, PollResult, Value};
use vault_timers::Ticks;

/// Polls answered with an unscripted `MAX_DELAY`-sized timeout before the
/// driver assumes the test lost its tasks and panics.
const STARVATION_LIMIT: u32 = 1000;

/// Shared handle to a manually driven tick counter.
///
/// Clones share the counter. [`install`](MockClock::install) registers the
/// clock as this thread's tick source, replacing the host clock.
#[derive(Clone, Debug, Default)]
pub struct MockClock {
    ticks: Rc<Cell<u32>>,
}

impl MockClock {
    /// Create a clock at instant zero and install it as the scheduler's
    /// tick source for this thread.
    pub fn install() -> Self {
        let mock = MockClock::default();
        clock::set_source(Box::new(mock.clone()));
        mock
    }

    /// Jump to an absolute instant.
    pub fn set(&self, instant: Ticks) {
        self.ticks.set(instant.as_micros());
    }

    /// Advance by `delta_us` microseconds, wrapping through the boundary.
    pub fn advance(&self, delta_us: u32) {
        self.ticks.set(self.ticks.get().wrapping_add(delta_us));
    }

    /// The current instant.
    pub fn now(&self) -> Ticks {
        Ticks::from_micros(self.ticks.get())
    }
}

impl TickSource for MockClock {
    fn now(&self) -> Ticks {
        MockClock::now(self)
    }
}

#[derive(Debug)]
enum Planned {
    Message {
        /// Deliver once the clock has reached this instant; `None` delivers
        /// on the next poll that listens on the interface.
        at: Option<Ticks>,
        iface: InterfaceId,
        payload: Value,
    },
    /// Report a timeout without consuming any budget.
    Spurious,
    /// Fail the poll fatally.
    Fail(String),
}

/// Scripted I/O driver.
///
/// Polls consume a script of planned outcomes. With an empty script the
/// driver advances the [`MockClock`] by the whole poll budget and reports a
/// timeout, so sleeping tasks fire exactly at their deadlines. Every budget
/// the loop asks for is recorded for jitter assertions.
#[derive(Debug)]
pub struct MockDriver {
    clock: MockClock,
    script: VecDeque<Planned>,
    budgets: Vec<u32>,
    starved: u32,
}

impl MockDriver {
    /// A driver with an empty script, moving `clock` while it polls.
    pub fn new(clock: MockClock) -> Self {
        MockDriver {
            clock,
            script: VecDeque::new(),
            budgets: Vec::new(),
            starved: 0,
        }
    }

    /// Deliver `payload` on `iface` at the first poll whose window reaches
    /// `at`; the clock is advanced to `at` on delivery.
    pub fn deliver_at(&mut self, at: Ticks, iface: InterfaceId, payload: Value) {
        self.script.push_back(Planned::Message {
            at: Some(at),
            iface,
            payload,
        });
    }

    /// Deliver `payload` on the next poll that listens on `iface`, without
    /// moving the clock.
    pub fn deliver_next(&mut self, iface: InterfaceId, payload: Value) {
        self.script.push_back(Planned::Message {
            at: None,
            iface,
            payload,
        });
    }

    /// Answer one poll with a spurious timeout: no message, no clock
    /// movement, budget not consumed.
    pub fn spurious_timeout(&mut self) {
        self.script.push_back(Planned::Spurious);
    }

    /// Fail the next poll fatally with `message`.
    pub fn fail_next(&mut self, message: impl Into<String>) {
        self.script.push_back(Planned::Fail(message.into()));
    }

    /// Every poll budget the loop has asked for so far, in order.
    pub fn budgets(&self) -> &[u32] {
        &self.budgets
    }
}

impl Driver for MockDriver {
    fn poll(
        &mut self,
        interfaces: &[InterfaceId],
        budget_us: u32,
    ) -> Result<PollResult, DriverError> {
        self.budgets.push(budget_us);
        let now = self.clock.now();
        let window_end = now.add_micros(budget_us);
        let deliverable = match self.script.front() {
            Some(Planned::Fail(_)) | Some(Planned::Spurious) => true,
            Some(Planned::Message { at, iface, .. }) if interfaces.contains(iface) => {
                match at {
                    None => true,
                    // Due when the instant falls inside this poll's window
                    // (or has already passed).
                    Some(at) => at.diff(window_end) <= 0,
                }
            }
            _ => false,
        };
        if !deliverable {
            // Nothing to hand out this turn; let the budget elapse.
            self.clock.advance(budget_us);
            if self.script.is_empty() && budget_us >= 1_000_000 {
                // Only paused tasks remain and nothing will ever wake them;
                // a real device would idle here forever, a test has lost its
                // tasks.
                self.starved += 1;
                assert!(
                    self.starved < STARVATION_LIMIT,
                    "mock driver starved: paused tasks remain but the script is empty"
                );
            }
            return Ok(PollResult::Timeout);
        }
        match self.script.pop_front() {
            Some(Planned::Fail(message)) => Err(DriverError(message)),
            Some(Planned::Spurious) => Ok(PollResult::Timeout),
            Some(Planned::Message { at, iface, payload }) => {
                if let Some(at) = at {
                    if now.is_before(at) {
                        self.clock.set(at);
                    }
                }
                self.starved = 0;
                Ok(PollResult::Message { iface, payload })
            }
            None => unreachable!("a deliverable poll has a scripted entry"),
        }
    }
}

//! The monotonic microsecond clock behind the event loop.
//!
//! On the device the clock is a free-running hardware counter. The default
//! source here derives the tick count from [`std::time::Instant`] so host
//! builds work out of the box; platforms install their counter and tests a
//! scripted source through [`set_source`].

use std::cell::RefCell;
use std::time::Instant;

use vault_timers::Ticks;

/// A source of monotonic microsecond ticks.
///
/// Implementations wrap through the 32-bit boundary; consumers compare
/// instants only via [`Ticks::diff`].
pub trait TickSource {
    /// The current instant.
    fn now(&self) -> Ticks;
}

struct HostTicks {
    origin: Instant,
}

impl TickSource for HostTicks {
    fn now(&self) -> Ticks {
        Ticks::from_micros(self.origin.elapsed().as_micros() as u32)
    }
}

thread_local! {
    static SOURCE: RefCell<Box<dyn TickSource>> = RefCell::new(Box::new(HostTicks {
        origin: Instant::now(),
    }));
}

/// The current instant on the loop's clock.
pub fn now() -> Ticks {
    SOURCE.with_borrow(|source| source.now())
}

/// Replace the tick source for this thread's scheduler.
pub fn set_source(source: Box<dyn TickSource>) {
    SOURCE.with_borrow_mut(|slot| *slot = source);
}

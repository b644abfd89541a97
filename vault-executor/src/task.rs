use std::any::{self, Any};
use std::fmt;
use std::rc::Rc;

use slotmap::new_key_type;

use crate::error::Error;
use crate::io::InterfaceId;
use crate::request::{Race, Request, Signal};

new_key_type! {
    /// Stable identity of a task known to the scheduler.
    ///
    /// Assigned when the task is first handed to [`schedule`](crate::schedule);
    /// the timer queue, the paused index and the finalizer table all key on
    /// this id, never on the task object itself.
    pub struct TaskId;
}

/// An opaque payload passed between tasks and the scheduler.
///
/// Resume values, I/O message payloads and task results all travel as
/// `Value`s. The scheduler never looks inside one; the receiving task
/// downcasts on arrival. Cloning is cheap (shared ownership), which is what
/// lets a single I/O payload wake a whole set of paused tasks.
#[derive(Clone)]
pub struct Value {
    inner: Rc<dyn Any>,
    type_name: &'static str,
}

impl Value {
    /// Wrap `inner` for delivery.
    pub fn new<T: Any>(inner: T) -> Self {
        Value {
            inner: Rc::new(inner),
            type_name: any::type_name::<T>(),
        }
    }

    /// The unit value, for tasks with nothing to deliver.
    pub fn none() -> Self {
        Value::new(())
    }

    /// Borrow the payload as `T`, if that is what it is.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }

    /// Copy the payload out as `T`, if that is what it is.
    pub fn copied<T: Any + Copy>(&self) -> Option<T> {
        self.downcast_ref().copied()
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::none()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value<{}>", self.type_name)
    }
}

/// What a resumption delivers into a task, and what a finalizer receives when
/// the task terminates: a plain value, or a failure.
///
/// `Err(Error::Cancelled)` is the cancellation marker.
pub type Outcome = Result<Value, Error>;

/// One-shot callback fired when a task reaches any terminal state: normal
/// return, failure, or cancellation.
pub type Finalizer = Box<dyn FnOnce(TaskId, Outcome)>;

/// A suspendable unit of control.
///
/// Application flows implement `Task` as small state machines: each call to
/// [`resume`](Task::resume) runs the flow until it either suspends again or
/// terminates. Flows suspend by returning [`Step::Pending`] with a
/// [`Request`] for the scheduler (a delay, an I/O wait, a signal, a race)
/// and receive the reply through `input` on the next resumption.
///
/// Between two suspension points a task has exclusive access to all
/// process-wide state; the scheduler is single-threaded and never preempts.
pub trait Task {
    /// Run the task until its next suspension point or completion.
    ///
    /// `input` carries what the task asked for (the computed deadline after
    /// a sleep, the message payload after an I/O wait) or an injected
    /// failure, which the task should treat as raised at its current
    /// suspension point.
    fn resume(&mut self, input: Outcome) -> Step;

    /// Unwind hook, invoked when the task is cancelled via
    /// [`close`](crate::close).
    ///
    /// A task suspended on a [`Signal`] must clear the waiter slot here
    /// ([`Signal::forget_waiter`]), and a task awaiting a [`Race`] must abort
    /// its children ([`Race::abort`]), so no dead task is ever woken.
    /// Failures returned from the hook are logged and swallowed.
    fn cancel(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Result of a single resumption.
#[derive(Debug)]
pub enum Step {
    /// The task suspended, yielding an object for the scheduler to
    /// interpret. Anything that is not a [`Request`] is a programmer error:
    /// the scheduler logs it and discards the task.
    Pending(Value),
    /// The task suspended without asking for anything; it is rescheduled at
    /// the current instant (a voluntary yield).
    Yielded,
    /// The task ran to completion with a result.
    Done(Value),
    /// A failure escaped the task body.
    Failed(Error),
}

impl Step {
    /// Suspend until `delay_us` microseconds have elapsed. The task resumes
    /// with the computed deadline ([`Ticks`](crate::Ticks)), so it can
    /// measure scheduling jitter.
    pub fn sleep(delay_us: u32) -> Self {
        Step::request(Request::Sleep(delay_us))
    }

    /// Suspend until a message arrives on `iface`. The task resumes with the
    /// delivered payload.
    pub fn wait(iface: InterfaceId) -> Self {
        Step::request(Request::Wait(iface))
    }

    /// Suspend until `signal` delivers a value.
    pub fn signal(signal: &Signal) -> Self {
        Step::request(Request::Signal(signal.clone()))
    }

    /// Start the race's children and suspend until the first one finishes.
    pub fn race(race: &Race) -> Self {
        Step::request(Request::Race(race.clone()))
    }

    /// Complete with the unit value.
    pub fn done() -> Self {
        Step::Done(Value::none())
    }

    fn request(request: Request) -> Self {
        Step::Pending(Value::new(request))
    }
}

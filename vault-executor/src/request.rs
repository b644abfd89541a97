//! The requests a task may yield to the scheduler.
//!
//! Tasks communicate with the event loop exclusively by suspending on one of
//! these values; the stepper interprets the request and parks the task until
//! the requested event occurs. `Sleep` and `Wait` are plain data; [`Signal`]
//! and [`Race`] are cloneable handles with shared state, since both sides of
//! a rendezvous (and a parent plus the scheduler) need to see the same slots.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::io::InterfaceId;
use crate::machinery;
use crate::task::{Finalizer, Outcome, Task, TaskId, Value};

/// A scheduler request, yielded via [`Step::Pending`](crate::Step::Pending).
#[derive(Clone, Debug)]
pub enum Request {
    /// Resume the task `delay_us` microseconds from now. The resume value is
    /// the computed deadline, both as payload and as timer key.
    Sleep(u32),
    /// Resume the task when a message arrives on the interface.
    Wait(InterfaceId),
    /// Resume the task when the signal delivers a value.
    Signal(Signal),
    /// Start the race's children and resume the task when the first of them
    /// finishes.
    Race(Race),
}

/// Single-slot rendezvous between one waiting task and one sender.
///
/// A `Signal` has two independent slots: a pending value and a waiting task.
/// Delivery fires as soon as both are present: the waiter is scheduled with
/// the value at the current instant and both slots clear atomically. Clones
/// share the same slots.
///
/// ```
/// # use vault_executor::{Signal, Value};
/// let signal = Signal::new();
/// signal.send(Value::new(42u32)).unwrap();
/// // in some task: return Step::signal(&signal) to await the value
/// # signal.reset();
/// ```
#[derive(Clone, Default)]
pub struct Signal {
    slots: Rc<RefCell<Slots>>,
}

#[derive(Default)]
struct Slots {
    value: Option<Outcome>,
    waiter: Option<TaskId>,
}

impl Signal {
    /// A fresh signal with both slots empty.
    pub fn new() -> Self {
        Signal::default()
    }

    /// Store `value` for the waiter; delivers immediately if one is present.
    ///
    /// The waiter becomes runnable no earlier than the sender's next
    /// suspension; delivery schedules, it never runs the waiter inline.
    pub fn send(&self, value: Value) -> Result<(), Error> {
        self.slots.borrow_mut().value = Some(Ok(value));
        self.deliver()
    }

    /// Like [`send`](Signal::send), but the waiter resumes with a failure
    /// injected at its suspension point.
    pub fn send_failure(&self, error: Error) -> Result<(), Error> {
        self.slots.borrow_mut().value = Some(Err(error));
        self.deliver()
    }

    /// Clear both slots without delivering.
    pub fn reset(&self) {
        let mut slots = self.slots.borrow_mut();
        slots.value = None;
        slots.waiter = None;
    }

    /// Drop the waiting task, if any, without delivering.
    ///
    /// Called from the waiter's unwind path ([`Task::cancel`]) so that a
    /// later `send` does not fire on a dead task. The pending-value slot is
    /// left alone.
    pub fn forget_waiter(&self) {
        self.slots.borrow_mut().waiter = None;
    }

    /// Whether both slots are empty.
    pub fn is_empty(&self) -> bool {
        let slots = self.slots.borrow();
        slots.value.is_none() && slots.waiter.is_none()
    }

    /// Park `task` as the waiter. Invoked by the stepper when a task yields
    /// [`Request::Signal`].
    pub(crate) fn handle(&self, task: TaskId) -> Result<(), Error> {
        self.slots.borrow_mut().waiter = Some(task);
        self.deliver()
    }

    fn deliver(&self) -> Result<(), Error> {
        let ready = {
            let mut slots = self.slots.borrow_mut();
            if slots.value.is_some() && slots.waiter.is_some() {
                slots.waiter.take().zip(slots.value.take())
            } else {
                None
            }
        };
        match ready {
            Some((task, outcome)) => machinery::reschedule(task, outcome, None),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.borrow();
        f.debug_struct("Signal")
            .field("pending", &slots.value.is_some())
            .field("waiter", &slots.waiter)
            .finish()
    }
}

/// Composite awaitable that starts several child tasks and completes when
/// the first of them finishes.
///
/// The parent builds a race with [`with`](Race::with), then suspends on it
/// via [`Step::race`](crate::Step::race). Every child is materialized as a
/// fresh task with the race's internal finalizer installed; when the first
/// child terminates, normally or by failure, the parent is scheduled with
/// that child's outcome, and by default the remaining children are cancelled.
/// [`winner`](Race::winner) tells the parent which child (by position) it
/// was.
///
/// A race needs at least one runnable child; otherwise the parent resumes
/// with [`Error::EmptyRace`]. The children are moved into the scheduler when
/// the race starts, so a race is single-use.
///
/// There is no dedicated timeout primitive: a timeout is a race between the
/// work and a sleep.
///
/// A parent that is itself cancelled while the race runs must cancel the
/// children from its unwind path by calling [`abort`](Race::abort).
#[derive(Clone, Default)]
pub struct Race {
    inner: Rc<RefCell<RaceInner>>,
}

#[derive(Default)]
struct RaceInner {
    children: Vec<Option<Box<dyn Task>>>,
    keep_others: bool,
    parent: Option<TaskId>,
    /// Ids of the materialized children, by child position.
    running: Vec<TaskId>,
    /// Positions of children that resolved the race; at most one entry.
    finished: Vec<usize>,
    /// Set once the race has delivered to (or been abandoned by) the parent;
    /// all later child finalizations are no-ops at the race level.
    resolved: bool,
}

impl Race {
    /// A race with no children yet.
    pub fn new() -> Self {
        Race::default()
    }

    /// Add a child flow.
    pub fn with(self, child: impl Task + 'static) -> Self {
        self.inner
            .borrow_mut()
            .children
            .push(Some(Box::new(child)));
        self
    }

    /// Let the losing children keep running after the first one finishes.
    pub fn keep_others(self) -> Self {
        self.inner.borrow_mut().keep_others = true;
        self
    }

    /// Position of the child that finished first, once the race resolved.
    pub fn winner(&self) -> Option<usize> {
        self.inner.borrow().finished.first().copied()
    }

    /// Positions of the children that resolved the race.
    pub fn finished(&self) -> Vec<usize> {
        self.inner.borrow().finished.clone()
    }

    /// Cancel every child that is still running.
    ///
    /// This is the parent's unwind path: a parent cancelled while suspended
    /// on the race calls `abort` from [`Task::cancel`]. Also safe to call
    /// after the race resolved, when it does nothing.
    pub fn abort(&self) {
        self.exit(None);
    }

    /// Start the children on behalf of `parent`. Invoked by the stepper when
    /// a task yields [`Request::Race`].
    pub(crate) fn handle(&self, parent: TaskId) -> Result<(), Error> {
        let flows = {
            let mut inner = self.inner.borrow_mut();
            let flows: Vec<(usize, Box<dyn Task>)> = inner
                .children
                .iter_mut()
                .enumerate()
                .filter_map(|(index, slot)| slot.take().map(|flow| (index, flow)))
                .collect();
            if flows.is_empty() {
                return Err(Error::EmptyRace);
            }
            inner.parent = Some(parent);
            inner.running.clear();
            inner.finished.clear();
            inner.resolved = false;
            flows
        };
        for (index, flow) in flows {
            match machinery::schedule_boxed(flow, None, None, Some(self.finalizer(index))) {
                Ok(id) => self.inner.borrow_mut().running.push(id),
                Err(err) => {
                    // Cannot start the whole set: tear down what already
                    // runs and report to the caller.
                    self.exit(None);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn finalizer(&self, index: usize) -> Finalizer {
        let race = self.clone();
        Box::new(move |child, outcome| race.on_child_finish(index, child, outcome))
    }

    /// Cancel every running child except `keep`.
    fn exit(&self, keep: Option<TaskId>) {
        let doomed: Vec<TaskId> = {
            let mut inner = self.inner.borrow_mut();
            inner.resolved = true;
            inner
                .running
                .iter()
                .copied()
                .filter(|id| Some(*id) != keep)
                .collect()
        };
        // The borrow is released first: closing a child fires its finalizer,
        // which lands back in `on_child_finish`.
        for id in doomed {
            machinery::close(id);
        }
    }

    fn on_child_finish(&self, index: usize, child: TaskId, outcome: Outcome) {
        let parent = {
            let mut inner = self.inner.borrow_mut();
            if inner.resolved {
                // A sibling already resolved the race, or the parent aborted
                // it; this child's own resources are released elsewhere.
                return;
            }
            inner.resolved = true;
            inner.finished.push(index);
            inner.parent.take()
        };
        if !self.inner.borrow().keep_others {
            self.exit(Some(child));
        }
        let Some(parent) = parent else { return };
        if let Err(err) = machinery::reschedule(parent, outcome, None) {
            log::error!("cannot resume race parent {parent:?}: {err}");
        }
    }
}

impl fmt::Debug for Race {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Race")
            .field("children", &inner.children.len())
            .field("running", &inner.running)
            .field("finished", &inner.finished)
            .field("resolved", &inner.resolved)
            .finish()
    }
}

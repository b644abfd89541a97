//! The scheduler's state tables, the task stepper and the event loop.
//!
//! All state is thread-local; the scheduler is strictly single-threaded and
//! application flows rely on that: between two suspension points a task has
//! exclusive access to everything. Tasks are taken out of the table while
//! they execute, so a task (or a finalizer, or the after-step hook) can call
//! back into any public operation here without observing a double borrow.

use std::cell::{Cell, RefCell};
use std::mem;

use slotmap::{SecondaryMap, SlotMap};
use smallvec::SmallVec;
use vault_timers::{Ticks, TimerQueue};

use crate::clock;
use crate::error::Error;
use crate::io::{Driver, InterfaceId, PollResult};
use crate::paused::PausedIndex;
use crate::request::Request;
use crate::task::{Finalizer, Outcome, Step, Task, TaskId, Value};

/// Capacity of the timer queue. Exceeding it surfaces
/// [`Error::QueueFull`] from [`schedule`].
pub const QUEUE_CAPACITY: usize = 64;

/// Poll budget when only paused tasks remain and no deadline bounds the
/// wait, leaving room for external wakes.
const MAX_DELAY_US: u32 = 1_000_000;

/// `None` while the task is executing on the stepper's stack.
type TaskSlot = Option<Box<dyn Task>>;

thread_local! {
    static TASKS: RefCell<SlotMap<TaskId, TaskSlot>> = RefCell::default();
    static TIMERS: RefCell<TimerQueue<TaskId, Outcome>> =
        RefCell::new(TimerQueue::with_capacity(QUEUE_CAPACITY));
    static PAUSED: RefCell<PausedIndex> = RefCell::default();
    static FINALIZERS: RefCell<SecondaryMap<TaskId, Finalizer>> = RefCell::default();
    static AFTER_STEP: RefCell<Option<Box<dyn FnMut()>>> = RefCell::default();
    static RUNNING: Cell<bool> = const { Cell::new(false) };
}

/// Materialize `task` and schedule it to run at the current instant.
pub fn schedule(task: impl Task + 'static) -> Result<TaskId, Error> {
    schedule_with(task, None, None, None)
}

/// Materialize `task` and schedule it with an explicit resume value,
/// deadline and finalizer.
///
/// `value` is delivered into the task's first resumption (unit when absent);
/// `deadline` defaults to the current instant; `finalizer` fires exactly
/// once when the task terminates, whether it returns, fails or is cancelled.
/// Does not start the loop itself, see [`run`].
pub fn schedule_with(
    task: impl Task + 'static,
    value: Option<Value>,
    deadline: Option<Ticks>,
    finalizer: Option<Finalizer>,
) -> Result<TaskId, Error> {
    schedule_boxed(Box::new(task), value, deadline, finalizer)
}

pub(crate) fn schedule_boxed(
    task: Box<dyn Task>,
    value: Option<Value>,
    deadline: Option<Ticks>,
    finalizer: Option<Finalizer>,
) -> Result<TaskId, Error> {
    let id = TASKS.with_borrow_mut(|tasks| tasks.insert(Some(task)));
    if let Some(finalizer) = finalizer {
        FINALIZERS.with_borrow_mut(|finalizers| finalizers.insert(id, finalizer));
    }
    match reschedule(id, Ok(value.unwrap_or_default()), deadline) {
        Ok(()) => Ok(id),
        Err(err) => {
            // Back out completely; the task never ran, so no finalizer fires.
            FINALIZERS.with_borrow_mut(|finalizers| finalizers.remove(id));
            let task = TASKS.with_borrow_mut(|tasks| tasks.remove(id));
            drop(task); // destructor outside the borrow
            Err(err)
        }
    }
}

/// Put an existing task (back) on the timer queue.
pub(crate) fn reschedule(
    task: TaskId,
    outcome: Outcome,
    deadline: Option<Ticks>,
) -> Result<(), Error> {
    let deadline = deadline.unwrap_or_else(clock::now);
    TIMERS.with_borrow_mut(|timers| {
        debug_assert!(!timers.contains(task), "task is already scheduled");
        timers.push(deadline, task, outcome)
    })?;
    Ok(())
}

/// Park `task` until a message arrives on `iface`.
///
/// Usually invoked indirectly, by the task yielding
/// [`Request::Wait`](crate::Request::Wait).
pub fn pause(task: TaskId, iface: InterfaceId) {
    PAUSED.with_borrow_mut(|paused| paused.park(task, iface));
}

/// Cancel `task`.
///
/// Synchronous and idempotent: removes the task from the timer queue and
/// from every paused set, runs its unwind hook ([`Task::cancel`], failures
/// logged and swallowed), and fires its finalizer with the cancellation
/// marker. After `close` returns the task is never resumed again.
///
/// Cancellation never preempts: a task is only ever cancelled while it is
/// suspended.
pub fn close(task: TaskId) {
    TIMERS.with_borrow_mut(|timers| timers.remove(task));
    PAUSED.with_borrow_mut(|paused| paused.discard(task));
    let Some(slot) = TASKS.with_borrow_mut(|tasks| tasks.remove(task)) else {
        return; // already finished or never existed
    };
    match slot {
        Some(mut flow) => {
            if let Err(err) = flow.cancel() {
                log::warn!("unwind failure in cancelled task {task:?}: {err}");
            }
            drop(flow); // destructor may call back into the scheduler
        }
        // The task is on the stepper's stack closing itself; its unwind hook
        // cannot run, but the terminal bookkeeping still must.
        None => log::warn!("close() on the currently executing task {task:?}"),
    }
    finalize(task, Err(Error::Cancelled));
}

/// Drop all scheduler state, forgetting every task without running unwind
/// hooks or finalizers. Testing only.
pub fn clear() {
    TIMERS.with_borrow_mut(|timers| while timers.pop().is_some() {});
    PAUSED.with_borrow_mut(PausedIndex::clear);
    FINALIZERS.with_borrow_mut(SecondaryMap::clear);
    let tasks = TASKS.with_borrow_mut(mem::take);
    drop(tasks); // destructors may call back into the scheduler
}

/// Install (or with `None`, remove) a hook invoked after every task step.
///
/// The hook runs at a quiescent point and may call any public scheduler
/// operation except [`run`]. A hook installed from within the hook replaces
/// the running one.
pub fn set_after_step_hook(hook: Option<Box<dyn FnMut()>>) {
    AFTER_STEP.with_borrow_mut(|slot| *slot = hook);
}

/// Snapshot of the scheduler's bookkeeping, for debug output and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Entries in the timer queue.
    pub scheduled: usize,
    /// Tasks parked on an I/O interface.
    pub paused: usize,
    /// Live tasks known to the scheduler.
    pub tasks: usize,
}

/// Read the current [`Stats`].
pub fn stats() -> Stats {
    Stats {
        scheduled: TIMERS.with_borrow(TimerQueue::len),
        paused: PAUSED.with_borrow(PausedIndex::waiter_count),
        tasks: TASKS.with_borrow(SlotMap::len),
    }
}

/// Enter the event loop, polling `io` between task steps.
///
/// Every loop turn either delivers one I/O message, stepping the whole set
/// of tasks paused on that interface before anything else runs, or, on
/// timeout, steps the task with the earliest deadline. Returns once no
/// scheduled or paused work remains.
///
/// Task failures never propagate out of here; they are routed to the
/// failing task's finalizer. A failure from the driver is fatal and surfaces
/// as [`Error::Driver`]. Re-entering `run` from a task or hook is a
/// programmer error and panics.
pub fn run(io: &mut impl Driver) -> Result<(), Error> {
    let _guard = RunGuard::enter();
    while has_work() {
        let budget = TIMERS.with_borrow(|timers| match timers.peek_time() {
            Some(deadline) => deadline.diff(clock::now()).max(0) as u32,
            None => MAX_DELAY_US,
        });
        let interfaces: SmallVec<[InterfaceId; 8]> =
            PAUSED.with_borrow(|paused| paused.interfaces().collect());
        match io.poll(&interfaces, budget)? {
            PollResult::Message { iface, payload } => {
                let woken = PAUSED.with_borrow_mut(|paused| paused.take(iface));
                for task in woken {
                    step(task, Ok(payload.clone()));
                }
            }
            PollResult::Timeout => {
                let due = TIMERS.with_borrow_mut(TimerQueue::pop);
                if let Some((_, task, outcome)) = due {
                    step(task, outcome);
                }
            }
        }
    }
    Ok(())
}

fn has_work() -> bool {
    TIMERS.with_borrow(|timers| !timers.is_empty())
        || PAUSED.with_borrow(|paused| !paused.is_empty())
}

/// Resume `task` with `input` and dispatch whatever it does next.
///
/// Completion and failure both funnel through [`finalize`] here and
/// nowhere else.
fn step(task: TaskId, input: Outcome) {
    let taken = TASKS.with_borrow_mut(|tasks| tasks.get_mut(task).and_then(Option::take));
    let Some(mut flow) = taken else {
        // Stale wake: the task was closed between scheduling and stepping.
        log::trace!("step on dead task {task:?}");
        return;
    };
    match flow.resume(input) {
        Step::Pending(yielded) => {
            put_back(task, flow);
            dispatch(task, &yielded);
        }
        Step::Yielded => {
            put_back(task, flow);
            if let Err(err) = reschedule(task, Ok(Value::none()), None) {
                log::error!("cannot reschedule yielded task {task:?}: {err}");
                fail_task(task, err);
            }
        }
        Step::Done(value) => {
            log::debug!("finish: {task:?}");
            let slot = TASKS.with_borrow_mut(|tasks| tasks.remove(task));
            drop(slot);
            finalize(task, Ok(value));
        }
        Step::Failed(err) => {
            log::debug!("task {task:?} failed: {err}");
            let slot = TASKS.with_borrow_mut(|tasks| tasks.remove(task));
            drop(slot);
            finalize(task, Err(err));
        }
    }
    run_after_step_hook();
}

/// Interpret the object a task suspended on.
fn dispatch(task: TaskId, yielded: &Value) {
    let Some(request) = yielded.downcast_ref::<Request>() else {
        log::error!("unknown request from task {task:?}: {yielded:?}");
        discard(task);
        return;
    };
    let handled = match request {
        Request::Sleep(delay_us) => {
            let deadline = clock::now().add_micros(*delay_us);
            reschedule(task, Ok(Value::new(deadline)), Some(deadline))
        }
        Request::Wait(iface) => {
            pause(task, *iface);
            Ok(())
        }
        Request::Signal(signal) => signal.handle(task),
        Request::Race(race) => race.handle(task),
    };
    if let Err(err) = handled {
        log::error!("request failed for task {task:?}: {err}");
        // Surface the failure at the task's suspension point if a queue slot
        // can still be found; otherwise the task dies through its finalizer.
        if reschedule(task, Err(err.clone()), None).is_err() {
            fail_task(task, err);
        }
    }
}

/// Fire and consume the task's finalizer, if one is installed.
pub(crate) fn finalize(task: TaskId, outcome: Outcome) {
    let finalizer = FINALIZERS.with_borrow_mut(|finalizers| finalizers.remove(task));
    if let Some(finalizer) = finalizer {
        finalizer(task, outcome);
    }
}

/// Return a suspended task to the table.
fn put_back(task: TaskId, flow: Box<dyn Task>) {
    let leftover = TASKS.with_borrow_mut(|tasks| match tasks.get_mut(task) {
        Some(slot) => {
            *slot = Some(flow);
            None
        }
        // The task closed itself while running; nothing to return to.
        None => Some(flow),
    });
    drop(leftover);
}

/// Terminate a task through its finalizer with `err`.
fn fail_task(task: TaskId, err: Error) {
    let slot = TASKS.with_borrow_mut(|tasks| tasks.remove(task));
    drop(slot);
    finalize(task, Err(err));
}

/// Drop a task that yielded garbage. No finalizer call is made for a
/// dropped task; the stale finalizer entry is discarded with it.
fn discard(task: TaskId) {
    let slot = TASKS.with_borrow_mut(|tasks| tasks.remove(task));
    let finalizer = FINALIZERS.with_borrow_mut(|finalizers| finalizers.remove(task));
    drop(slot);
    drop(finalizer);
}

fn run_after_step_hook() {
    // The hook is taken out of its slot while it runs, so it may freely call
    // back into the scheduler or install a replacement (which then wins).
    let hook = AFTER_STEP.with_borrow_mut(Option::take);
    if let Some(mut hook) = hook {
        hook();
        AFTER_STEP.with_borrow_mut(|slot| {
            if slot.is_none() {
                *slot = Some(hook);
            }
        });
    }
}

struct RunGuard(());

impl RunGuard {
    fn enter() -> Self {
        RUNNING.with(|running| {
            assert!(!running.get(), "run() called re-entrantly");
            running.set(true);
        });
        RunGuard(())
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        RUNNING.with(|running| running.set(false));
    }
}

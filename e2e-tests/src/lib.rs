//! Test-support flows for the event-loop end-to-end tests.
//!
//! Application firmware writes its flows as state machines over [`Step`];
//! the flows here are miniature versions of those (sleepers, waiters,
//! senders, race parents), instrumented to journal every observable event
//! so tests can assert on exact sequences.
//!
//! Journal entry formats:
//!
//! - `label@micros`: a sleeper woke with the given deadline
//! - `label:42`: a waiter received a `u32` payload
//! - `label:sent`: a sender delivered into a signal
//! - `label:won2:500`: a race parent resumed; child 2 won with value 500
//! - `label:err:<message>`: a flow resumed with an injected failure
//! - `label:cancelled`: a flow's unwind hook ran
//! - `fin:label:<ok|cancelled|err>`: an installed finalizer fired

use std::cell::RefCell;
use std::rc::Rc;

use vault_executor::{
    close, Error, Finalizer, InterfaceId, Outcome, Race, Signal, Step, Task, TaskId, Value,
};
use vault_timers::Ticks;

/// Initialize test logging; safe to call from every test.
pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Shared journal the flows append to.
#[derive(Clone, Debug, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    /// A fresh, empty journal.
    pub fn new() -> Self {
        Journal::default()
    }

    /// Append an entry.
    pub fn note(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    /// Everything journaled so far, in order.
    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

fn render(value: &Value) -> String {
    if let Some(ticks) = value.copied::<Ticks>() {
        ticks.as_micros().to_string()
    } else if let Some(n) = value.copied::<u32>() {
        n.to_string()
    } else {
        "?".to_string()
    }
}

/// A finalizer that journals `fin:label:<outcome>`.
pub fn journal_finalizer(journal: &Journal, label: &'static str) -> Finalizer {
    let journal = journal.clone();
    Box::new(move |_task: TaskId, outcome: Outcome| {
        let kind = match &outcome {
            Ok(_) => "ok",
            Err(err) if err.is_cancelled() => "cancelled",
            Err(_) => "err",
        };
        journal.note(format!("fin:{label}:{kind}"));
    })
}

/// Sleeps once, journals the deadline it woke with, and finishes with it.
pub struct Sleeper {
    label: &'static str,
    delay_us: u32,
    started: bool,
    journal: Journal,
}

impl Sleeper {
    /// A sleeper journaling as `label`.
    pub fn new(label: &'static str, delay_us: u32, journal: &Journal) -> Self {
        Sleeper {
            label,
            delay_us,
            started: false,
            journal: journal.clone(),
        }
    }
}

impl Task for Sleeper {
    fn resume(&mut self, input: Outcome) -> Step {
        if !self.started {
            self.started = true;
            return Step::sleep(self.delay_us);
        }
        match input {
            Ok(value) => {
                let woke = value.copied::<Ticks>().expect("sleep resumes with its deadline");
                self.journal.note(format!("{}@{}", self.label, woke.as_micros()));
                Step::Done(value)
            }
            Err(err) => {
                self.journal.note(format!("{}:err:{}", self.label, err));
                Step::Failed(err)
            }
        }
    }

    fn cancel(&mut self) -> Result<(), Error> {
        self.journal.note(format!("{}:cancelled", self.label));
        Ok(())
    }
}

/// Waits for one message on an interface and journals its `u32` payload.
pub struct Waiter {
    label: &'static str,
    iface: InterfaceId,
    started: bool,
    journal: Journal,
}

impl Waiter {
    /// A waiter on `iface`, journaling as `label`.
    pub fn new(label: &'static str, iface: InterfaceId, journal: &Journal) -> Self {
        Waiter {
            label,
            iface,
            started: false,
            journal: journal.clone(),
        }
    }
}

impl Task for Waiter {
    fn resume(&mut self, input: Outcome) -> Step {
        if !self.started {
            self.started = true;
            return Step::wait(self.iface);
        }
        match input {
            Ok(value) => {
                self.journal.note(format!("{}:{}", self.label, render(&value)));
                Step::Done(value)
            }
            Err(err) => {
                self.journal.note(format!("{}:err:{}", self.label, err));
                Step::Failed(err)
            }
        }
    }

    fn cancel(&mut self) -> Result<(), Error> {
        self.journal.note(format!("{}:cancelled", self.label));
        Ok(())
    }
}

/// Awaits a [`Signal`] and journals the delivered `u32`.
pub struct SignalWaiter {
    label: &'static str,
    signal: Signal,
    started: bool,
    journal: Journal,
}

impl SignalWaiter {
    /// A waiter on `signal`, journaling as `label`.
    pub fn new(label: &'static str, signal: &Signal, journal: &Journal) -> Self {
        SignalWaiter {
            label,
            signal: signal.clone(),
            started: false,
            journal: journal.clone(),
        }
    }
}

impl Task for SignalWaiter {
    fn resume(&mut self, input: Outcome) -> Step {
        if !self.started {
            self.started = true;
            return Step::signal(&self.signal);
        }
        match input {
            Ok(value) => {
                self.journal.note(format!("{}:{}", self.label, render(&value)));
                Step::Done(value)
            }
            Err(err) => {
                self.journal.note(format!("{}:err:{}", self.label, err));
                Step::Failed(err)
            }
        }
    }

    fn cancel(&mut self) -> Result<(), Error> {
        // A cancelled waiter must clear the slot so a later send cannot
        // fire on a dead task.
        self.signal.forget_waiter();
        self.journal.note(format!("{}:cancelled", self.label));
        Ok(())
    }
}

/// Sends a `u32` into a [`Signal`] and finishes.
pub struct SignalSender {
    label: &'static str,
    signal: Signal,
    value: u32,
    journal: Journal,
}

impl SignalSender {
    /// A sender delivering `value` into `signal`, journaling as `label`.
    pub fn new(label: &'static str, signal: &Signal, value: u32, journal: &Journal) -> Self {
        SignalSender {
            label,
            signal: signal.clone(),
            value,
            journal: journal.clone(),
        }
    }
}

impl Task for SignalSender {
    fn resume(&mut self, _input: Outcome) -> Step {
        if let Err(err) = self.signal.send(Value::new(self.value)) {
            return Step::Failed(err);
        }
        self.journal.note(format!("{}:sent", self.label));
        Step::done()
    }
}

/// Suspends on a [`Race`] and journals which child won, or the failure.
pub struct RaceParent {
    label: &'static str,
    race: Race,
    started: bool,
    journal: Journal,
}

impl RaceParent {
    /// A parent awaiting `race`, journaling as `label`.
    pub fn new(label: &'static str, race: &Race, journal: &Journal) -> Self {
        RaceParent {
            label,
            race: race.clone(),
            started: false,
            journal: journal.clone(),
        }
    }
}

impl Task for RaceParent {
    fn resume(&mut self, input: Outcome) -> Step {
        if !self.started {
            self.started = true;
            return Step::race(&self.race);
        }
        match input {
            Ok(value) => {
                let winner = self
                    .race
                    .winner()
                    .map(|index| index.to_string())
                    .unwrap_or_else(|| "x".to_string());
                self.journal
                    .note(format!("{}:won{}:{}", self.label, winner, render(&value)));
                Step::Done(value)
            }
            Err(err) => {
                self.journal.note(format!("{}:err:{}", self.label, err));
                Step::Failed(err)
            }
        }
    }

    fn cancel(&mut self) -> Result<(), Error> {
        self.journal.note(format!("{}:cancelled", self.label));
        // The parent's unwind is responsible for fanning out cancellation.
        self.race.abort();
        Ok(())
    }
}

/// Journals `label:ran` on its first resumption and finishes.
pub struct Returner {
    label: &'static str,
    journal: Journal,
}

impl Returner {
    /// A one-shot flow journaling as `label`.
    pub fn new(label: &'static str, journal: &Journal) -> Self {
        Returner {
            label,
            journal: journal.clone(),
        }
    }
}

impl Task for Returner {
    fn resume(&mut self, _input: Outcome) -> Step {
        self.journal.note(format!("{}:ran", self.label));
        Step::done()
    }
}

/// Yields a plain integer instead of a request, a programmer error the
/// scheduler is expected to log and absorb.
#[derive(Debug, Default)]
pub struct YieldsGarbage;

impl Task for YieldsGarbage {
    fn resume(&mut self, _input: Outcome) -> Step {
        Step::Pending(Value::new(5i32))
    }
}

/// Closes another task by id, then finishes.
pub struct Closer {
    target: TaskId,
}

impl Closer {
    /// A flow that cancels `target` when it runs.
    pub fn new(target: TaskId) -> Self {
        Closer { target }
    }
}

impl Task for Closer {
    fn resume(&mut self, _input: Outcome) -> Step {
        close(self.target);
        Step::done()
    }
}

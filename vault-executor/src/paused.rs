use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::io::InterfaceId;
use crate::task::TaskId;

/// Waiters per interface, usually one or two per set.
pub(crate) type Waiters = SmallVec<[TaskId; 4]>;

/// Index of tasks paused on I/O.
///
/// A task sits in at most one set at a time; [`park`](PausedIndex::park)
/// enforces that by discarding the task from every other set first.
#[derive(Debug, Default)]
pub(crate) struct PausedIndex {
    waiters: BTreeMap<InterfaceId, Waiters>,
}

impl PausedIndex {
    /// Park `task` until a message arrives on `iface`.
    pub(crate) fn park(&mut self, task: TaskId, iface: InterfaceId) {
        self.discard(task);
        self.waiters.entry(iface).or_default().push(task);
    }

    /// Remove and return every task parked on `iface`.
    pub(crate) fn take(&mut self, iface: InterfaceId) -> Waiters {
        self.waiters.remove(&iface).unwrap_or_default()
    }

    /// Drop `task` from every set. Used during cancellation.
    pub(crate) fn discard(&mut self, task: TaskId) {
        self.waiters.retain(|_, waiters| {
            waiters.retain(|waiter| *waiter != task);
            !waiters.is_empty()
        });
    }

    /// Forget every waiter.
    pub(crate) fn clear(&mut self) {
        self.waiters.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.values().map(Waiters::len).sum()
    }

    /// Interfaces that currently have waiters, in ascending order.
    pub(crate) fn interfaces(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        self.waiters.keys().copied()
    }
}

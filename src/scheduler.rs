// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task slot allocation and state transitions.
//!
//! Single-threaded: no work stealing, no worker pool. One `Scheduler` backs
//! exactly one `Runtime` on one thread.

use crate::bitset::BitSet;
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::task::{Task, TaskState, Trampoline};

pub(crate) struct Scheduler {
    tasks: Pool<Task>,
    runnable: BitSet,
}

impl Scheduler {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tasks: Pool::with_capacity(capacity),
            runnable: BitSet::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.tasks.capacity()
    }

    pub fn occupied_count(&self) -> usize {
        self.tasks.occupied_count()
    }

    /// Allocate a slot for an immediately-runnable task.
    pub fn spawn(&mut self, trampoline: Trampoline, file: &'static str, line: u32) -> Result<usize> {
        let index = self.reserve_index()?;
        let task = Task::new(index, trampoline, file, line);
        self.tasks.borrow_assume_unset(index, task);
        self.runnable.set(index);
        Ok(index)
    }

    /// Allocate a slot for a task that starts out waiting on a backend job
    /// (used by `Runtime::queue_*` sugar: the continuation task exists before
    /// the job that will resume it does).
    pub fn spawn_waiting(&mut self, file: &'static str, line: u32) -> Result<usize> {
        let index = self.reserve_index()?;
        let task = Task::new_waiting(index, file, line);
        self.tasks.borrow_assume_unset(index, task);
        Ok(index)
    }

    fn reserve_index(&self) -> Result<usize> {
        // Pool::borrow_assume_unset requires the caller to already know a
        // free slot; Scheduler looks one up itself so it can build the Task
        // (which needs the index) before inserting it.
        (0..self.tasks.capacity())
            .find(|&i| !self.tasks.is_occupied(i))
            .ok_or(Error::OutOfTasks {
                capacity: self.tasks.capacity(),
            })
    }

    /// Install a trampoline into a previously-reserved waiting task, and hand
    /// back ownership of it to the runtime (called right after
    /// `spawn_waiting` returns, once the caller knows what continuation to
    /// run).
    pub fn set_trampoline(&mut self, index: usize, trampoline: Trampoline) {
        if let Some(task) = self.tasks.get_mut(index) {
            task.trampoline = Some(trampoline);
        }
    }

    /// Transition a waiting task back to runnable, delivering the completion
    /// outcome it will see on its next dispatch.
    pub fn deliver(&mut self, index: usize, outcome: crate::completion::Outcome) {
        let task = self
            .tasks
            .get_mut(index)
            .unwrap_or_else(|| panic!("deliver: task {index} is not occupied"));
        assert_eq!(task.state, TaskState::Waiting, "deliver: task {index} is not waiting");
        task.state = TaskState::Runnable;
        task.pending_outcome = Some(outcome);
        self.runnable.set(index);
    }

    /// Snapshot of currently runnable indices, ascending. Tasks made runnable
    /// during dispatch of this snapshot are not included (see runtime loop).
    pub fn runnable_snapshot(&self) -> Vec<usize> {
        self.runnable.iter_set().collect()
    }

    pub fn runnable_count(&self) -> usize {
        self.runnable.count()
    }

    /// Take a runnable task's trampoline out for execution, marking it dead
    /// and releasing its slot. Returns `None` if the slot was already
    /// released by a previous step in the same dispatch pass (shouldn't
    /// happen with a correct snapshot, but kept defensive).
    pub fn take_for_dispatch(
        &mut self,
        index: usize,
    ) -> Option<(Trampoline, crate::task::TaskMeta, Option<crate::completion::Outcome>)> {
        let task = self.tasks.get_mut(index)?;
        assert_eq!(task.state, TaskState::Runnable, "task {index} is not runnable");
        let trampoline = task.trampoline.take()?;
        let meta = task.meta;
        let outcome = task.pending_outcome.take();
        task.state = TaskState::Dead;
        self.runnable.clear(index);
        self.tasks.release(index);
        Some((trampoline, meta, outcome))
    }

    #[cfg(test)]
    pub fn mark_waiting_runnable_with_trampoline(&mut self, index: usize, trampoline: Trampoline) {
        self.set_trampoline(index, trampoline);
        self.deliver(index, crate::completion::Outcome::None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::make_trampoline;

    fn dummy_entry(
        _rt: &crate::runtime::Runtime,
        _meta: &crate::task::TaskMeta,
        _ctx: (),
        _outcome: Option<crate::completion::Outcome>,
    ) -> crate::task::TaskResult {
        Ok(())
    }

    #[test]
    fn spawn_and_release_accounting() {
        let mut sched = Scheduler::with_capacity(4);
        let a = sched.spawn(make_trampoline(dummy_entry, ()), "test", 1).unwrap();
        assert_eq!(sched.occupied_count(), 1);
        assert!(sched.runnable_snapshot().contains(&a));
        let (_tramp, _meta, _outcome) = sched.take_for_dispatch(a).unwrap();
        assert_eq!(sched.occupied_count(), 0);
        assert!(sched.runnable_snapshot().is_empty());
    }

    #[test]
    fn out_of_tasks_when_full() {
        let mut sched = Scheduler::with_capacity(1);
        sched.spawn(make_trampoline(dummy_entry, ()), "test", 1).unwrap();
        assert!(matches!(
            sched.spawn(make_trampoline(dummy_entry, ()), "test", 1),
            Err(Error::OutOfTasks { capacity: 1 })
        ));
    }

    #[test]
    fn waiting_task_becomes_runnable() {
        let mut sched = Scheduler::with_capacity(4);
        let idx = sched.spawn_waiting("test", 1).unwrap();
        assert!(sched.runnable_snapshot().is_empty());
        sched.mark_waiting_runnable_with_trampoline(idx, make_trampoline(dummy_entry, ()));
        assert_eq!(sched.runnable_snapshot(), vec![idx]);
    }
}

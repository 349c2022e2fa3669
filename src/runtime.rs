// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The per-thread runtime loop tying the scheduler to an `AsyncIo` backend.

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::panic::Location;
use std::path::Path;

use tracing::{debug, error, info, trace};

use crate::completion::{Completion, Outcome, Timespec};
use crate::epoll::EpollIo;
use crate::error::Result;
use crate::io::{AsyncIo, RuntimeOptions, WakeHandle};
use crate::scheduler::Scheduler;
use crate::task::{make_trampoline, Entry};

/// A per-thread cooperative task executor paired with a pluggable `AsyncIo`
/// backend. Not `Send`/`Sync`: one `Runtime` belongs to exactly one thread.
pub struct Runtime {
    scheduler: RefCell<Scheduler>,
    aio: RefCell<Box<dyn AsyncIo>>,
    running: Cell<bool>,
    completions: RefCell<Vec<Completion>>,
}

impl Runtime {
    /// Build a runtime backed by the reference epoll implementation.
    pub fn new(options: RuntimeOptions) -> Result<Self> {
        options.validate()?;
        let backend = EpollIo::new(options.into())?;
        Ok(Self::with_backend(options, Box::new(backend)))
    }

    /// Build a runtime over an arbitrary backend (used by tests and
    /// alternate backend implementations).
    pub fn with_backend(options: RuntimeOptions, backend: Box<dyn AsyncIo>) -> Self {
        Self {
            scheduler: RefCell::new(Scheduler::with_capacity(options.size_tasks_max as usize)),
            aio: RefCell::new(backend),
            running: Cell::new(true),
            completions: RefCell::new(Vec::with_capacity(options.size_aio_reap_max as usize)),
        }
    }

    /// A handle other threads may use to interrupt a blocked `run()`.
    pub fn wake_handle(&self) -> Box<dyn WakeHandle> {
        self.aio.borrow().wake_handle()
    }

    /// Spawn an immediately-runnable task.
    #[track_caller]
    pub fn spawn<C: 'static>(&self, entry: Entry<C>, ctx: C) -> Result<usize> {
        let loc = Location::caller();
        let trampoline = make_trampoline(entry, ctx);
        let idx = self.scheduler.borrow_mut().spawn(trampoline, loc.file(), loc.line())?;
        trace!(task = idx, file = loc.file(), line = loc.line(), "spawn");
        Ok(idx)
    }

    /// Spawn a task that first becomes runnable after `delay` elapses.
    #[track_caller]
    pub fn spawn_delay<C: 'static>(&self, entry: Entry<C>, ctx: C, delay: Timespec) -> Result<usize> {
        let loc = Location::caller();
        let idx = self.queue_waiting(entry, ctx, loc)?;
        self.aio.borrow_mut().queue_timer(idx, delay)?;
        Ok(idx)
    }

    /// Ask the runtime to stop after the current dispatch phase.
    pub fn stop(&self) {
        debug!("stop requested");
        self.running.set(false);
    }

    fn queue_waiting<C: 'static>(&self, entry: Entry<C>, ctx: C, loc: &'static Location<'static>) -> Result<usize> {
        let trampoline = make_trampoline(entry, ctx);
        let mut sched = self.scheduler.borrow_mut();
        let idx = sched.spawn_waiting(loc.file(), loc.line())?;
        sched.set_trampoline(idx, trampoline);
        Ok(idx)
    }

    #[track_caller]
    pub fn queue_open<C: 'static>(&self, entry: Entry<C>, ctx: C, path: &Path) -> Result<()> {
        let loc = Location::caller();
        let idx = self.queue_waiting(entry, ctx, loc)?;
        self.aio.borrow_mut().queue_open(idx, path)
    }

    #[track_caller]
    pub fn queue_stat<C: 'static>(&self, entry: Entry<C>, ctx: C, fd: RawFd) -> Result<()> {
        let loc = Location::caller();
        let idx = self.queue_waiting(entry, ctx, loc)?;
        self.aio.borrow_mut().queue_stat(idx, fd)
    }

    /// # Safety
    /// `buf` must stay valid and unaliased for at least `len` bytes until
    /// `entry` is invoked with the completion's outcome.
    #[track_caller]
    pub unsafe fn queue_read<C: 'static>(
        &self,
        entry: Entry<C>,
        ctx: C,
        fd: RawFd,
        buf: *mut u8,
        len: usize,
        offset: u64,
    ) -> Result<()> {
        let loc = Location::caller();
        let idx = self.queue_waiting(entry, ctx, loc)?;
        unsafe { self.aio.borrow_mut().queue_read(idx, fd, buf, len, offset) }
    }

    /// # Safety
    /// `buf` must stay valid for at least `len` bytes until `entry` is
    /// invoked with the completion's outcome.
    #[track_caller]
    pub unsafe fn queue_write<C: 'static>(
        &self,
        entry: Entry<C>,
        ctx: C,
        fd: RawFd,
        buf: *const u8,
        len: usize,
        offset: u64,
    ) -> Result<()> {
        let loc = Location::caller();
        let idx = self.queue_waiting(entry, ctx, loc)?;
        unsafe { self.aio.borrow_mut().queue_write(idx, fd, buf, len, offset) }
    }

    #[track_caller]
    pub fn queue_close<C: 'static>(&self, entry: Entry<C>, ctx: C, fd: RawFd) -> Result<()> {
        let loc = Location::caller();
        let idx = self.queue_waiting(entry, ctx, loc)?;
        self.aio.borrow_mut().queue_close(idx, fd)
    }

    #[track_caller]
    pub fn queue_accept<C: 'static>(&self, entry: Entry<C>, ctx: C, listener: RawFd) -> Result<()> {
        let loc = Location::caller();
        let idx = self.queue_waiting(entry, ctx, loc)?;
        self.aio.borrow_mut().queue_accept(idx, listener)
    }

    #[track_caller]
    pub fn queue_connect<C: 'static>(&self, entry: Entry<C>, ctx: C, socket: RawFd, addr: SocketAddr) -> Result<()> {
        let loc = Location::caller();
        let idx = self.queue_waiting(entry, ctx, loc)?;
        self.aio.borrow_mut().queue_connect(idx, socket, addr)
    }

    /// # Safety
    /// `buf` must stay valid and unaliased for at least `len` bytes until
    /// `entry` is invoked with the completion's outcome.
    #[track_caller]
    pub unsafe fn queue_recv<C: 'static>(&self, entry: Entry<C>, ctx: C, socket: RawFd, buf: *mut u8, len: usize) -> Result<()> {
        let loc = Location::caller();
        let idx = self.queue_waiting(entry, ctx, loc)?;
        unsafe { self.aio.borrow_mut().queue_recv(idx, socket, buf, len) }
    }

    /// # Safety
    /// `buf` must stay valid for at least `len` bytes until `entry` is
    /// invoked with the completion's outcome.
    #[track_caller]
    pub unsafe fn queue_send<C: 'static>(&self, entry: Entry<C>, ctx: C, socket: RawFd, buf: *const u8, len: usize) -> Result<()> {
        let loc = Location::caller();
        let idx = self.queue_waiting(entry, ctx, loc)?;
        unsafe { self.aio.borrow_mut().queue_send(idx, socket, buf, len) }
    }

    /// Drive the runtime until `stop()` is called or it quiesces (§4.4).
    pub fn run(&self) -> Result<()> {
        loop {
            let snapshot = self.scheduler.borrow().runnable_snapshot();
            for index in snapshot {
                self.dispatch_one(index);
                if !self.running.get() {
                    info!("stop() called mid-dispatch, exiting run loop");
                    return Ok(());
                }
            }

            if !self.running.get() {
                return Ok(());
            }

            self.aio.borrow_mut().submit()?;

            let wait_for_io = self.scheduler.borrow().runnable_count() == 0;
            let mut completions = self.completions.borrow_mut();
            completions.clear();
            self.aio.borrow_mut().reap(wait_for_io, &mut completions)?;

            for completion in completions.iter() {
                if completion.task == usize::MAX {
                    // A Wake completion: nothing to resume, it only exists
                    // to interrupt a blocked reap.
                    continue;
                }
                self.scheduler.borrow_mut().deliver(completion.task, completion.result);
            }
            drop(completions);

            // Deadlock guard (O3): only exit once nothing is runnable AND no
            // task slots remain occupied at all — a task can be occupied but
            // waiting on a job still in flight, and that must be given the
            // chance to complete before we call this quiescent.
            let sched = self.scheduler.borrow();
            if sched.runnable_count() == 0 && sched.occupied_count() == 0 {
                info!("runtime quiesced, no runnable or outstanding tasks");
                return Ok(());
            }
        }
    }

    fn dispatch_one(&self, index: usize) {
        let dispatched = self.scheduler.borrow_mut().take_for_dispatch(index);
        let Some((trampoline, meta, outcome)) = dispatched else {
            return;
        };
        trace!(task = index, "dispatch");
        if let Err(err) = trampoline(self, &meta, outcome) {
            error!(task = index, file = meta.spawn_file, line = meta.spawn_line, error = %err, "task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskMeta;
    use std::cell::Cell as StdCell;
    use std::rc::Rc;

    fn opts() -> RuntimeOptions {
        RuntimeOptions {
            size_tasks_max: 16,
            size_aio_jobs_max: 16,
            size_aio_reap_max: 8,
        }
    }

    fn once_entry(_rt: &Runtime, _meta: &TaskMeta, ctx: Rc<StdCell<bool>>, _outcome: Option<Outcome>) -> crate::task::TaskResult {
        ctx.set(true);
        Ok(())
    }

    #[test]
    fn run_executes_runnable_task_then_quiesces() {
        let rt = Runtime::new(opts()).unwrap();
        let ran = Rc::new(StdCell::new(false));
        rt.spawn(once_entry, ran.clone()).unwrap();
        rt.run().unwrap();
        assert!(ran.get());
    }

    fn stopping_entry(rt: &Runtime, _meta: &TaskMeta, _ctx: (), _outcome: Option<Outcome>) -> crate::task::TaskResult {
        rt.stop();
        Ok(())
    }

    #[test]
    fn stop_exits_before_next_dispatch() {
        let rt = Runtime::new(opts()).unwrap();
        rt.spawn(stopping_entry, ()).unwrap();
        rt.run().unwrap();
    }

    fn failing_entry(_rt: &Runtime, _meta: &TaskMeta, _ctx: (), _outcome: Option<Outcome>) -> crate::task::TaskResult {
        Err("boom".into())
    }

    #[test]
    fn failing_task_does_not_abort_others() {
        let rt = Runtime::new(opts()).unwrap();
        let ran = Rc::new(StdCell::new(false));
        rt.spawn(failing_entry, ()).unwrap();
        rt.spawn(once_entry, ran.clone()).unwrap();
        rt.run().unwrap();
        assert!(ran.get());
    }

    #[test]
    fn timer_delays_dispatch() {
        let rt = Runtime::new(opts()).unwrap();
        let ran = Rc::new(StdCell::new(false));
        let start = std::time::Instant::now();
        rt.spawn_delay(once_entry, ran.clone(), Timespec::from_millis(15)).unwrap();
        rt.run().unwrap();
        assert!(ran.get());
        assert!(start.elapsed().as_millis() >= 10);
    }
}

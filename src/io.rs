// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Backend-independent AsyncIO contract.
//!
//! `AsyncIo` is a trait object (`Box<dyn AsyncIo>`): one vtable that every
//! concrete backend (epoll today; io_uring/kqueue are anticipated siblings)
//! implements. Buffer-bearing operations take raw pointer + length rather
//! than a borrowed slice, mirroring the teacher's `AsyncRead`/`AsyncWrite`
//! futures: the buffer must outlive the call that queues it, which the
//! borrow checker cannot express across a suspension point, so the caller
//! upholds the contract instead.

use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::path::Path;

use crate::completion::{Completion, Timespec};
use crate::error::{Error, Result};

/// Per-thread executor sizing.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    pub size_tasks_max: u16,
    pub size_aio_jobs_max: u16,
    pub size_aio_reap_max: u16,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            size_tasks_max: 1024,
            size_aio_jobs_max: 1024,
            size_aio_reap_max: 256,
        }
    }
}

impl RuntimeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.size_aio_reap_max > self.size_aio_jobs_max {
            return Err(Error::InvalidOptions(
                "size_aio_reap_max must not exceed size_aio_jobs_max",
            ));
        }
        Ok(())
    }
}

/// Backend sizing, identical shape to `RuntimeOptions` but kept distinct
/// since a backend may be constructed independently of a `Runtime` in tests.
#[derive(Debug, Clone, Copy)]
pub struct AsyncIoOptions {
    pub size_aio_jobs_max: u16,
    pub size_aio_reap_max: u16,
}

impl AsyncIoOptions {
    pub fn validate(&self) -> Result<()> {
        if self.size_aio_reap_max > self.size_aio_jobs_max {
            return Err(Error::InvalidOptions(
                "size_aio_reap_max must not exceed size_aio_jobs_max",
            ));
        }
        Ok(())
    }
}

impl From<RuntimeOptions> for AsyncIoOptions {
    fn from(opts: RuntimeOptions) -> Self {
        Self {
            size_aio_jobs_max: opts.size_aio_jobs_max,
            size_aio_reap_max: opts.size_aio_reap_max,
        }
    }
}

/// A cloneable, `Send + Sync` handle that can interrupt a blocked `reap()`
/// from any thread. The only cross-thread-safe operation in this crate.
pub trait WakeHandle: Send + Sync {
    fn wake(&self);
}

/// Backend-independent operation queue.
///
/// Every `queue_*` method registers `task` (which must already be in the
/// waiting state) as the owner of the resulting job. Buffer-bearing methods
/// are `unsafe`: the caller must keep the buffer valid and unaliased until
/// the owning task is resumed with the corresponding completion.
pub trait AsyncIo {
    fn queue_timer(&mut self, task: usize, delay: Timespec) -> Result<()>;
    fn queue_open(&mut self, task: usize, path: &Path) -> Result<()>;
    fn queue_stat(&mut self, task: usize, fd: RawFd) -> Result<()>;

    /// # Safety
    /// `buf` must point to at least `len` writable bytes, valid and
    /// unaliased until the owning task is resumed.
    unsafe fn queue_read(&mut self, task: usize, fd: RawFd, buf: *mut u8, len: usize, offset: u64) -> Result<()>;

    /// # Safety
    /// `buf` must point to at least `len` readable bytes, valid until the
    /// owning task is resumed.
    unsafe fn queue_write(&mut self, task: usize, fd: RawFd, buf: *const u8, len: usize, offset: u64) -> Result<()>;

    fn queue_close(&mut self, task: usize, fd: RawFd) -> Result<()>;
    fn queue_accept(&mut self, task: usize, listener: RawFd) -> Result<()>;
    fn queue_connect(&mut self, task: usize, socket: RawFd, addr: SocketAddr) -> Result<()>;

    /// # Safety
    /// `buf` must point to at least `len` writable bytes, valid and
    /// unaliased until the owning task is resumed.
    unsafe fn queue_recv(&mut self, task: usize, socket: RawFd, buf: *mut u8, len: usize) -> Result<()>;

    /// # Safety
    /// `buf` must point to at least `len` readable bytes, valid until the
    /// owning task is resumed.
    unsafe fn queue_send(&mut self, task: usize, socket: RawFd, buf: *const u8, len: usize) -> Result<()>;

    /// A handle other threads can use to interrupt a blocked `reap`.
    fn wake_handle(&self) -> Box<dyn WakeHandle>;

    /// Hand pending work to the kernel. A no-op for readiness-based backends.
    fn submit(&mut self) -> Result<()>;

    /// Harvest ready completions into `out`, up to its reserved capacity.
    /// Blocks when `wait` is true and no fallback-blocking work is pending,
    /// unless interrupted by a `WakeHandle`.
    fn reap(&mut self, wait: bool, out: &mut Vec<Completion>) -> Result<usize>;

    /// True while the backend has blocking-drain work that must keep
    /// progressing even when nothing is readiness-pending — the runtime
    /// loop consults this to decide it must not block indefinitely.
    fn has_pending_blocking_work(&self) -> bool;
}

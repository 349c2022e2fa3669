// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! epoll `AsyncIo` backend.
//!
//! Readiness-based operations (timer, accept, connect, recv, send) register
//! an fd with epoll using add-or-modify: try `EPOLL_CTL_ADD`, and on `EEXIST`
//! fall back to `EPOLL_CTL_MOD`, the same asymmetry the teacher's reactor
//! handles. Operations the kernel only exposes as blocking (open, stat,
//! read, write, close) are drained through a non-blocking retry loop instead
//! — there's no readiness event to wait on, so `reap` must poll for them.

use std::collections::{HashSet, VecDeque};
use std::ffi::CString;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::completion::{Completion, Outcome, Stat, Timespec};
use crate::error::{Error, Result};
use crate::io::{AsyncIo, AsyncIoOptions, WakeHandle};
use crate::pool::Pool;

use super::job::{Job, JobKind};
use super::sockaddr::socketaddr_to_sockaddr;

pub struct EpollIo {
    epoll_fd: RawFd,
    wake_fd: RawFd,
    jobs: Pool<Job>,
    blocking: VecDeque<usize>,
    registered: HashSet<RawFd>,
    reap_capacity: usize,
}

const WAKE_JOB: usize = 0;

impl EpollIo {
    pub fn new(options: AsyncIoOptions) -> Result<Self> {
        options.validate()?;

        // SAFETY: plain syscalls, return value checked below.
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        // SAFETY: plain syscall, return value checked below.
        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_fd < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: epoll_fd is a valid fd owned by this call.
            unsafe {
                libc::close(epoll_fd);
            }
            return Err(Error::Io(err));
        }

        let mut jobs: Pool<Job> = Pool::with_capacity(options.size_aio_jobs_max as usize + 1);
        jobs.borrow_assume_unset(
            WAKE_JOB,
            Job {
                task: usize::MAX,
                kind: JobKind::Wake,
            },
        );

        let mut backend = Self {
            epoll_fd,
            wake_fd,
            jobs,
            blocking: VecDeque::new(),
            registered: HashSet::new(),
            reap_capacity: options.size_aio_reap_max as usize,
        };
        backend.epoll_register(wake_fd, WAKE_JOB, false)?;
        Ok(backend)
    }

    fn epoll_register(&mut self, fd: RawFd, job_index: usize, write_interest: bool) -> Result<()> {
        let mut event = libc::epoll_event {
            events: if write_interest { libc::EPOLLOUT } else { libc::EPOLLIN } as u32,
            u64: job_index as u64,
        };
        let already = self.registered.contains(&fd);
        let op = if already { libc::EPOLL_CTL_MOD } else { libc::EPOLL_CTL_ADD };
        // SAFETY: epoll_fd is valid for the lifetime of self; event is a
        // valid, fully-initialized epoll_event.
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut event) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if !already && err.raw_os_error() == Some(libc::EEXIST) {
                // SAFETY: same as above.
                let rc2 = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_MOD, fd, &mut event) };
                if rc2 < 0 {
                    return Err(Error::Io(io::Error::last_os_error()));
                }
            } else {
                return Err(Error::Io(err));
            }
        }
        self.registered.insert(fd);
        trace!(fd, job_index, write_interest, "epoll_register");
        Ok(())
    }

    fn epoll_deregister(&mut self, fd: RawFd) {
        // SAFETY: epoll_fd is valid; fd may already be gone, errors tolerated.
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if !matches!(err.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF)) {
                warn!(fd, error = %err, "epoll_deregister failed");
            }
        }
        self.registered.remove(&fd);
    }

    fn queue_job(&mut self, task: usize, kind: JobKind) -> Result<usize> {
        let is_blocking = kind.is_blocking();
        let readiness_fd = kind.readiness_fd();
        let write_interest = kind.wants_write_interest();
        let index = self.jobs.borrow_hint(task, Job { task, kind }).map_err(|_| Error::OutOfJobs {
            capacity: self.jobs.capacity(),
        })?;
        if is_blocking {
            self.blocking.push_back(index);
        } else if let Some(fd) = readiness_fd {
            self.epoll_register(fd, index, write_interest)?;
        }
        Ok(())
    }
}

impl Drop for EpollIo {
    fn drop(&mut self) {
        // SAFETY: both fds are owned by this struct and not used afterwards.
        unsafe {
            libc::close(self.epoll_fd);
            libc::close(self.wake_fd);
        }
    }
}

struct EpollWakeHandle {
    fd: RawFd,
}

// SAFETY: `write(2)` on an eventfd is thread-safe; the fd itself is never
// closed while a WakeHandle referencing it could still be live, because the
// backend outlives anything holding a handle in this crate's usage pattern.
unsafe impl Send for EpollWakeHandle {}
unsafe impl Sync for EpollWakeHandle {}

impl WakeHandle for EpollWakeHandle {
    fn wake(&self) {
        let value: u64 = 1;
        // SAFETY: self.fd is a valid eventfd; writing 8 bytes is the
        // documented eventfd protocol.
        unsafe {
            libc::write(self.fd, &value as *const u64 as *const libc::c_void, mem::size_of::<u64>());
        }
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fd is a valid, open file descriptor owned by the caller.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: same as above.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn would_block(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) | Some(libc::EINPROGRESS))
}

fn timespec_to_itimerspec(delay: Timespec) -> libc::itimerspec {
    libc::itimerspec {
        it_interval: libc::timespec { tv_sec: 0, tv_nsec: 0 },
        it_value: libc::timespec {
            tv_sec: delay.seconds as libc::time_t,
            tv_nsec: delay.nanos as i64,
        },
    }
}

fn libc_timespec_to_timespec(ts: libc::timespec) -> Timespec {
    Timespec {
        seconds: ts.tv_sec.max(0) as u64,
        nanos: ts.tv_nsec as u32,
    }
}

impl AsyncIo for EpollIo {
    fn queue_timer(&mut self, task: usize, delay: Timespec) -> Result<()> {
        // SAFETY: plain syscall, checked below.
        let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC) };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        let spec = timespec_to_itimerspec(delay);
        // SAFETY: fd just created above; spec is fully initialized.
        let rc = unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd owned by this call, not yet shared.
            unsafe {
                libc::close(fd);
            }
            return Err(Error::Io(err));
        }
        self.queue_job(task, JobKind::Timer { fd })
            .map(|_| ())
    }

    fn queue_open(&mut self, task: usize, path: &Path) -> Result<()> {
        self.queue_job(
            task,
            JobKind::Open {
                path: path.to_path_buf(),
                flags: libc::O_RDONLY,
            },
        )
        .map(|_| ())
    }

    fn queue_stat(&mut self, task: usize, fd: RawFd) -> Result<()> {
        self.queue_job(task, JobKind::Stat { fd }).map(|_| ())
    }

    unsafe fn queue_read(&mut self, task: usize, fd: RawFd, buf: *mut u8, len: usize, offset: u64) -> Result<()> {
        self.queue_job(task, JobKind::Read { fd, buf, len, offset }).map(|_| ())
    }

    unsafe fn queue_write(&mut self, task: usize, fd: RawFd, buf: *const u8, len: usize, offset: u64) -> Result<()> {
        self.queue_job(task, JobKind::Write { fd, buf, len, offset }).map(|_| ())
    }

    fn queue_close(&mut self, task: usize, fd: RawFd) -> Result<()> {
        self.queue_job(task, JobKind::Close { fd }).map(|_| ())
    }

    fn queue_accept(&mut self, task: usize, listener: RawFd) -> Result<()> {
        self.queue_job(task, JobKind::Accept { listener }).map(|_| ())
    }

    fn queue_connect(&mut self, task: usize, socket: RawFd, addr: SocketAddr) -> Result<()> {
        set_nonblocking(socket).map_err(Error::Io)?;
        let (storage, len) = socketaddr_to_sockaddr(addr);
        // SAFETY: storage is a fully-initialized sockaddr_storage of the
        // matching family; len matches the written variant's size.
        let rc = unsafe { libc::connect(socket, &storage as *const _ as *const libc::sockaddr, len) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if !would_block(&err) {
                return Err(Error::Io(err));
            }
        }
        self.queue_job(task, JobKind::Connect { socket, addr }).map(|_| ())
    }

    unsafe fn queue_recv(&mut self, task: usize, socket: RawFd, buf: *mut u8, len: usize) -> Result<()> {
        self.queue_job(task, JobKind::Recv { socket, buf, len }).map(|_| ())
    }

    unsafe fn queue_send(&mut self, task: usize, socket: RawFd, buf: *const u8, len: usize) -> Result<()> {
        self.queue_job(task, JobKind::Send { socket, buf, len }).map(|_| ())
    }

    fn wake_handle(&self) -> Box<dyn WakeHandle> {
        Box::new(EpollWakeHandle { fd: self.wake_fd })
    }

    fn submit(&mut self) -> Result<()> {
        Ok(())
    }

    fn has_pending_blocking_work(&self) -> bool {
        !self.blocking.is_empty()
    }

    fn reap(&mut self, wait: bool, out: &mut Vec<Completion>) -> Result<usize> {
        let start_len = out.len();
        let busy_poll = !wait || self.has_pending_blocking_work();

        loop {
            self.drain_blocking_pass(out);

            let remaining = self.reap_capacity.saturating_sub(out.len() - start_len);
            if remaining == 0 {
                break;
            }

            let timeout_ms = if busy_poll || out.len() > start_len { 0 } else { -1 };
            self.epoll_wait_pass(timeout_ms, remaining, out)?;

            if !wait {
                break;
            }
            if out.len() > start_len {
                break;
            }
            if !self.has_pending_blocking_work() && timeout_ms == -1 {
                // epoll_wait already blocked indefinitely and returned with
                // nothing appended only if interrupted by a signal; loop
                // again rather than spin.
                continue;
            }
        }

        Ok(out.len() - start_len)
    }
}

impl EpollIo {
    fn drain_blocking_pass(&mut self, out: &mut Vec<Completion>) {
        let pass_len = self.blocking.len();
        for _ in 0..pass_len {
            let remaining_capacity = self.reap_capacity.saturating_sub(out.len());
            if remaining_capacity == 0 {
                // Peek capacity before popping: never discard a job that
                // didn't fit.
                break;
            }
            let Some(job_index) = self.blocking.pop_front() else {
                break;
            };
            self.drain_one_blocking(job_index, out);
        }
    }

    fn drain_one_blocking(&mut self, job_index: usize, out: &mut Vec<Completion>) {
        let Some(job) = self.jobs.get(job_index) else {
            return;
        };
        let task = job.task;

        let outcome = match &job.kind {
            JobKind::Open { path, flags } => match try_open(path, *flags) {
                Some(result) => result,
                None => {
                    self.blocking.push_back(job_index);
                    return;
                }
            },
            JobKind::Stat { fd } => try_stat(*fd),
            JobKind::Read { fd, buf, len, offset } => match try_read(*fd, *buf, *len, *offset) {
                Some(result) => result,
                None => {
                    self.blocking.push_back(job_index);
                    return;
                }
            },
            JobKind::Write { fd, buf, len, offset } => match try_write(*fd, *buf, *len, *offset) {
                Some(result) => result,
                None => {
                    self.blocking.push_back(job_index);
                    return;
                }
            },
            JobKind::Close { fd } => {
                // SAFETY: fd is owned by the job; closing it once is valid.
                unsafe {
                    libc::close(*fd);
                }
                Outcome::None
            }
            _ => unreachable!("non-blocking job kind in the blocking queue"),
        };

        self.jobs.release(job_index);
        out.push(Completion { task, result: outcome });
    }

    fn epoll_wait_pass(&mut self, timeout_ms: i32, max_events: usize, out: &mut Vec<Completion>) -> Result<()> {
        let mut events: [libc::epoll_event; 64] = unsafe { mem::zeroed() };
        let cap = events.len().min(max_events.max(1));
        // SAFETY: epoll_fd valid; events buffer sized and passed with
        // matching length.
        let n = unsafe { libc::epoll_wait(self.epoll_fd, events.as_mut_ptr(), cap as i32, timeout_ms) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(());
            }
            return Err(Error::Io(err));
        }

        for event in events.iter().take(n as usize) {
            let job_index = event.u64 as usize;
            if job_index == WAKE_JOB {
                self.drain_wake();
                out.push(Completion {
                    task: usize::MAX,
                    result: Outcome::Wake,
                });
                continue;
            }
            self.handle_ready_job(job_index, out);
        }
        Ok(())
    }

    fn drain_wake(&self) {
        let mut buf = [0u8; 8];
        // SAFETY: wake_fd is a valid eventfd; buf is sized for the 8-byte protocol.
        unsafe {
            libc::read(self.wake_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len());
        }
    }

    fn handle_ready_job(&mut self, job_index: usize, out: &mut Vec<Completion>) {
        let Some(job) = self.jobs.get(job_index) else {
            return;
        };
        let task = job.task;

        match &job.kind {
            JobKind::Timer { fd } => {
                let fd = *fd;
                let mut buf = [0u8; 8];
                // SAFETY: fd is a valid timerfd; buf matches its 8-byte read protocol.
                unsafe {
                    libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len());
                }
                self.epoll_deregister(fd);
                // SAFETY: fd owned solely by this job.
                unsafe {
                    libc::close(fd);
                }
                self.jobs.release(job_index);
                out.push(Completion { task, result: Outcome::None });
            }
            JobKind::Accept { listener } => {
                let listener = *listener;
                // SAFETY: null addr/addrlen is valid when the peer address isn't needed.
                let fd = unsafe { libc::accept4(listener, std::ptr::null_mut(), std::ptr::null_mut(), libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC) };
                if fd < 0 {
                    let err = io::Error::last_os_error();
                    if would_block(&err) {
                        debug!(listener, "accept would block, re-arming");
                        return;
                    }
                    self.epoll_deregister(listener);
                    self.jobs.release(job_index);
                    out.push(Completion { task, result: Outcome::Socket(-1) });
                    return;
                }
                self.epoll_deregister(listener);
                self.jobs.release(job_index);
                out.push(Completion { task, result: Outcome::Socket(fd) });
            }
            JobKind::Connect { socket, addr, .. } => {
                let socket = *socket;
                let (storage, len) = socketaddr_to_sockaddr(*addr);
                // SAFETY: storage/len describe a valid sockaddr as above.
                let rc = unsafe { libc::connect(socket, &storage as *const _ as *const libc::sockaddr, len) };
                let outcome = if rc == 0 {
                    Outcome::Value(1)
                } else {
                    let err = io::Error::last_os_error();
                    match err.raw_os_error() {
                        Some(libc::EISCONN) => Outcome::Value(1),
                        Some(libc::EALREADY) | Some(libc::EINPROGRESS) => {
                            debug!(socket, "connect still in progress, re-arming");
                            return;
                        }
                        _ => Outcome::Value(-1),
                    }
                };
                self.epoll_deregister(socket);
                self.jobs.release(job_index);
                out.push(Completion { task, result: outcome });
            }
            JobKind::Recv { socket, buf, len } => {
                let (socket, buf, len) = (*socket, *buf, *len);
                // SAFETY: buf/len were validated by the caller of queue_recv
                // to remain valid until this resumption.
                let n = unsafe { libc::recv(socket, buf as *mut libc::c_void, len, 0) };
                if n < 0 {
                    let err = io::Error::last_os_error();
                    if would_block(&err) {
                        return;
                    }
                    self.epoll_deregister(socket);
                    self.jobs.release(job_index);
                    out.push(Completion { task, result: Outcome::Value(-1) });
                    return;
                }
                self.epoll_deregister(socket);
                self.jobs.release(job_index);
                out.push(Completion { task, result: Outcome::Value(n as i64) });
            }
            JobKind::Send { socket, buf, len } => {
                let (socket, buf, len) = (*socket, *buf, *len);
                // SAFETY: buf/len were validated by the caller of queue_send
                // to remain valid until this resumption.
                let n = unsafe { libc::send(socket, buf as *const libc::c_void, len, 0) };
                if n < 0 {
                    let err = io::Error::last_os_error();
                    if would_block(&err) {
                        return;
                    }
                    self.epoll_deregister(socket);
                    self.jobs.release(job_index);
                    out.push(Completion { task, result: Outcome::Value(-1) });
                    return;
                }
                self.epoll_deregister(socket);
                self.jobs.release(job_index);
                out.push(Completion { task, result: Outcome::Value(n as i64) });
            }
            _ => unreachable!("blocking job kind delivered through epoll_wait"),
        }
    }
}

fn try_open(path: &Path, flags: i32) -> Option<Outcome> {
    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: c_path is a valid nul-terminated C string for its lifetime here.
    let fd = unsafe { libc::openat(libc::AT_FDCWD, c_path.as_ptr(), flags | libc::O_NONBLOCK | libc::O_CLOEXEC) };
    if fd < 0 {
        let err = io::Error::last_os_error();
        if would_block(&err) {
            return None;
        }
        return Some(Outcome::Fd(-1));
    }
    Some(Outcome::Fd(fd))
}

fn try_stat(fd: RawFd) -> Outcome {
    // SAFETY: stat_buf is fully written by fstat before being read.
    let mut stat_buf: libc::stat = unsafe { mem::zeroed() };
    // SAFETY: fd is caller-owned and valid; stat_buf sized for `fstat`.
    let rc = unsafe { libc::fstat(fd, &mut stat_buf) };
    if rc < 0 {
        return Outcome::Stat(Stat {
            size: 0,
            mode: 0,
            accessed: Timespec { seconds: 0, nanos: 0 },
            modified: Timespec { seconds: 0, nanos: 0 },
            changed: Timespec { seconds: 0, nanos: 0 },
        });
    }
    Outcome::Stat(Stat {
        size: stat_buf.st_size as u64,
        mode: stat_buf.st_mode,
        accessed: libc_timespec_to_timespec(libc::timespec {
            tv_sec: stat_buf.st_atime,
            tv_nsec: stat_buf.st_atime_nsec,
        }),
        modified: libc_timespec_to_timespec(libc::timespec {
            tv_sec: stat_buf.st_mtime,
            tv_nsec: stat_buf.st_mtime_nsec,
        }),
        changed: libc_timespec_to_timespec(libc::timespec {
            tv_sec: stat_buf.st_ctime,
            tv_nsec: stat_buf.st_ctime_nsec,
        }),
    })
}

fn try_read(fd: RawFd, buf: *mut u8, len: usize, offset: u64) -> Option<Outcome> {
    // SAFETY: buf/len are upheld by queue_read's caller contract.
    let n = unsafe { libc::pread(fd, buf as *mut libc::c_void, len, offset as libc::off_t) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if would_block(&err) {
            return None;
        }
        if err.raw_os_error() == Some(libc::ESPIPE) {
            // SAFETY: same buffer contract as above.
            let n2 = unsafe { libc::read(fd, buf as *mut libc::c_void, len) };
            if n2 < 0 {
                let err2 = io::Error::last_os_error();
                if would_block(&err2) {
                    return None;
                }
                return Some(Outcome::Value(-1));
            }
            return Some(Outcome::Value(n2 as i64));
        }
        return Some(Outcome::Value(-1));
    }
    Some(Outcome::Value(n as i64))
}

fn try_write(fd: RawFd, buf: *const u8, len: usize, offset: u64) -> Option<Outcome> {
    // SAFETY: buf/len are upheld by queue_write's caller contract.
    let n = unsafe { libc::pwrite(fd, buf as *const libc::c_void, len, offset as libc::off_t) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if would_block(&err) {
            return None;
        }
        if err.raw_os_error() == Some(libc::ESPIPE) {
            // SAFETY: same buffer contract as above.
            let n2 = unsafe { libc::write(fd, buf as *const libc::c_void, len) };
            if n2 < 0 {
                let err2 = io::Error::last_os_error();
                if would_block(&err2) {
                    return None;
                }
                return Some(Outcome::Value(-1));
            }
            return Some(Outcome::Value(n2 as i64));
        }
        return Some(Outcome::Value(-1));
    }
    Some(Outcome::Value(n as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn options() -> AsyncIoOptions {
        AsyncIoOptions {
            size_aio_jobs_max: 32,
            size_aio_reap_max: 16,
        }
    }

    #[test]
    fn construct_and_drop() {
        let backend = EpollIo::new(options()).unwrap();
        drop(backend);
    }

    #[test]
    fn timer_fires_and_completes() {
        let mut backend = EpollIo::new(options()).unwrap();
        backend.queue_timer(1, Timespec::from_millis(5)).unwrap();
        let mut completions = Vec::new();
        let n = backend.reap(true, &mut completions).unwrap();
        assert_eq!(n, 1);
        assert_eq!(completions[0].task, 1);
        assert_eq!(completions[0].result, Outcome::None);
    }

    #[test]
    fn wake_unblocks_reap() {
        let backend = EpollIo::new(options()).unwrap();
        let handle = backend.wake_handle();
        let mut backend = backend;
        backend.queue_timer(1, Timespec::from_millis(60_000)).unwrap();
        let t = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            handle.wake();
        });
        let mut completions = Vec::new();
        let n = backend.reap(true, &mut completions).unwrap();
        t.join().unwrap();
        assert!(n >= 1);
        assert!(completions.iter().any(|c| c.result == Outcome::Wake));
    }

    #[test]
    fn open_stat_read_close_via_tempfile() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abcdef").unwrap();
        file.flush().unwrap();
        let path = file.path().to_path_buf();

        let mut backend = EpollIo::new(options()).unwrap();
        backend.queue_open(1, &path).unwrap();
        let mut completions = Vec::new();
        backend.reap(true, &mut completions).unwrap();
        let fd = match completions[0].result {
            Outcome::Fd(fd) => fd,
            other => panic!("expected Fd, got {other:?}"),
        };
        assert!(fd >= 0);

        backend.queue_stat(2, fd).unwrap();
        completions.clear();
        backend.reap(true, &mut completions).unwrap();
        match completions[0].result {
            Outcome::Stat(stat) => assert_eq!(stat.size, 6),
            other => panic!("expected Stat, got {other:?}"),
        }

        let mut buf = [0u8; 6];
        // SAFETY: buf lives on this stack frame for the duration of reap below.
        unsafe {
            backend.queue_read(3, fd, buf.as_mut_ptr(), buf.len(), 0).unwrap();
        }
        completions.clear();
        backend.reap(true, &mut completions).unwrap();
        match completions[0].result {
            Outcome::Value(n) => assert_eq!(n, 6),
            other => panic!("expected Value(6), got {other:?}"),
        }
        assert_eq!(&buf, b"abcdef");

        backend.queue_close(4, fd).unwrap();
        completions.clear();
        backend.reap(true, &mut completions).unwrap();
        assert_eq!(completions[0].result, Outcome::None);
    }

    #[test]
    fn reap_never_exceeds_capacity() {
        let mut opts = options();
        opts.size_aio_reap_max = 2;
        let mut backend = EpollIo::new(opts).unwrap();
        for i in 0..5 {
            backend.queue_timer(i, Timespec::from_millis(1)).unwrap();
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut completions = Vec::new();
        let n = backend.reap(false, &mut completions).unwrap();
        assert!(n <= 2);
    }
}

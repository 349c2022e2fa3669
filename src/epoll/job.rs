// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Backend-private job records. One per in-flight operation.

use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::path::PathBuf;

/// Discriminated operation kind. Buffer fields are raw pointer + length —
/// the job must outlive the borrow-checker's view of the original queueing
/// call, so queueing a buffer-bearing operation is `unsafe` at the `AsyncIo`
/// boundary (see `crate::io`).
pub(crate) enum JobKind {
    Wake,
    Timer {
        fd: RawFd,
    },
    Open {
        path: PathBuf,
        flags: i32,
    },
    Stat {
        fd: RawFd,
    },
    Read {
        fd: RawFd,
        buf: *mut u8,
        len: usize,
        offset: u64,
    },
    Write {
        fd: RawFd,
        buf: *const u8,
        len: usize,
        offset: u64,
    },
    Close {
        fd: RawFd,
    },
    Accept {
        listener: RawFd,
    },
    Connect {
        socket: RawFd,
        addr: SocketAddr,
    },
    Recv {
        socket: RawFd,
        buf: *mut u8,
        len: usize,
    },
    Send {
        socket: RawFd,
        buf: *const u8,
        len: usize,
    },
}

pub(crate) struct Job {
    /// The task awaiting this job's completion.
    pub task: usize,
    pub kind: JobKind,
}

impl JobKind {
    /// The fd this job should be registered against for readiness-based
    /// backends, if any (blocking-drain kinds return `None`).
    pub fn readiness_fd(&self) -> Option<RawFd> {
        match self {
            JobKind::Wake => None,
            JobKind::Timer { fd } => Some(*fd),
            JobKind::Open { .. } | JobKind::Stat { .. } | JobKind::Read { .. } | JobKind::Write { .. } | JobKind::Close { .. } => None,
            JobKind::Accept { listener } => Some(*listener),
            JobKind::Connect { socket, .. } => Some(*socket),
            JobKind::Recv { socket, .. } => Some(*socket),
            JobKind::Send { socket, .. } => Some(*socket),
        }
    }

    /// Whether this kind needs the read-side (EPOLLIN) or write-side
    /// (EPOLLOUT) interest when registered with epoll.
    pub fn wants_write_interest(&self) -> bool {
        matches!(self, JobKind::Connect { .. } | JobKind::Send { .. })
    }

    /// True for operations that have no native epoll form and must be
    /// drained through the non-blocking retry loop.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            JobKind::Open { .. } | JobKind::Stat { .. } | JobKind::Read { .. } | JobKind::Write { .. } | JobKind::Close { .. }
        )
    }
}

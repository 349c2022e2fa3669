// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! A per-thread cooperative task executor paired with a pluggable
//! asynchronous I/O backend.
//!
//! Each thread owns one [`Runtime`]: a [`Scheduler`](scheduler::Scheduler)
//! driving plain callback tasks, and a backend implementing [`AsyncIo`]
//! (epoll today, via [`EpollIo`](epoll::EpollIo)). Tasks never block; a task
//! suspends by queueing an I/O operation, which hands a fresh continuation
//! task to the scheduler and returns control to the loop.

mod bitset;
mod completion;
mod epoll;
mod error;
mod io;
mod pool;
mod runtime;
mod scheduler;
mod task;

pub use completion::{Completion, Outcome, Stat, Timespec};
pub use epoll::EpollIo;
pub use error::{Error, Result};
pub use io::{AsyncIo, AsyncIoOptions, RuntimeOptions, WakeHandle};
pub use runtime::Runtime;
pub use task::{Entry, TaskMeta, TaskResult, TaskState};

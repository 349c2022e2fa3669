// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error taxonomy for the runtime core.

use thiserror::Error;

/// Errors surfaced by `Pool`, `Scheduler`, `AsyncIo`, and `Runtime`.
#[derive(Debug, Error)]
pub enum Error {
    /// The task pool has no free slots.
    #[error("task pool exhausted (capacity {capacity})")]
    OutOfTasks { capacity: usize },

    /// The backend's job pool has no free slots.
    #[error("job pool exhausted (capacity {capacity})")]
    OutOfJobs { capacity: usize },

    /// `RuntimeOptions`/`AsyncIoOptions` failed validation.
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    /// An I/O operation other than the tracked `WouldBlock` retry failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

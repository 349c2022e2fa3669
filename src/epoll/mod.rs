// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Reference `AsyncIo` backend, built on Linux epoll.

mod backend;
mod job;
mod sockaddr;

pub use backend::EpollIo;

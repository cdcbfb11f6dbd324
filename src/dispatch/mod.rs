//! Fan-out dispatch of input lines to a pool of worker subprocesses.
//!
//! This module spawns a fixed pool of shell workers, each with a private
//! stdin pipe, and distributes newline-terminated units of input across
//! them. Whichever worker can accept bytes gets the next unit; there is
//! no round-robin and no per-worker queue.
//!
//! # Architecture
//!
//! ```text
//!               ┌──────────────────┐
//!   stdin/file ─▶  LineBuffer      │
//!               │  (chunked reads, │
//!               │   line units)    │
//!               └────────┬─────────┘
//!                        │ poll(2) says who can take bytes
//!          ┌─────────────┼─────────────┐
//!          │             │             │
//!    ┌─────▼─────┐ ┌─────▼─────┐ ┌─────▼─────┐
//!    │ Worker 1  │ │ Worker 2  │ │ Worker N  │
//!    │ $SHELL -c │ │ $SHELL -c │ │ $SHELL -c │
//!    └───────────┘ └───────────┘ └───────────┘
//! ```
//!
//! Workers inherit stdout and stderr, so their output flows straight
//! through. Signals are handled as flags: the dispatch loop notices them
//! between I/O operations, forwards the signal to the pool, and unwinds.

pub mod buffer;
pub mod dispatcher;
pub mod poller;
pub mod pool;
pub mod signals;

pub use dispatcher::{Dispatcher, Outcome};
pub use pool::WorkerPool;

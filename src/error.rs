//! Error types for linefan.

use std::os::fd::RawFd;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for linefan.
///
/// Every variant names the operation that failed; the OS-level cause rides
/// along as the source so the top-level reporter can print the full chain.
#[derive(Error, Debug)]
pub enum LinefanError {
    #[error("Failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Worker process was started without a stdin pipe")]
    MissingPipe,

    #[error("Failed to configure worker pipe: {0}")]
    Pipe(#[source] nix::Error),

    #[error("Readiness poll failed: {0}")]
    Poll(#[source] nix::Error),

    #[error("Cannot watch descriptor {fd}: interest table already holds {capacity} entries")]
    InterestExhausted { fd: RawFd, capacity: usize },

    #[error("Descriptor {fd} is already registered for readiness")]
    AlreadyRegistered { fd: RawFd },

    #[error("Failed to open input file {}: {source}", .path.display())]
    InputOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read input: {0}")]
    InputRead(#[source] std::io::Error),

    #[error("Failed to write to worker pipe: {0}")]
    WorkerWrite(#[source] std::io::Error),

    #[error("No workers left to receive remaining input")]
    PoolEmpty,

    #[error("Failed to install signal handlers: {0}")]
    SignalSetup(#[source] nix::Error),
}

/// Result type alias for linefan operations.
pub type Result<T> = std::result::Result<T, LinefanError>;

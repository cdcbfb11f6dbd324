//! Readiness polling over worker pipes.
//!
//! Wraps poll(2) with a fixed-capacity interest table. Each registered
//! descriptor carries the event mask it was registered with; a poll pass
//! reports only events that were asked for, plus the error conditions
//! (POLLERR, POLLHUP, POLLNVAL) the kernel delivers unrequested.

use std::os::fd::{BorrowedFd, RawFd};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::error::{LinefanError, Result};

/// A descriptor that came back ready from a poll pass.
#[derive(Debug, Clone, Copy)]
pub struct Ready {
    /// The descriptor that is ready.
    pub fd: RawFd,
    /// Events that actually fired, masked to the registered interest plus
    /// error conditions.
    pub events: PollFlags,
}

/// Descriptors ready after one poll pass.
pub type ReadyList = Vec<Ready>;

/// Fixed-capacity interest table over raw descriptors.
///
/// Capacity is set once at construction, sized to the worker pool. The
/// table never grows; registering beyond capacity is an error.
#[derive(Debug)]
pub struct Poller {
    capacity: usize,
    interest: Vec<(RawFd, PollFlags)>,
}

impl Poller {
    /// Create a poller that can watch up to `capacity` descriptors.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            interest: Vec::with_capacity(capacity),
        }
    }

    /// Number of descriptors currently registered.
    pub fn len(&self) -> usize {
        self.interest.len()
    }

    /// Whether no descriptors are registered.
    pub fn is_empty(&self) -> bool {
        self.interest.is_empty()
    }

    /// Register a descriptor with the event mask to watch it for.
    ///
    /// Each descriptor may be registered once; the mask is fixed for the
    /// lifetime of the registration.
    pub fn register(&mut self, fd: RawFd, events: PollFlags) -> Result<()> {
        if self.interest.iter().any(|&(watched, _)| watched == fd) {
            return Err(LinefanError::AlreadyRegistered { fd });
        }
        if self.interest.len() >= self.capacity {
            return Err(LinefanError::InterestExhausted {
                fd,
                capacity: self.capacity,
            });
        }
        self.interest.push((fd, events));
        Ok(())
    }

    /// Remove a descriptor from the interest table.
    ///
    /// Returns `true` if the descriptor was registered. Removing an unknown
    /// descriptor is a no-op.
    pub fn deregister(&mut self, fd: RawFd) -> bool {
        let before = self.interest.len();
        self.interest.retain(|&(watched, _)| watched != fd);
        self.interest.len() != before
    }

    /// Run one poll pass and collect the descriptors that are ready.
    ///
    /// Returns an empty list when the timeout expires, when nothing is
    /// registered, or when a signal interrupts the wait. The interrupted
    /// case is deliberate: the caller loops back to its signal flags
    /// instead of sitting in a restarted wait.
    pub fn poll(&self, timeout: PollTimeout) -> Result<ReadyList> {
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let mut fds: Vec<PollFd> = self
            .interest
            .iter()
            .map(|&(fd, events)| {
                // SAFETY: registered descriptors are owned by the pool and
                // stay open until deregistered.
                let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
                PollFd::new(borrowed, events)
            })
            .collect();

        let fired = match poll(&mut fds, timeout) {
            Ok(n) => n,
            Err(Errno::EINTR) => return Ok(Vec::new()),
            Err(e) => return Err(LinefanError::Poll(e)),
        };
        if fired == 0 {
            return Ok(Vec::new());
        }

        let error_events = PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL;
        let mut ready = Vec::with_capacity(fired as usize);
        for (poll_fd, &(fd, requested)) in fds.iter().zip(&self.interest) {
            let Some(revents) = poll_fd.revents() else {
                continue;
            };
            let effective = revents & (requested | error_events);
            if !effective.is_empty() {
                ready.push(Ready {
                    fd,
                    events: effective,
                });
            }
        }
        Ok(ready)
    }
}

//! Dispatch loop: feed input units to whichever workers can take them.
//!
//! The loop owns three concerns and nothing else: notice signal flags,
//! learn which worker pipes can accept bytes, and move whole line units
//! from the input buffer into those pipes. Input is only read when at
//! least one worker could take the result, so a stalled pool applies
//! backpressure all the way to the source.

use std::io;
use std::io::Read;
use std::ops::Range;
use std::os::fd::RawFd;

use nix::poll::{PollFlags, PollTimeout};
use tracing::{debug, info, trace};

use crate::dispatch::buffer::{LineBuffer, Refill};
use crate::dispatch::poller::{Poller, ReadyList};
use crate::dispatch::pool::WorkerPool;
use crate::dispatch::signals;
use crate::error::{LinefanError, Result};

/// Bytes read from the input per refill.
const CHUNK_SIZE: usize = 4096 * 64;

/// Poll timeout between signal flag checks, in milliseconds.
const POLL_INTERVAL_MS: u16 = 1000;

/// How a dispatch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// All input was delivered (or the source was empty).
    Completed,
    /// A termination signal cut the run short.
    Terminated,
}

/// Drives input from a reader into the worker pool.
pub struct Dispatcher<'a> {
    pool: &'a mut WorkerPool,
    poller: Poller,
    buffer: LineBuffer,
}

impl<'a> Dispatcher<'a> {
    /// Set up readiness tracking for every open worker pipe.
    pub fn new(pool: &'a mut WorkerPool) -> Result<Self> {
        let mut poller = Poller::with_capacity(pool.pipe_count());
        for fd in pool.pipes() {
            poller.register(fd, PollFlags::POLLOUT)?;
        }
        debug!(watched = poller.len(), "Dispatch loop ready");
        Ok(Self {
            pool,
            poller,
            buffer: LineBuffer::with_chunk_size(CHUNK_SIZE),
        })
    }

    /// Pump `input` into the pool until it is drained or a signal stops the
    /// run.
    ///
    /// `input_fd` is the raw descriptor behind `input`. Reads are only
    /// issued after a bounded poll reports it readable, so the loop never
    /// parks in `read(2)` and signal flags are seen within one interval.
    /// Pass `None` for in-memory sources, which cannot park.
    pub fn run<R: Read>(&mut self, input: &mut R, input_fd: Option<RawFd>) -> Result<Outcome> {
        let mut ready: ReadyList = Vec::new();

        loop {
            if let Some(sig) = signals::take_termination() {
                info!(signal = ?sig, "Termination requested, stopping dispatch");
                self.pool.terminate_all(sig);
                self.teardown();
                return Ok(Outcome::Terminated);
            }
            if signals::take_child_exit() {
                self.collect_exited();
            }

            if self.pool.pipe_count() == 0 {
                return self.finish_without_pool(input, input_fd);
            }

            if ready.is_empty() {
                ready = self.poller.poll(PollTimeout::from(POLL_INTERVAL_MS))?;
                continue;
            }

            let Some(unit) = self.buffer.peek_unit() else {
                if self.buffer.at_eof() {
                    break;
                }
                if !self.input_ready(input_fd)? {
                    continue;
                }
                match self.buffer.refill(input)? {
                    Refill::Data(n) => {
                        trace!(bytes = n, "Input refilled");
                    }
                    Refill::Eof => {
                        debug!("Input exhausted");
                    }
                    Refill::NotReady | Refill::Interrupted => {}
                }
                continue;
            };

            let written = self.send_unit(&unit, &mut ready)?;
            self.buffer.advance(written);
        }

        self.teardown();
        Ok(Outcome::Completed)
    }

    /// Deliver one unit, using each ready pipe at most once.
    ///
    /// A short write leaves the remainder for the next ready pipe; a pipe
    /// whose worker died is dropped and costs nothing but its ready entry.
    /// Returns how many bytes of the unit were delivered.
    fn send_unit(&mut self, unit: &Range<usize>, ready: &mut ReadyList) -> Result<usize> {
        let mut at = unit.start;
        while at < unit.end {
            let Some(entry) = ready.pop() else {
                break;
            };
            // Error-only readiness means the reader side is already gone;
            // don't bother writing.
            if !entry.events.contains(PollFlags::POLLOUT) {
                debug!(fd = entry.fd, events = ?entry.events, "Worker pipe in error state, dropping it");
                self.poller.deregister(entry.fd);
                self.pool.drop_pipe(entry.fd);
                continue;
            }
            let rest = self.buffer.slice(&(at..unit.end));
            match self.pool.write_ready(entry.fd, rest) {
                Ok(0) => {
                    trace!(fd = entry.fd, "Ready pipe accepted nothing");
                }
                Ok(n) => {
                    if at + n < unit.end {
                        trace!(fd = entry.fd, written = n, "Short write, retrying remainder");
                    }
                    at += n;
                }
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(fd = entry.fd, "Worker pipe closed, dropping it");
                    self.poller.deregister(entry.fd);
                    self.pool.drop_pipe(entry.fd);
                }
                // Already dropped or reaped between poll and write.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(LinefanError::WorkerWrite(e)),
            }
        }
        Ok(at - unit.start)
    }

    /// Sweep exited workers and drop their readiness registrations.
    fn collect_exited(&mut self) {
        let reaped = self.pool.reap(false);
        for worker in &reaped {
            if let Some(fd) = worker.pipe {
                self.poller.deregister(fd);
                trace!(
                    worker_pid = worker.pid.as_raw(),
                    fd, "Dropped dead worker's pipe"
                );
            }
        }
        if !reaped.is_empty() {
            debug!(swept = reaped.len(), live = self.pool.len(), "Swept exited workers");
        }
    }

    /// Close every remaining pipe and clear its registration.
    fn teardown(&mut self) {
        for fd in self.pool.close_pipes() {
            self.poller.deregister(fd);
        }
    }

    /// The pool has no open pipes left. Finish cleanly if nothing remains
    /// to deliver, fail if data is left with nowhere to go.
    fn finish_without_pool<R: Read>(
        &mut self,
        input: &mut R,
        input_fd: Option<RawFd>,
    ) -> Result<Outcome> {
        if !self.buffer.is_drained() {
            return Err(LinefanError::PoolEmpty);
        }
        loop {
            if let Some(sig) = signals::take_termination() {
                info!(signal = ?sig, "Termination requested, stopping dispatch");
                self.pool.terminate_all(sig);
                return Ok(Outcome::Terminated);
            }
            if self.buffer.at_eof() {
                return Ok(Outcome::Completed);
            }
            if !self.input_ready(input_fd)? {
                continue;
            }
            match self.buffer.refill(input)? {
                Refill::Data(_) => return Err(LinefanError::PoolEmpty),
                Refill::NotReady | Refill::Eof | Refill::Interrupted => {}
            }
        }
    }

    /// Bounded wait for the input source to have data or EOF to report.
    ///
    /// Every refill goes through this gate first, so a silent blocking
    /// source can never park the process in `read(2)`; the loop keeps
    /// cycling back to its signal flags instead. Sources without a
    /// descriptor are in-memory and always count as readable. Polling the
    /// worker pipes here instead would return instantly while any are
    /// write-ready, turning the loop into a busy spin.
    fn input_ready(&self, input_fd: Option<RawFd>) -> Result<bool> {
        let Some(fd) = input_fd else {
            return Ok(true);
        };
        let mut gate = Poller::with_capacity(1);
        gate.register(fd, PollFlags::POLLIN)?;
        let fired = gate.poll(PollTimeout::from(POLL_INTERVAL_MS))?;
        Ok(!fired.is_empty())
    }
}

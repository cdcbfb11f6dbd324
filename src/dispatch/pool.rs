//! Worker subprocess pool.
//!
//! Each worker runs the user's command under a shell and exposes a single
//! private stdin pipe. The pool owns both the process table and the pipes.
//! Membership only shrinks after spawn: workers leave when reaped, pipes
//! close on demand, and nothing is ever respawned.

use std::collections::BTreeMap;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, info, trace, warn};

use crate::dispatch::signals;
use crate::error::{LinefanError, Result};

/// Shell used when $SHELL is unset or empty.
const DEFAULT_SHELL: &str = "/bin/sh";

/// A single worker subprocess and its stdin pipe.
///
/// The pipe is `None` once closed; the process entry survives until reaped.
#[derive(Debug)]
struct Worker {
    pid: Pid,
    stdin: Option<OwnedFd>,
}

impl Worker {
    /// Spawn one worker running `command_line` under `shell`.
    ///
    /// The child sees the shell's basename as argv[0]. Stdout and stderr are
    /// inherited so worker output flows straight through to the caller's.
    fn launch(shell: &str, shell_name: &str, command_line: &str) -> Result<Self> {
        let mut child = Command::new(shell)
            .arg0(shell_name)
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(LinefanError::Spawn)?;

        let pid = Pid::from_raw(child.id() as i32);
        let stdin = child.stdin.take().ok_or(LinefanError::MissingPipe)?;
        let stdin = OwnedFd::from(stdin);
        set_nonblocking(stdin.as_raw_fd())?;

        debug!(worker_pid = pid.as_raw(), "Worker spawned");
        Ok(Self {
            pid,
            stdin: Some(stdin),
        })
    }
}

/// Result of reaping one worker.
#[derive(Debug)]
pub struct Reaped {
    /// Pid of the worker that exited.
    pub pid: Pid,
    /// Raw fd of the pipe that was closed alongside it, if it was still open.
    pub pipe: Option<RawFd>,
}

/// Pool of worker subprocesses keyed by pid.
#[derive(Debug)]
pub struct WorkerPool {
    workers: BTreeMap<Pid, Worker>,
}

impl WorkerPool {
    /// Spawn `count` workers all running `command_line` under the user's
    /// shell ($SHELL, falling back to /bin/sh).
    pub fn spawn(count: usize, command_line: &str) -> Result<Self> {
        Self::spawn_with_shell(&resolve_shell(), count, command_line)
    }

    /// Spawn `count` workers under an explicit shell.
    pub fn spawn_with_shell(shell: &str, count: usize, command_line: &str) -> Result<Self> {
        let shell_name = Path::new(shell)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("sh");

        let mut workers = BTreeMap::new();
        for _ in 0..count {
            let worker = Worker::launch(shell, shell_name, command_line)?;
            workers.insert(worker.pid, worker);
        }

        info!(count = workers.len(), shell = %shell, "Worker pool started");
        Ok(Self { workers })
    }

    /// Number of workers still tracked (spawned and not yet reaped).
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether every worker has been reaped.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Number of workers whose stdin pipe is still open.
    pub fn pipe_count(&self) -> usize {
        self.workers.values().filter(|w| w.stdin.is_some()).count()
    }

    /// Raw fds of all open worker pipes, in stable pid order.
    pub fn pipes(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.workers
            .values()
            .filter_map(|w| w.stdin.as_ref().map(|p| p.as_raw_fd()))
    }

    /// Write as much of `buf` as the pipe behind `fd` accepts without
    /// blocking.
    ///
    /// Returns the number of bytes written, which may be short. Errors are
    /// only reported when no progress was made; once bytes have gone out the
    /// count is returned and any failure resurfaces on the next attempt, so
    /// delivered bytes are never resent.
    pub fn write_ready(&self, fd: RawFd, buf: &[u8]) -> io::Result<usize> {
        let Some(pipe) = self
            .workers
            .values()
            .filter_map(|w| w.stdin.as_ref())
            .find(|p| p.as_raw_fd() == fd)
        else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "descriptor does not belong to the pool",
            ));
        };

        let mut total = 0;
        while total < buf.len() {
            match nix::unistd::write(pipe, &buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => break,
                Err(e) => {
                    if total > 0 {
                        break;
                    }
                    return Err(io::Error::from_raw_os_error(e as i32));
                }
            }
        }
        Ok(total)
    }

    /// Close the pipe behind `fd` after a failed write.
    ///
    /// The worker stays in the table until reaped. Returns `false` if no
    /// open pipe matched.
    pub fn drop_pipe(&mut self, fd: RawFd) -> bool {
        for worker in self.workers.values_mut() {
            if worker.stdin.as_ref().is_some_and(|p| p.as_raw_fd() == fd) {
                worker.stdin = None;
                return true;
            }
        }
        false
    }

    /// Close every worker stdin pipe, signalling end of input.
    ///
    /// Returns the raw fds that were closed so callers can drop their
    /// readiness registrations.
    pub fn close_pipes(&mut self) -> Vec<RawFd> {
        let mut closed = Vec::new();
        for worker in self.workers.values_mut() {
            if let Some(pipe) = worker.stdin.take() {
                closed.push(pipe.as_raw_fd());
            }
        }
        closed
    }

    /// Collect exited workers.
    ///
    /// Non-blocking mode sweeps the table once and removes every worker that
    /// has already exited. Blocking mode waits for each remaining worker in
    /// turn; a termination request arriving mid-wait is forwarded to the
    /// children so the wait can finish. Reaping is idempotent: workers leave
    /// the table exactly once.
    pub fn reap(&mut self, blocking: bool) -> Vec<Reaped> {
        let pids: Vec<Pid> = self.workers.keys().copied().collect();
        let mut reaped = Vec::new();

        for pid in pids {
            loop {
                let options = if blocking {
                    None
                } else {
                    Some(WaitPidFlag::WNOHANG)
                };
                match waitpid(pid, options) {
                    Ok(WaitStatus::StillAlive) => break,
                    Ok(status) => {
                        log_exit(pid, status);
                        self.remove_worker(pid, &mut reaped);
                        break;
                    }
                    Err(Errno::EINTR) => {
                        if blocking && let Some(sig) = signals::take_termination() {
                            self.terminate_all(sig);
                        }
                    }
                    Err(Errno::ECHILD) => {
                        // Not a child anymore; treat as already gone.
                        self.remove_worker(pid, &mut reaped);
                        break;
                    }
                    Err(e) => {
                        warn!(worker_pid = pid.as_raw(), error = %e, "waitpid failed");
                        break;
                    }
                }
            }
        }
        reaped
    }

    /// Send `sig` to every tracked worker.
    ///
    /// Workers that are already gone (ESRCH) are skipped. Returns how many
    /// signals were delivered.
    pub fn terminate_all(&self, sig: Signal) -> usize {
        let mut delivered = 0;
        for pid in self.workers.keys() {
            match signal::kill(*pid, sig) {
                Ok(()) => delivered += 1,
                Err(Errno::ESRCH) => {}
                Err(e) => {
                    warn!(worker_pid = pid.as_raw(), error = %e, "Failed to signal worker");
                }
            }
        }
        info!(signal = ?sig, delivered, "Forwarded termination to workers");
        delivered
    }

    fn remove_worker(&mut self, pid: Pid, reaped: &mut Vec<Reaped>) {
        if let Some(worker) = self.workers.remove(&pid) {
            let pipe = worker.stdin.as_ref().map(|p| p.as_raw_fd());
            reaped.push(Reaped { pid, pipe });
        }
    }
}

/// Resolve the shell that runs worker commands: $SHELL, or /bin/sh when
/// unset or empty.
pub fn resolve_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SHELL.to_string())
}

/// Switch a pipe to non-blocking writes.
fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(LinefanError::Pipe)?;
    let flags = OFlag::from_bits_retain(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(LinefanError::Pipe)?;
    Ok(())
}

/// Log one worker exit at a level matching how it went.
fn log_exit(pid: Pid, status: WaitStatus) {
    match status {
        WaitStatus::Exited(_, code) => {
            debug!(worker_pid = pid.as_raw(), code, "Worker exited");
        }
        WaitStatus::Signaled(_, sig, _) => {
            warn!(worker_pid = pid.as_raw(), signal = ?sig, "Worker killed by signal");
        }
        _ => {
            trace!(worker_pid = pid.as_raw(), status = ?status, "Worker state change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::{Duration, Instant};

    const TEST_SHELL: &str = "/bin/sh";

    #[test]
    fn test_spawn_and_reap_cat_workers() {
        let mut pool = WorkerPool::spawn_with_shell(TEST_SHELL, 2, "cat").unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.pipe_count(), 2);

        // Closing the pipes sends EOF; cat exits cleanly.
        let closed = pool.close_pipes();
        assert_eq!(closed.len(), 2);
        assert_eq!(pool.pipe_count(), 0);

        let reaped = pool.reap(true);
        assert_eq!(reaped.len(), 2);
        assert!(pool.is_empty());

        // Reaping again is a no-op.
        assert!(pool.reap(true).is_empty());
        assert!(pool.reap(false).is_empty());
    }

    #[test]
    fn test_nonblocking_reap_sweeps_exited() {
        let mut pool = WorkerPool::spawn_with_shell(TEST_SHELL, 1, "cat").unwrap();
        pool.close_pipes();

        // The worker exits on its own once stdin closes; poll for it.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut collected = 0;
        while collected == 0 && Instant::now() < deadline {
            collected += pool.reap(false).len();
            if collected == 0 {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        assert_eq!(collected, 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_terminate_all_then_reap() {
        let mut pool = WorkerPool::spawn_with_shell(TEST_SHELL, 2, "sleep 60").unwrap();
        assert_eq!(pool.terminate_all(Signal::SIGTERM), 2);

        let reaped = pool.reap(true);
        assert_eq!(reaped.len(), 2);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_write_reaches_worker() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.txt");
        let command = format!("cat > {}", out_path.display());

        let mut pool = WorkerPool::spawn_with_shell(TEST_SHELL, 1, &command).unwrap();
        let fd = pool.pipes().next().unwrap();

        let written = pool.write_ready(fd, b"hello\n").unwrap();
        assert_eq!(written, 6);

        pool.close_pipes();
        pool.reap(true);

        let mut contents = String::new();
        std::fs::File::open(&out_path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "hello\n");
    }

    #[test]
    fn test_pipes_are_nonblocking() {
        let mut pool = WorkerPool::spawn_with_shell(TEST_SHELL, 1, "cat").unwrap();
        let fd = pool.pipes().next().unwrap();

        let flags = OFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFL).unwrap());
        assert!(flags.contains(OFlag::O_NONBLOCK));

        pool.close_pipes();
        pool.reap(true);
    }

    #[test]
    fn test_write_ready_unknown_fd() {
        let mut pool = WorkerPool::spawn_with_shell(TEST_SHELL, 1, "cat").unwrap();
        let err = pool.write_ready(-1, b"data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        pool.close_pipes();
        pool.reap(true);
    }

    #[test]
    fn test_drop_pipe() {
        let mut pool = WorkerPool::spawn_with_shell(TEST_SHELL, 1, "cat").unwrap();
        let fd = pool.pipes().next().unwrap();

        assert!(pool.drop_pipe(fd));
        assert_eq!(pool.pipe_count(), 0);
        assert!(!pool.drop_pipe(fd));

        // Worker is still tracked and exits once its stdin closed.
        assert_eq!(pool.len(), 1);
        pool.reap(true);
        assert!(pool.is_empty());
    }
}

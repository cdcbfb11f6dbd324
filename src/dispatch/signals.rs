//! Signal handling for the dispatch loop.
//!
//! Handlers do nothing but record what happened in atomics. Killing
//! workers, reaping and exiting all happen in the dispatch loop, where
//! ordinary code is safe to run. Handlers are installed without SA_RESTART
//! so blocking calls return EINTR and the loop gets a prompt look at the
//! flags.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::libc::c_int;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

use crate::error::{LinefanError, Result};

/// Signal number of a pending termination request, 0 when none.
static TERM_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Set once the first termination signal arrives; never cleared. Drives the
/// final exit status even when the pending request was already consumed.
static TERMINATION_SEEN: AtomicBool = AtomicBool::new(false);

/// Set by SIGCHLD; cleared when the dispatch loop sweeps for exits.
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_termination(signo: c_int) {
    TERM_SIGNAL.store(signo, Ordering::SeqCst);
    TERMINATION_SEEN.store(true, Ordering::SeqCst);
}

extern "C" fn on_child_exit(_signo: c_int) {
    CHILD_EXITED.store(true, Ordering::SeqCst);
}

/// Install the process signal disposition.
///
/// SIGINT, SIGTERM and SIGQUIT record a termination request. SIGCHLD
/// records that a child needs collecting (with SA_NOCLDSTOP, so stopped
/// children don't fire it). SIGPIPE is ignored so a dead worker surfaces
/// as EPIPE at the write site instead of killing the process.
pub fn install() -> Result<()> {
    let term = SigAction::new(
        SigHandler::Handler(on_termination),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let child = SigAction::new(
        SigHandler::Handler(on_child_exit),
        SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );

    // SAFETY: the handlers only touch atomics, which is async-signal-safe.
    unsafe {
        sigaction(Signal::SIGINT, &term).map_err(LinefanError::SignalSetup)?;
        sigaction(Signal::SIGTERM, &term).map_err(LinefanError::SignalSetup)?;
        sigaction(Signal::SIGQUIT, &term).map_err(LinefanError::SignalSetup)?;
        sigaction(Signal::SIGCHLD, &child).map_err(LinefanError::SignalSetup)?;
        nix::sys::signal::signal(Signal::SIGPIPE, SigHandler::SigIgn)
            .map_err(LinefanError::SignalSetup)?;
    }
    Ok(())
}

/// Consume a pending termination request, if any.
pub fn take_termination() -> Option<Signal> {
    let signo = TERM_SIGNAL.swap(0, Ordering::SeqCst);
    if signo == 0 {
        return None;
    }
    Signal::try_from(signo).ok()
}

/// Whether a termination signal has ever been seen.
pub fn termination_requested() -> bool {
    TERMINATION_SEEN.load(Ordering::SeqCst)
}

/// Consume the child-exit flag.
pub fn take_child_exit() -> bool {
    CHILD_EXITED.swap(false, Ordering::SeqCst)
}

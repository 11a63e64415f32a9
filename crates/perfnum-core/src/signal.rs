//! The single process-wide "a termination signal arrived" flag.
//!
//! Every role installs the same three handlers at start-up and polls
//! [`shutdown_requested`] at each main-loop head. The
//! broken-pipe signal is ignored everywhere; writes to a closed peer
//! surface as an `EPIPE` I/O error instead.

use std::sync::atomic::{AtomicI32, Ordering};

use nix::sys::signal::{self, SigHandler, Signal};

use crate::error::{PerfError, PerfResult};

static CAUGHT: AtomicI32 = AtomicI32::new(0);

extern "C" fn record(signum: libc::c_int) {
    CAUGHT.store(signum, Ordering::SeqCst);
}

/// Install handlers for SIGINT, SIGHUP and SIGQUIT, and ignore SIGPIPE.
/// Call once per process, before touching any IPC resource.
pub fn install() -> PerfResult<()> {
    let handler = SigHandler::Handler(record);
    for sig in [Signal::SIGINT, Signal::SIGHUP, Signal::SIGQUIT] {
        unsafe { signal::signal(sig, handler) }.map_err(|e| PerfError::SignalError {
            reason: format!("installing {sig}: {e}"),
        })?;
    }
    unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) }.map_err(|e| {
        PerfError::SignalError {
            reason: format!("ignoring SIGPIPE: {e}"),
        }
    })?;
    Ok(())
}

/// `true` once any of the three termination signals has been caught.
pub fn shutdown_requested() -> bool {
    CAUGHT.load(Ordering::SeqCst) != 0
}

/// Clear the flag. Only test code should need this; a real process exits
/// on the first shutdown request rather than resuming.
#[cfg(test)]
pub fn reset() {
    CAUGHT.store(0, Ordering::SeqCst);
}

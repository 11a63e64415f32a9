//! Shared polling helper for read paths that must still notice a
//! termination signal mid-wait, the same way the PIPES coordinator's
//! pipe reader already does (`coordinator/pipes.rs`): the descriptor is
//! non-blocking or carries a short read timeout, `recv` surfaces
//! `WouldBlock` instead of parking the thread, and this loop rechecks
//! the flag between attempts instead of trusting `EINTR` to interrupt a
//! blocking read (std's `Read` impls retry `EINTR` internally, so it
//! never reaches our code).

use std::io;
use std::time::Duration;

use perfnum_protocol::{recv, RecvOutcome};

use crate::signal;

/// Interval between a `WouldBlock` and the next read attempt; also used
/// as the read timeout set on non-blocking-unfriendly descriptors
/// (`TcpStream::set_read_timeout`).
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll `r` for the next record, sleeping between empty reads. Returns
/// `Ok(None)` the moment a termination signal is observed, instead of
/// waiting on a peer that may never write again.
pub fn recv_or_shutdown<R: io::Read>(r: &mut R) -> io::Result<Option<RecvOutcome>> {
    loop {
        if signal::shutdown_requested() {
            return Ok(None);
        }
        match recv(r)? {
            RecvOutcome::WouldBlock => std::thread::sleep(POLL_INTERVAL),
            outcome => return Ok(Some(outcome)),
        }
    }
}

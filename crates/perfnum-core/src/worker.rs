//! The worker (`compute`) inner loops: one per method, all sharing the
//! perfect-number predicate.

use std::io::Write;
use std::net::TcpStream;

use perfnum_config::Settings;
use perfnum_protocol::{send, RecvOutcome, Record};

use crate::error::{PerfError, PerfResult};
use crate::poll;
use crate::predicate::is_perfect;
use crate::shm::ShmRegion;
use crate::signal;

fn own_pid() -> i32 {
    nix::unistd::getpid().as_raw()
}

/// PIPES worker: tests every integer in `[start, end]` in order, sending
/// `PERFNUM` on each hit, `DONE` on exhaustion, `CLOSED` on a caught signal.
/// `out` is the worker's standard output, already wired to the
/// coordinator's pipe by the process that exec'd this one.
pub fn run_pipes<W: Write>(start: i64, end: i64, settings: &Settings, out: &mut W) -> PerfResult<()> {
    let pid = own_pid();
    for n in start..=end {
        if signal::shutdown_requested() {
            send(out, Record::Closed { pid })?;
            return Ok(());
        }
        if is_perfect(n, settings.max_divisors)? {
            send(out, Record::PerfNum { n })?;
        }
    }
    send(out, Record::Done { pid })?;
    Ok(())
}

/// SHMEM worker: claims candidates from the shared bitmap until none
/// remain or a signal arrives.
pub fn run_shmem(region: &ShmRegion, settings: &Settings) -> PerfResult<()> {
    let pid = own_pid();
    let slot = region.insert_self(pid)?;
    let mut scan_from = 0usize;

    loop {
        if signal::shutdown_requested() {
            break;
        }
        let Some(n) = region.claim_next(&mut scan_from)? else {
            break;
        };
        if is_perfect(n, settings.max_divisors)? {
            region.record_found(slot);
            region.insert_result(n)?;
        }
        region.record_tested(slot);
    }

    region.clear_self(slot);
    Ok(())
}

/// SOCKET worker: requests work with an initial `DONE` (overloaded here
/// to also mean "ready for more"), then tests whatever `RANGE` it's
/// handed until `REFUSE` or `CLOSED`. The stream carries a short read
/// timeout so a stalled wait for the next reply still rechecks
/// [`signal::shutdown_requested`] instead of blocking forever.
pub fn run_socket(stream: &mut TcpStream, settings: &Settings) -> PerfResult<()> {
    let pid = own_pid();
    stream.set_read_timeout(Some(poll::POLL_INTERVAL))?;
    send(stream, Record::Done { pid })?;

    loop {
        let Some(outcome) = poll::recv_or_shutdown(stream)? else {
            send(stream, Record::Closed {
                pid: perfnum_protocol::PID_CLIENT,
            })?;
            return Ok(());
        };

        match outcome {
            RecvOutcome::Record(Record::Range { start, end }) => {
                for n in start..=end {
                    if signal::shutdown_requested() {
                        send(stream, Record::Closed {
                            pid: perfnum_protocol::PID_CLIENT,
                        })?;
                        return Ok(());
                    }
                    if is_perfect(n, settings.max_divisors)? {
                        send(stream, Record::PerfNum { n })?;
                    }
                }
                send(stream, Record::Done { pid })?;
            }
            RecvOutcome::Record(Record::Refuse) => return Ok(()),
            RecvOutcome::Record(Record::Closed { .. }) | RecvOutcome::Closed => return Ok(()),
            RecvOutcome::Record(other) => {
                return Err(PerfError::Protocol(format!(
                    "unexpected record from server: {other:?}"
                )));
            }
            RecvOutcome::WouldBlock => continue,
        }
    }
}

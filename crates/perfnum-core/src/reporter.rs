//! The reporter (`report`): a read-only observer for each method, with an
//! optional `-k` shutdown-request mode.

use std::io::BufReader;
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use perfnum_config::Settings;
use perfnum_protocol::{send, RecvOutcome, Record, PID_SERVER};

use crate::error::{PerfError, PerfResult};
use crate::poll;
use crate::shm::ShmRegion;

/// The signal a `-k` reporter sends to request shutdown, distinct from
/// the interactive-interrupt signal used to reap workers.
const QUIT_SIGNAL: Signal = Signal::SIGQUIT;

fn read_manage_pid(settings: &Settings) -> PerfResult<i32> {
    let raw = std::fs::read_to_string(&settings.pid_file_path)?;
    raw.trim()
        .parse()
        .map_err(|_| PerfError::Protocol(format!("malformed pid file at {}", settings.pid_file_path.display())))
}

// ---------------------------------------------------------------- SHMEM

/// Print every discovered perfect number, the live roster, the tested
/// count, and the next untested integer.
pub fn shmem_display(settings: &Settings) -> PerfResult<()> {
    let region = ShmRegion::mount(settings)?;

    for n in region.results() {
        println!("{n}");
    }

    for entry in region.live_roster() {
        println!("compute({}): tested {}, found {}", entry.pid, entry.tested, entry.found);
    }

    let total_tested = region.total_tested();
    println!("total-tested {total_tested}");
    println!("remaining {}", region.limit() - total_tested);

    match region.lowest_untested() {
        Some(n) => println!("next untested integer: {n}"),
        None => println!("Testing complete"),
    }
    Ok(())
}

/// Send the quit signal to the coordinator whose pid is stored in the
/// shared-memory header.
pub fn shmem_kill(settings: &Settings) -> PerfResult<()> {
    let region = ShmRegion::mount(settings)?;
    let pid = region.manage_pid();
    kill(Pid::from_raw(pid), QUIT_SIGNAL).map_err(PerfError::from)?;
    println!("sent shutdown request to manage (pid {pid})");
    Ok(())
}

// ---------------------------------------------------------------- PIPES

/// Read the coordinator's pid from the PID file, open the FIFO, and print
/// perfect numbers as they arrive. The FIFO is put in non-blocking mode,
/// as the PIPES coordinator's own pipe reader already is, so a reporter
/// sitting idle between records still notices a termination signal.
pub fn pipes_display(settings: &Settings) -> PerfResult<()> {
    let manage_pid = read_manage_pid(settings)?;
    let file = std::fs::File::open(&settings.fifo_path)?;
    fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(PerfError::from)?;
    let mut reader = BufReader::new(file);

    loop {
        let Some(outcome) = poll::recv_or_shutdown(&mut reader)? else {
            return Ok(());
        };
        match outcome {
            RecvOutcome::Record(Record::PerfNum { n }) => println!("{n}"),
            RecvOutcome::Record(Record::Done { .. }) => {
                println!("Computation complete");
                return Ok(());
            }
            RecvOutcome::Record(Record::Closed { pid }) if pid == manage_pid => {
                println!("Manage was shut down before execution could complete");
                return Ok(());
            }
            RecvOutcome::Record(Record::Closed { pid }) => {
                println!("A compute process exited prematurely (pid {pid}); some results may be missing");
            }
            RecvOutcome::Closed => {
                println!("Manage was shut down before execution could complete");
                return Ok(());
            }
            RecvOutcome::Record(_) | RecvOutcome::WouldBlock => {}
        }
    }
}

/// Read the coordinator's pid and send the quit signal.
pub fn pipes_kill(settings: &Settings) -> PerfResult<()> {
    let pid = read_manage_pid(settings)?;
    kill(Pid::from_raw(pid), QUIT_SIGNAL).map_err(PerfError::from)?;
    println!("sent shutdown request to manage (pid {pid})");
    Ok(())
}

// --------------------------------------------------------------- SOCKET

/// Connect, subscribe with `NOTIFY`, and print the replayed history
/// followed by the live stream. The connection carries a short read
/// timeout so waiting on the subscription handshake or the next record
/// still rechecks the termination signal instead of blocking forever.
pub fn socket_display(server_ip: &str, settings: &Settings) -> PerfResult<()> {
    let mut stream = TcpStream::connect((server_ip, settings.tcp_port))?;
    stream.set_read_timeout(Some(poll::POLL_INTERVAL))?;
    send(&mut stream, Record::Notify)?;

    let Some(outcome) = poll::recv_or_shutdown(&mut stream)? else {
        return Ok(());
    };
    match outcome {
        RecvOutcome::Record(Record::Accept) => {}
        RecvOutcome::Record(Record::Refuse) => {
            println!("another reporter is already subscribed");
            return Ok(());
        }
        other => {
            return Err(PerfError::Protocol(format!(
                "unexpected reply to NOTIFY: {other:?}"
            )));
        }
    }

    loop {
        let Some(outcome) = poll::recv_or_shutdown(&mut stream)? else {
            return Ok(());
        };
        match outcome {
            RecvOutcome::Record(Record::PerfNum { n }) => println!("{n}"),
            RecvOutcome::Record(Record::Done { .. }) => {
                println!("Computation complete");
                return Ok(());
            }
            RecvOutcome::Record(Record::Closed { pid }) if pid == PID_SERVER => {
                println!("Manage was shut down before execution could complete");
                return Ok(());
            }
            RecvOutcome::Record(Record::Closed { pid }) => {
                println!("A compute process exited prematurely (pid {pid}); some results may be missing");
            }
            RecvOutcome::Closed => {
                println!("Manage was shut down before execution could complete");
                return Ok(());
            }
            RecvOutcome::Record(_) | RecvOutcome::WouldBlock => {}
        }
    }
}

/// Connect and send `KILL`.
pub fn socket_kill(server_ip: &str, settings: &Settings) -> PerfResult<()> {
    let mut stream = TcpStream::connect((server_ip, settings.tcp_port))?;
    send(&mut stream, Record::Kill)?;
    println!("sent shutdown request to the socket coordinator");
    Ok(())
}

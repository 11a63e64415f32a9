//! PIPES coordinator: pre-partitions `[1, L]`, forks one worker per
//! partition with its standard output wired to a shared anonymous pipe,
//! and forwards results to a reporter connected through a named pipe.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{dup2, execv, fork, mkfifo, pipe, ForkResult, Pid};

use perfnum_config::Settings;
use perfnum_protocol::{recv, send, RecvOutcome, Record};

use crate::error::{PerfError, PerfResult};
use crate::signal;

use super::sibling_binary;

/// Split `[1, limit]` into `nprocs` contiguous blocks. The first block
/// absorbs the remainder of `limit / nprocs`, on the rationale that it is
/// started first and warms up fastest.
fn partition(limit: i64, nprocs: usize) -> Vec<(i64, i64)> {
    let n = nprocs as i64;
    let block = limit / n;
    let remainder = limit % n;

    let mut ranges = Vec::with_capacity(nprocs);
    let mut cursor = 1i64;
    for i in 0..nprocs {
        let size = if i == 0 { block + remainder } else { block };
        let end = cursor + size - 1;
        ranges.push((cursor, end));
        cursor = end + 1;
    }
    ranges
}

struct Child {
    pid: Pid,
    exited: bool,
}

/// Reap every child that has already exited, without blocking.
fn reap_finished(children: &mut [Child]) {
    for child in children.iter_mut() {
        if child.exited {
            continue;
        }
        match waitpid(child.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => {}
            Ok(_) => child.exited = true,
        }
    }
}

fn exec_worker(compute_path: &Path, start: i64, end: i64) -> ! {
    let path = match CString::new(compute_path.to_string_lossy().into_owned()) {
        Ok(p) => p,
        Err(_) => std::process::exit(127),
    };
    let args = [
        CString::new("compute").unwrap(),
        CString::new("p").unwrap(),
        CString::new(start.to_string()).unwrap(),
        CString::new(end.to_string()).unwrap(),
    ];
    let _ = execv(&path, &args);
    // execv only returns on failure.
    std::process::exit(127);
}

/// Fork `nprocs` workers, each covering one partition of `[1, limit]`,
/// each with its standard output redirected to the write end of a shared
/// anonymous pipe.
fn spawn_workers(limit: i64, nprocs: usize) -> PerfResult<(File, Vec<Child>)> {
    let (read_fd, write_fd) = pipe().map_err(PerfError::from)?;
    let compute_path = sibling_binary("compute")?;

    let mut children = Vec::with_capacity(nprocs);
    for (start, end) in partition(limit, nprocs) {
        match unsafe { fork() }.map_err(PerfError::from)? {
            ForkResult::Parent { child } => {
                children.push(Child { pid: child, exited: false });
            }
            ForkResult::Child => {
                let _ = dup2(write_fd.as_raw_fd(), libc::STDOUT_FILENO);
                drop(write_fd);
                drop(read_fd);
                exec_worker(&compute_path, start, end);
            }
        }
    }

    // Parent has no business writing to the pipe.
    drop(write_fd);

    let reader = File::from(read_fd);
    fcntl(reader.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(PerfError::from)?;
    Ok((reader, children))
}

/// Run the PIPES coordinator end-to-end: fork workers, bridge their
/// output to the reporter's FIFO, and tear everything down on completion
/// or signal.
pub fn run(limit: i64, nprocs: usize, settings: &Settings) -> PerfResult<()> {
    if limit <= 0 {
        return Err(PerfError::InvalidLimit { limit });
    }
    if nprocs == 0 {
        return Err(PerfError::Protocol("nprocs must be greater than zero".into()));
    }

    let own_pid = nix::unistd::getpid().as_raw();
    let (mut pipe_reader, mut children) = spawn_workers(limit, nprocs)?;

    std::fs::write(&settings.pid_file_path, format!("{own_pid}"))?;

    if settings.fifo_path.exists() {
        let _ = std::fs::remove_file(&settings.fifo_path);
    }
    mkfifo(&settings.fifo_path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(PerfError::from)?;

    tracing::info!(fifo = %settings.fifo_path.display(), "waiting for reporter to open FIFO");
    let mut fifo_writer = OpenOptions::new().write(true).open(&settings.fifo_path)?;
    tracing::info!("reporter connected");

    let mut exited = 0usize;
    let shutdown_signalled = loop {
        if signal::shutdown_requested() {
            break true;
        }
        if exited == nprocs {
            break false;
        }

        match recv(&mut pipe_reader)? {
            RecvOutcome::Record(Record::PerfNum { n }) => {
                if let Err(e) = send(&mut fifo_writer, Record::PerfNum { n }) {
                    if e.kind() == ErrorKind::BrokenPipe {
                        tracing::warn!("FIFO write failed with broken pipe, ending early");
                        break false;
                    }
                    return Err(e.into());
                }
            }
            RecvOutcome::Record(Record::Done { pid }) => {
                mark_exited(&mut children, pid);
                exited += 1;
            }
            RecvOutcome::Record(Record::Closed { pid }) => {
                mark_exited(&mut children, pid);
                exited += 1;
                tracing::warn!(pid, "a worker exited prematurely, forwarding to reporter");
                if let Err(e) = send(&mut fifo_writer, Record::Closed { pid }) {
                    if e.kind() == ErrorKind::BrokenPipe {
                        break false;
                    }
                    return Err(e.into());
                }
            }
            RecvOutcome::Record(_) | RecvOutcome::Closed => {
                tracing::warn!("unexpected record on worker pipe, ignoring");
            }
            RecvOutcome::WouldBlock => {
                reap_finished(&mut children);
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    };

    let downstream = if shutdown_signalled {
        Record::Closed { pid: own_pid }
    } else {
        Record::Done { pid: own_pid }
    };
    if let Err(e) = send(&mut fifo_writer, downstream) {
        tracing::warn!(%e, "failed to send final status to reporter");
    }

    drop(fifo_writer);
    drop(pipe_reader);
    let _ = std::fs::remove_file(&settings.fifo_path);
    let _ = std::fs::remove_file(&settings.pid_file_path);

    for child in &mut children {
        if child.exited {
            continue;
        }
        if let Err(e) = kill(child.pid, Signal::SIGINT) {
            tracing::warn!(pid = child.pid.as_raw(), %e, "failed to signal worker during teardown");
        }
        let _ = waitpid(child.pid, None);
    }

    Ok(())
}

/// Reap the child that just reported `pid` via `DONE`/`CLOSED`. The
/// record reaches us over the pipe before the sender has necessarily
/// called `exit` (it arrives as soon as `send` returns), so a `WNOHANG`
/// `waitpid` right here often finds nothing yet. Block instead: the
/// child is already on its way out, so this returns almost immediately,
/// and the child is genuinely reaped before `exited` is set.
fn mark_exited(children: &mut [Child], pid: i32) {
    for child in children.iter_mut() {
        if child.pid.as_raw() == pid {
            let _ = waitpid(child.pid, None);
            child.exited = true;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_matches_spec_example() {
        let ranges = partition(30, 3);
        assert_eq!(ranges, vec![(1, 10), (11, 20), (21, 30)]);
    }

    #[test]
    fn partition_gives_remainder_to_first_block() {
        let ranges = partition(31, 3);
        assert_eq!(ranges, vec![(1, 11), (12, 21), (22, 31)]);
        let total: i64 = ranges.iter().map(|(s, e)| e - s + 1).sum();
        assert_eq!(total, 31);
    }

    #[test]
    fn partition_covers_every_candidate_exactly_once() {
        let ranges = partition(97, 7);
        let mut seen = std::collections::HashSet::new();
        for (s, e) in ranges {
            for n in s..=e {
                assert!(seen.insert(n), "{n} assigned twice");
            }
        }
        assert_eq!(seen.len(), 97);
    }
}

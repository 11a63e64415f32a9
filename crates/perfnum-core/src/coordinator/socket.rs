//! SOCKET coordinator: a TCP server that hands out work ranges on demand,
//! maintains a roster of connected workers, and streams results to at
//! most one subscribed reporter.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

use nix::sys::select::{select, FdSet};
use nix::sys::time::{TimeVal, TimeValLike};
use socket2::{Domain, Socket, Type};

use perfnum_config::Settings;
use perfnum_protocol::{recv, send, RecvOutcome, Record, PID_CLIENT, PID_SERVER};

use crate::error::{PerfError, PerfResult};
use crate::poll;
use crate::signal;

struct ClientSlot {
    stream: TcpStream,
    is_subscriber: bool,
}

/// Server-side state carried across one `manage s` run: the result
/// history (so a late `NOTIFY` subscriber can be replayed the full
/// history), the high-water mark of assigned work, and the two sticky
/// flags a subscriber's `ACCEPT` reply depends on.
struct ServerState {
    limit: i64,
    highest_assigned: i64,
    done: bool,
    worker_died: bool,
    history: Vec<i64>,
    clients: Vec<Option<ClientSlot>>,
}

impl ServerState {
    fn new(limit: i64, settings: &Settings) -> Self {
        let mut clients = Vec::with_capacity(settings.max_socket_clients);
        clients.resize_with(settings.max_socket_clients, || None);
        ServerState {
            limit,
            highest_assigned: 0,
            done: false,
            worker_died: false,
            history: Vec::new(),
            clients,
        }
    }

    fn first_free_slot(&self) -> Option<usize> {
        self.clients.iter().position(|c| c.is_none())
    }

    fn subscriber_index(&self) -> Option<usize> {
        self.clients
            .iter()
            .position(|c| matches!(c, Some(slot) if slot.is_subscriber))
    }

    /// Compute the next range grant, clipped to `limit` — a grant never
    /// runs past `L`, since testing candidates outside `[1, L]` is out of
    /// scope (see DESIGN.md for the rationale).
    fn next_range(&mut self, settings: &Settings) -> Option<(i64, i64)> {
        if self.highest_assigned >= self.limit {
            return None;
        }
        let start = self.highest_assigned + 1;
        let end = (self.highest_assigned + settings.nassign).min(self.limit);
        self.highest_assigned = end;
        Some((start, end))
    }
}

fn forward_to_subscriber(state: &mut ServerState, record: Record) {
    if let Some(idx) = state.subscriber_index() {
        if let Some(slot) = &mut state.clients[idx] {
            if let Err(e) = send(&mut slot.stream, record) {
                tracing::warn!(%e, "failed to forward record to subscriber");
            }
        }
    }
}

/// Bind `INADDR_ANY:<port>` with address-reuse and an explicit listen
/// backlog. `std::net::TcpListener` has no way to set a custom backlog,
/// so the socket is built with `socket2`, then converted to a standard
/// `TcpListener` for everyday `accept`/`AsRawFd` use.
fn bind_listener(settings: &Settings) -> PerfResult<TcpListener> {
    let addr: SocketAddr = ([0, 0, 0, 0], settings.tcp_port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).map_err(|e| PerfError::BindError {
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;
    socket.set_reuse_address(true).map_err(|e| PerfError::BindError {
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;
    socket.bind(&addr.into()).map_err(|e| PerfError::BindError {
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;
    socket.listen(settings.listen_backlog).map_err(|e| PerfError::BindError {
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;
    let listener: TcpListener = socket.into();
    listener.set_nonblocking(false).ok();
    Ok(listener)
}

/// Bind and serve the SOCKET coordinator until a `KILL` record or a
/// termination signal arrives.
pub fn run(limit: i64, settings: &Settings) -> PerfResult<()> {
    if limit <= 0 {
        return Err(PerfError::InvalidLimit { limit });
    }

    let listener = bind_listener(settings)?;

    tracing::info!(port = settings.tcp_port, limit, "socket coordinator listening");

    let mut state = ServerState::new(limit, settings);

    'main: loop {
        if signal::shutdown_requested() {
            break;
        }

        let mut readfds = FdSet::new();
        readfds.insert(listener.as_raw_fd());
        let mut max_fd: RawFd = listener.as_raw_fd();
        for slot in state.clients.iter().flatten() {
            let fd = slot.stream.as_raw_fd();
            readfds.insert(fd);
            max_fd = max_fd.max(fd);
        }

        // `select` would otherwise block indefinitely with no client
        // connected yet; a short timeout lets the loop come back around
        // to the shutdown check above instead of relying on `EINTR`
        // (which a restarted syscall may never surface to us).
        let mut timeout = TimeVal::milliseconds(poll::POLL_INTERVAL.as_millis() as i64);
        match select(Some(max_fd + 1), Some(&mut readfds), None, None, Some(&mut timeout)) {
            Ok(_) => {}
            Err(nix::Error::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }

        if readfds.contains(listener.as_raw_fd()) {
            match listener.accept() {
                Ok((stream, addr)) => match state.first_free_slot() {
                    Some(idx) => {
                        tracing::info!(%addr, "accepted worker connection");
                        stream.set_nodelay(true).ok();
                        stream.set_read_timeout(Some(poll::POLL_INTERVAL)).ok();
                        state.clients[idx] = Some(ClientSlot { stream, is_subscriber: false });
                    }
                    None => {
                        tracing::warn!(%addr, "client table full, refusing connection");
                        drop(stream);
                    }
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        for idx in 0..state.clients.len() {
            let fd = match &state.clients[idx] {
                Some(slot) => slot.stream.as_raw_fd(),
                None => continue,
            };
            if !readfds.contains(fd) {
                continue;
            }

            let outcome = {
                let slot = state.clients[idx].as_mut().unwrap();
                match recv(&mut slot.stream) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(%e, "read error from client, dropping connection");
                        RecvOutcome::Closed
                    }
                }
            };

            match outcome {
                RecvOutcome::Closed => {
                    state.clients[idx] = None;
                }
                RecvOutcome::WouldBlock => {}
                RecvOutcome::Record(Record::PerfNum { n }) => {
                    state.history.push(n);
                    forward_to_subscriber(&mut state, Record::PerfNum { n });
                }
                RecvOutcome::Record(Record::Done { .. }) => {
                    let reply = match state.next_range(settings) {
                        Some((start, end)) => Record::Range { start, end },
                        None => {
                            state.done = true;
                            forward_to_subscriber(&mut state, Record::Done { pid: PID_SERVER });
                            Record::Refuse
                        }
                    };
                    if let Some(slot) = state.clients[idx].as_mut() {
                        let _ = send(&mut slot.stream, reply);
                    }
                }
                RecvOutcome::Record(Record::Closed { pid }) => {
                    state.worker_died = true;
                    forward_to_subscriber(&mut state, Record::Closed { pid });
                }
                RecvOutcome::Record(Record::Kill) => {
                    break 'main;
                }
                RecvOutcome::Record(Record::Notify) => {
                    if state.subscriber_index().is_some() {
                        if let Some(slot) = state.clients[idx].as_mut() {
                            let _ = send(&mut slot.stream, Record::Refuse);
                        }
                    } else {
                        let history = state.history.clone();
                        let worker_died = state.worker_died;
                        let done = state.done;
                        if let Some(slot) = state.clients[idx].as_mut() {
                            slot.is_subscriber = true;
                            let _ = send(&mut slot.stream, Record::Accept);
                            if worker_died {
                                let _ = send(&mut slot.stream, Record::Closed { pid: PID_CLIENT });
                            }
                            for n in history {
                                let _ = send(&mut slot.stream, Record::PerfNum { n });
                            }
                            if done {
                                let _ = send(&mut slot.stream, Record::Done { pid: PID_SERVER });
                            }
                        }
                    }
                }
                RecvOutcome::Record(other) => {
                    tracing::warn!(?other, "unexpected record tag from client, ignoring");
                }
            }
        }
    }

    tracing::info!("shutdown requested, closing every connection");
    for slot in state.clients.iter_mut().flatten() {
        let _ = send(&mut slot.stream, Record::Closed { pid: PID_SERVER });
    }
    drop(state.clients);
    drop(listener);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_range_clips_the_final_grant_to_limit() {
        let settings = Settings::default();
        let mut state = ServerState::new(2500, &settings);

        assert_eq!(state.next_range(&settings), Some((1, 1000)));
        assert_eq!(state.next_range(&settings), Some((1001, 2000)));
        assert_eq!(state.next_range(&settings), Some((2001, 2500)));
        assert_eq!(state.next_range(&settings), None);
    }

    #[test]
    fn first_free_slot_finds_a_gap() {
        let settings = Settings::default();
        let state = ServerState::new(10, &settings);
        assert_eq!(state.first_free_slot(), Some(0));
    }
}

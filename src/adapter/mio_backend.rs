//! Default, portable [`NetworkAdapter`] backend built on `mio`.
//!
//! `mio` is readiness-based, not completion-based: there is no kernel
//! object to "submit a recv into" the way `io_uring` has. This backend
//! folds submit+complete into one step — `recv_packet`/`send_packet`
//! record *intent*, and [`MioAdapter::pop_completed_events`] performs the
//! actual `read`/`write` synchronously once `mio::Poll` reports readiness,
//! treating the syscall's outcome as the "completion". This is the same
//! adaptation the pack's other readiness-based examples use (e.g. the
//! `tokio-rs/mio` TCP server: poll, then read inline on a readable event).

use super::{Completion, NetworkAdapter};
use crate::connection::Stage;
use crate::errors::CoreError;
use crate::pool::{ConnectionHandle, ConnectionPool};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::warn;

/// Synthesized classification results, not real errno values — this
/// backend is the only producer and [`MioAdapter::is_canceled`] /
/// [`MioAdapter::is_corrupted`] are the only consumers.
const CANCELED: isize = -1;
const CORRUPTED: isize = -2;

const LISTENER_TOKEN: Token = Token(0);

enum Pending {
    Recv { deadline: Instant },
    Send,
}

/// The default backend selected by [`crate::server::ServerBuilder::build`]
/// unless an `io_uring` backend is explicitly requested.
pub struct MioAdapter {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    streams: HashMap<ConnectionHandle, TcpStream>,
    pending: HashMap<ConnectionHandle, Pending>,
    accept_queue: VecDeque<ConnectionHandle>,
    /// Connections torn down synchronously by `close_connection_gracefully`,
    /// waiting for the next [`MioAdapter::pop_completed_events`] call to
    /// surface their completion. Without this, a connection that finished
    /// closing would sit in `Stage::WaitingToClose` forever: mio shuts a
    /// socket down inline, so there's no readiness event to drive the
    /// state machine's second pass.
    pending_close: VecDeque<ConnectionHandle>,
    heartbeat_period: Option<Duration>,
    heartbeat_due: Option<Instant>,
}

impl MioAdapter {
    pub fn bind(hostname: &str, port: u16, queue_depth: u32) -> io::Result<Self> {
        let addr = format!("{hostname}:{port}").parse().map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "invalid hostname/port")
        })?;
        let mut listener = TcpListener::bind(addr)?;
        let _ = queue_depth; // mio's TcpListener uses the platform default backlog.

        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            listener,
            streams: HashMap::new(),
            pending: HashMap::new(),
            accept_queue: VecDeque::new(),
            pending_close: VecDeque::new(),
            heartbeat_period: None,
            heartbeat_due: None,
        })
    }

    /// `handle` already uniquely and stably identifies a pool slot, so the
    /// token derived from it needs no separate allocator.
    fn token_for(handle: ConnectionHandle) -> Token {
        Token(handle as usize + 1)
    }

    fn poll_timeout(&self) -> Option<Duration> {
        let earliest_recv = self
            .pending
            .values()
            .filter_map(|p| match p {
                Pending::Recv { deadline } => Some(*deadline),
                Pending::Send => None,
            })
            .min();

        let candidates = [earliest_recv, self.heartbeat_due];
        candidates
            .into_iter()
            .flatten()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .min()
    }
}

impl NetworkAdapter for MioAdapter {
    fn try_accept(&mut self, conn: ConnectionHandle) -> Result<(), CoreError> {
        self.accept_queue.push_back(conn);
        Ok(())
    }

    fn recv_packet(&mut self, conn: ConnectionHandle, timeout: Duration) -> Result<(), CoreError> {
        self.pending.insert(conn, Pending::Recv { deadline: Instant::now() + timeout });
        if let Some(stream) = self.streams.get_mut(&conn) {
            let token = Self::token_for(conn);
            self.poll.registry().reregister(stream, token, Interest::READABLE).map_err(CoreError::from)?;
        }
        Ok(())
    }

    fn send_packet(&mut self, conn: ConnectionHandle) -> Result<(), CoreError> {
        self.pending.insert(conn, Pending::Send);
        if let Some(stream) = self.streams.get_mut(&conn) {
            let token = Self::token_for(conn);
            self.poll.registry().reregister(stream, token, Interest::WRITABLE).map_err(CoreError::from)?;
        }
        Ok(())
    }

    fn close_connection_gracefully(&mut self, conn: ConnectionHandle) -> Result<(), CoreError> {
        self.pending.remove(&conn);
        if let Some(mut stream) = self.streams.remove(&conn) {
            let _ = self.poll.registry().deregister(&mut stream);
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.pending_close.push_back(conn);
        Ok(())
    }

    fn set_stats_heartbeat(&mut self, frequency_secs: u64) {
        let period = Duration::from_secs(frequency_secs);
        self.heartbeat_period = Some(period);
        self.heartbeat_due = Some(Instant::now() + period);
    }

    fn pop_completed_events(&mut self, pool: &ConnectionPool, out: &mut Vec<Completion>, max: usize) -> usize {
        out.clear();
        if let Err(err) = self.poll.poll(&mut self.events, self.poll_timeout()) {
            warn!(?err, "mio poll failed");
            return 0;
        }

        if let Some(due) = self.heartbeat_due {
            if Instant::now() >= due {
                out.push(Completion { conn: 0, stage: Stage::LogStats, result: 0 });
                self.heartbeat_due = self.heartbeat_period.map(|p| Instant::now() + p);
            }
        }

        while out.len() < max {
            let Some(conn) = self.pending_close.pop_front() else { break };
            out.push(Completion { conn, stage: Stage::WaitingToClose, result: 0 });
        }

        // Collect tokens first: `self.events` is borrowed by the poll call
        // above, and servicing an event needs `&mut self` to perform the
        // actual read/write, so the two borrows can't overlap.
        let tokens: Vec<Token> = self.events.iter().map(|e| e.token()).collect();

        let mut handled = std::collections::HashSet::new();
        for token in tokens {
            if out.len() >= max {
                break;
            }
            if token == LISTENER_TOKEN {
                self.drain_accepts(out, max);
                continue;
            }
            let Some((&handle, _)) = self.pending.iter().find(|(h, _)| Self::token_for(**h) == token) else {
                continue;
            };
            if !handled.insert(handle) {
                continue;
            }
            self.service_ready(handle, pool, out);
        }

        self.expire_timeouts(out, max);
        out.len()
    }

    fn is_canceled(&self, result: isize) -> bool {
        result == CANCELED
    }

    fn is_corrupted(&self, result: isize) -> bool {
        result < 0 && result != CANCELED
    }
}

impl MioAdapter {
    fn drain_accepts(&mut self, out: &mut Vec<Completion>, max: usize) {
        loop {
            if out.len() >= max {
                return;
            }
            match self.listener.accept() {
                Ok((mut stream, _addr)) => {
                    let Some(handle) = self.accept_queue.pop_front() else {
                        // No admitted slot wants this connection; drop it
                        // (spec.md §4.6 admission over-subscription).
                        continue;
                    };
                    let token = Self::token_for(handle);
                    if self.poll.registry().register(&mut stream, token, Interest::READABLE).is_err() {
                        continue;
                    }
                    self.streams.insert(handle, stream);
                    out.push(Completion { conn: handle, stage: Stage::WaitingToAccept, result: 0 });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(_) => return,
            }
        }
    }

    fn service_ready(&mut self, handle: ConnectionHandle, pool: &ConnectionPool, out: &mut Vec<Completion>) {
        let is_recv = match self.pending.get(&handle) {
            Some(Pending::Recv { .. }) => true,
            Some(Pending::Send) => false,
            None => return,
        };
        let stage = if is_recv { Stage::ExpectingReception } else { Stage::RespondingInProgress };

        let result = if is_recv { self.do_recv(handle, pool) } else { self.do_send(handle, pool) };

        if let Some(result) = result {
            self.pending.remove(&handle);
            out.push(Completion { conn: handle, stage, result });
        }
    }

    fn do_recv(&mut self, handle: ConnectionHandle, pool: &ConnectionPool) -> Option<isize> {
        let stream = self.streams.get_mut(&handle)?;
        pool.with_record(handle, |record| {
            let buf = record.pipe.input.next_input_address_mut();
            match stream.read(buf) {
                Ok(n) => Some(n as isize),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                Err(_) => Some(CORRUPTED),
            }
        })
    }

    fn do_send(&mut self, handle: ConnectionHandle, pool: &ConnectionPool) -> Option<isize> {
        let stream = self.streams.get_mut(&handle)?;
        pool.with_record(handle, |record| {
            let window = record.pipe.output.send_window();
            match stream.write(window) {
                Ok(n) => Some(n as isize),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                Err(_) => Some(CORRUPTED),
            }
        })
    }

    fn expire_timeouts(&mut self, out: &mut Vec<Completion>, max: usize) {
        let now = Instant::now();
        let expired: Vec<ConnectionHandle> = self
            .pending
            .iter()
            .filter_map(|(h, p)| match p {
                Pending::Recv { deadline } if *deadline <= now => Some(*h),
                _ => None,
            })
            .collect();

        for handle in expired {
            if out.len() >= max {
                break;
            }
            self.pending.remove(&handle);
            out.push(Completion { conn: handle, stage: Stage::ExpectingReception, result: CANCELED });
        }
    }
}

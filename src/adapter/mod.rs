//! Network adapter: the abstraction over a kernel completion interface
//! (spec.md §4.2). Isolating these nine operations lets
//! [`crate::connection::step`] stay identical across a completion-based
//! backend (`io_uring`) and a readiness-based one (`mio`).

pub mod mio_backend;

#[cfg(target_os = "linux")]
pub mod io_uring_backend;

use crate::connection::Stage;
use crate::errors::CoreError;
use crate::pool::{ConnectionHandle, ConnectionPool};
use std::time::Duration;

/// One event popped off the adapter's completion queue (spec.md §4.2
/// `pop_completed_events`): which connection, what stage it was in when
/// submitted, and the raw result (negative = error code, non-negative =
/// byte count or new file descriptor).
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub conn: ConnectionHandle,
    pub stage: Stage,
    pub result: isize,
}

/// The nine operations spec.md §4.2 requires of any backend.
pub trait NetworkAdapter {
    /// Enqueues an accept that will complete with either a new socket
    /// handle or a cancellation status.
    fn try_accept(&mut self, conn: ConnectionHandle) -> Result<(), CoreError>;

    /// Enqueues a receive into `conn`'s fixed input buffer, linked to a
    /// timeout of `timeout`.
    fn recv_packet(&mut self, conn: ConnectionHandle, timeout: Duration) -> Result<(), CoreError>;

    /// Enqueues a send of `conn`'s currently prepared output window.
    fn send_packet(&mut self, conn: ConnectionHandle) -> Result<(), CoreError>;

    /// Enqueues cancellation of all pending ops on the socket, followed by
    /// a half-shutdown, followed by close, in hard-linked order.
    fn close_connection_gracefully(&mut self, conn: ConnectionHandle) -> Result<(), CoreError>;

    /// Arms (or re-arms) the heartbeat timer for `frequency_secs` seconds.
    fn set_stats_heartbeat(&mut self, frequency_secs: u64);

    /// Drains up to `max` completions into `out`, returning how many were
    /// written. `pool` is consulted so a readiness-based backend can
    /// perform the actual syscall against the connection's buffer at poll
    /// time (there is no separate "submit" stage to defer it to).
    fn pop_completed_events(&mut self, pool: &ConnectionPool, out: &mut Vec<Completion>, max: usize) -> usize;

    /// True if `result` represents a voluntary cancellation (e.g. a
    /// timeout-linked cancel), which the state machine treats as a
    /// back-off signal rather than a failure.
    fn is_canceled(&self, result: isize) -> bool;

    /// True if `result` represents a terminally broken connection (closed
    /// pipe, bad file descriptor).
    fn is_corrupted(&self, result: isize) -> bool;
}

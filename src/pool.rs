//! Connection pool: a fixed-capacity bag of reusable connection records
//! with O(1) alloc/release (spec.md §4.3), grounded on the teacher's
//! admission-buffer precedent but using a single mutex-protected `Vec`
//! rather than a lock-free queue, since spec.md §5 calls for exactly one
//! pool mutex.

use crate::{connection::Stage, pipe::ExchangePipe, protocol::Protocol};
use std::{
    net::SocketAddr,
    sync::Mutex,
    time::{Duration, Instant},
};

/// A stable small integer identifying a pool slot; doubles as the
/// kernel-facing fixed-buffer index (spec.md §4.3 `offset_of`).
pub type ConnectionHandle = u32;

/// Raw OS socket descriptor. Kept as a bare integer rather than a concrete
/// `TcpStream` type because the record must be representable identically
/// under either [`crate::adapter::mio_backend`] or
/// [`crate::adapter::io_uring_backend`]; each backend resolves it to its
/// own socket type.
pub type RawSocket = i32;

/// A pool-owned connection (spec.md §3 "Connection record").
pub struct ConnectionRecord {
    pub pipe: ExchangePipe,
    pub socket: Option<RawSocket>,
    pub stage: Stage,
    pub protocol: Protocol,
    pub peer_addr: Option<SocketAddr>,

    /// Nanoseconds slept since the connection's last activity.
    pub sleep_ns: u64,
    /// Consecutive zero-byte receives.
    pub empty_transmits: u32,
    /// Completed request/response exchanges.
    pub exchanges: u64,
    /// Current back-off duration for the linked receive timeout.
    pub next_wakeup: Duration,
    /// Wall-clock deadline, set from `Config::max_lifetime_micro_seconds`
    /// when non-zero (spec.md §9 open question, resolved by wiring it).
    pub expires_at: Option<Instant>,
}

/// Empty-transmit ceiling before a connection is force-closed
/// (spec.md §4.7 lifetime rule (b); source used the literal `100`).
pub const EMPTY_TRANSMIT_LIMIT: u32 = 100;

impl ConnectionRecord {
    fn new(protocol: Protocol) -> Self {
        Self {
            pipe: ExchangePipe::new(),
            socket: None,
            stage: Stage::WaitingToAccept,
            protocol,
            peer_addr: None,
            sleep_ns: 0,
            empty_transmits: 0,
            exchanges: 0,
            next_wakeup: Duration::from_micros(50),
            expires_at: None,
        }
    }

    /// Restores a record to the state a freshly allocated one would have
    /// (spec.md §8 "After reset(), ... byte-for-byte").
    pub fn reset(&mut self, protocol_template: &Protocol) {
        self.pipe.release_inputs();
        self.pipe.release_outputs();
        self.socket = None;
        self.stage = Stage::WaitingToAccept;
        self.protocol = protocol_template.fresh_clone();
        self.peer_addr = None;
        self.sleep_ns = 0;
        self.empty_transmits = 0;
        self.exchanges = 0;
        self.next_wakeup = Duration::from_micros(50);
        self.expires_at = None;
    }

    pub fn is_expired(&self, max_inactive_duration_ns: u64) -> bool {
        if self.sleep_ns > max_inactive_duration_ns {
            return true;
        }
        if let Some(deadline) = self.expires_at {
            if Instant::now() >= deadline {
                return true;
            }
        }
        self.empty_transmits > EMPTY_TRANSMIT_LIMIT
    }
}

/// Fixed-capacity arena of [`ConnectionRecord`]s plus a free-offset stack.
/// `N = max_concurrent_connections` records are preallocated once at
/// startup (spec.md §4.3).
pub struct ConnectionPool {
    records: Box<[Mutex<ConnectionRecord>]>,
    free: Mutex<Vec<ConnectionHandle>>,
}

impl ConnectionPool {
    pub fn new(capacity: usize, protocol_template: &Protocol) -> Self {
        let records: Vec<Mutex<ConnectionRecord>> = (0..capacity)
            .map(|_| Mutex::new(ConnectionRecord::new(protocol_template.fresh_clone())))
            .collect();
        let free = (0..capacity as ConnectionHandle).rev().collect();

        Self { records: records.into_boxed_slice(), free: Mutex::new(free) }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Pops a free offset in O(1). Returns `None` on exhaustion, which the
    /// admission path reports as a dismissed connection (spec.md §4.3).
    pub fn alloc(&self) -> Option<ConnectionHandle> {
        self.free.lock().unwrap().pop()
    }

    /// Pushes `handle` back onto the free stack. The caller must have
    /// already reset the record (spec.md §3 invariant (a): a released
    /// record carries no outstanding kernel operations).
    pub fn release(&self, handle: ConnectionHandle) {
        self.free.lock().unwrap().push(handle);
    }

    pub fn free_slots(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    pub fn active_connections(&self) -> usize {
        self.capacity() - self.free_slots()
    }

    pub fn with_record<R>(&self, handle: ConnectionHandle, f: impl FnOnce(&mut ConnectionRecord) -> R) -> R {
        let mut guard = self.records[handle as usize].lock().unwrap();
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Protocol;

    fn template() -> Protocol {
        Protocol::new_raw_tcp()
    }

    #[test]
    fn alloc_release_round_trips_capacity() {
        let pool = ConnectionPool::new(4, &template());
        assert_eq!(pool.free_slots(), 4);

        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_eq!(pool.free_slots(), 2);
        assert_eq!(pool.active_connections(), 2);

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.free_slots(), 4);
    }

    #[test]
    fn exhaustion_returns_none() {
        let pool = ConnectionPool::new(1, &template());
        let h = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
        pool.release(h);
        assert!(pool.alloc().is_some());
    }

    #[test]
    fn quiescent_invariant_active_plus_free_equals_capacity() {
        let pool = ConnectionPool::new(8, &template());
        let mut handles = Vec::new();
        for _ in 0..5 {
            handles.push(pool.alloc().unwrap());
        }
        assert_eq!(pool.active_connections() + pool.free_slots(), pool.capacity());
        for h in handles {
            pool.release(h);
        }
        assert_eq!(pool.active_connections() + pool.free_slots(), pool.capacity());
    }

    #[test]
    fn reset_restores_fresh_counters() {
        let pool = ConnectionPool::new(1, &template());
        let handle = pool.alloc().unwrap();
        pool.with_record(handle, |rec| {
            rec.exchanges = 7;
            rec.empty_transmits = 3;
            rec.stage = Stage::ExpectingReception;
            rec.reset(&template());
        });
        pool.with_record(handle, |rec| {
            assert_eq!(rec.exchanges, 0);
            assert_eq!(rec.empty_transmits, 0);
            assert_eq!(rec.stage, Stage::WaitingToAccept);
        });
    }
}

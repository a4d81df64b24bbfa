//! Atomic stats counters and the periodic heartbeat pseudo-connection
//! (spec.md §3 "Stats counters", §4.8 "Stats & heartbeat", §6 "Logging").

use crate::config::LogsFormat;
use std::sync::atomic::{AtomicU64, Ordering};

/// Six atomic counters, reset on every heartbeat emission (spec.md §3).
#[derive(Default)]
pub struct Stats {
    connections_added: AtomicU64,
    connections_closed: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    packets_sent: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_added(&self) {
        self.connections_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshots every counter and resets them to zero (relaxed ordering
    /// throughout, matching spec.md §5's stats ordering guarantee).
    pub fn take_snapshot(&self) -> Snapshot {
        Snapshot {
            connections_added: self.connections_added.swap(0, Ordering::Relaxed),
            connections_closed: self.connections_closed.swap(0, Ordering::Relaxed),
            bytes_received: self.bytes_received.swap(0, Ordering::Relaxed),
            bytes_sent: self.bytes_sent.swap(0, Ordering::Relaxed),
            packets_received: self.packets_received.swap(0, Ordering::Relaxed),
            packets_sent: self.packets_sent.swap(0, Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub connections_added: u64,
    pub connections_closed: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
}

impl Snapshot {
    /// Formats this snapshot per the `period_secs`-normalized rate line
    /// from spec.md §6 "Logging".
    pub fn format(&self, format: LogsFormat, period_secs: u64) -> String {
        let period = period_secs.max(1) as f64;
        match format {
            LogsFormat::Human => format!(
                "connections: +{:.1}/s, -{:.1}/s, RX: {:.1}/s, {:.1}/s, TX: {:.1}/s, {:.1}/s.",
                self.connections_added as f64 / period,
                self.connections_closed as f64 / period,
                self.packets_received as f64 / period,
                self.bytes_received as f64 / period,
                self.packets_sent as f64 / period,
                self.bytes_sent as f64 / period,
            ),
            LogsFormat::Json => format!(
                r#"{{"add":{},"close":{},"recv_bytes":{},"sent_bytes":{},"recv_packs":{},"sent_packs":{}}}"#,
                self.connections_added,
                self.connections_closed,
                self.bytes_received,
                self.bytes_sent,
                self.packets_received,
                self.packets_sent,
            ),
        }
    }
}

/// The engine's pseudo-connection used solely to re-enter the connection
/// state machine on a timer completion (spec.md §4.8). It owns no socket
/// and is never counted in `active_connections`.
pub struct Heartbeat {
    pub frequency_secs: u64,
}

impl Heartbeat {
    pub fn new(frequency_secs: u64) -> Self {
        Self { frequency_secs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_resets_counters() {
        let stats = Stats::new();
        stats.record_connection_added();
        stats.record_received(10);
        stats.record_sent(20);

        let snap = stats.take_snapshot();
        assert_eq!(snap.connections_added, 1);
        assert_eq!(snap.bytes_received, 10);
        assert_eq!(snap.bytes_sent, 20);

        let second = stats.take_snapshot();
        assert_eq!(second, Snapshot::default());
    }

    #[test]
    fn json_format_matches_spec_shape() {
        let snap = Snapshot {
            connections_added: 1,
            connections_closed: 2,
            bytes_received: 3,
            bytes_sent: 4,
            packets_received: 5,
            packets_sent: 6,
        };
        assert_eq!(
            snap.format(LogsFormat::Json, 1),
            r#"{"add":1,"close":2,"recv_bytes":3,"sent_bytes":4,"recv_packs":5,"sent_packs":6}"#
        );
    }

    #[test]
    fn human_format_normalizes_by_period() {
        let snap = Snapshot { connections_added: 10, ..Snapshot::default() };
        let line = snap.format(LogsFormat::Human, 10);
        assert!(line.starts_with("connections: +1.0/s"));
    }
}

//! Server configuration: every knob enumerated in the external-interfaces
//! section of the design, with the teacher's `*Limits` split kept as one
//! flat [`Config`] since the fields here are small enough not to warrant
//! separate structs per concern.

use std::time::Duration;

/// Which of the five framing dialects a [`crate::ServerEngine`] speaks.
///
/// Selected once at startup; every connection admitted by the engine is
/// parsed and framed with this single protocol (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// Null-terminated byte frames, no envelope.
    RawTcp,
    /// Plain HTTP/1.1, body is the handler's raw bytes.
    Http,
    /// JSON-RPC 2.0 requests/responses framed as null-terminated TCP frames.
    JsonRpcTcp,
    /// JSON-RPC 2.0 requests/responses framed inside an HTTP/1.1 envelope.
    JsonRpcHttp,
    /// URL-template REST dialect over HTTP/1.1.
    Rest,
}

/// Format for the periodic stats heartbeat (spec.md §6 "Logging").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogsFormat {
    /// `connections: +<rate>/s, -<rate>/s, RX: <msgs>/s, <bytes>/s, TX: <msgs>/s, <bytes>/s.`
    Human,
    /// `{"add":N,"close":N,"recv_bytes":N,"sent_bytes":N,"recv_packs":N,"sent_packs":N}`
    Json,
}

/// Strategy a worker uses while its completion queue is empty.
///
/// Generalizes the teacher's [`crate::limits::WaitStrategy`] (originally
/// `tokio::task::yield_now` / `tokio::time::sleep`) onto a plain OS-thread
/// loop: `Yield` calls `std::thread::yield_now`, `Sleep` parks the thread.
#[derive(Debug, Clone, Copy)]
pub enum WaitStrategy {
    /// Busy-spin with a `yield_now` between polls. Lowest latency, highest CPU.
    Yield,
    /// Sleep for the given duration between polls.
    Sleep(Duration),
}

/// Opaque TLS material paths. The core never reads these; it only carries
/// them to whatever external collaborator terminates TLS (out of scope,
/// spec.md §1).
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Full configuration for a [`crate::ServerEngine`] (spec.md §6).
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address (default `0.0.0.0`).
    pub hostname: String,
    /// Bind port (default `8545`).
    pub port: u16,
    /// Listen backlog and completion-queue depth (default `4096`).
    pub queue_depth: u32,
    /// Handler registry capacity (default `128`).
    pub max_callbacks: usize,
    /// Worker thread count (default `1`).
    pub max_threads: usize,
    /// Connection pool size (default `1024`).
    pub max_concurrent_connections: usize,
    /// Wall-clock connection expiry, wired to `ConnectionRecord::expires_at`
    /// (spec.md §9 open question, resolved in favor of wiring it).
    pub max_lifetime_micro_seconds: u64,
    /// Per-connection exchange cap (`exchanges >= this` closes the connection).
    pub max_lifetime_exchanges: u64,
    /// Ceiling on accumulated read-inactivity before a connection is closed.
    pub max_inactive_duration_ns: u64,
    /// Multiplier applied to `next_wakeup` on every receive timeout.
    pub sleep_growth_factor: f64,
    /// Selected protocol dialect.
    pub protocol: ProtocolKind,
    /// File descriptor the heartbeat writes to, `-1` disables it.
    pub logs_file_descriptor: i32,
    /// Heartbeat formatting.
    pub logs_format: LogsFormat,
    /// Heartbeat period.
    pub default_frequency_secs: u64,
    /// Strategy workers use while idle.
    pub wait_strategy: WaitStrategy,
    /// Opaque TLS material, unused by the core itself.
    pub tls: TlsConfig,

    #[doc(hidden)]
    pub _priv: (),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".to_string(),
            port: 8545,
            queue_depth: 4096,
            max_callbacks: 128,
            max_threads: 1,
            max_concurrent_connections: 1024,
            max_lifetime_micro_seconds: 0,
            max_lifetime_exchanges: u64::MAX,
            max_inactive_duration_ns: Duration::from_secs(10).as_nanos() as u64,
            sleep_growth_factor: 2.0,
            protocol: ProtocolKind::JsonRpcTcp,
            logs_file_descriptor: -1,
            logs_format: LogsFormat::Human,
            default_frequency_secs: 5,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            tls: TlsConfig::default(),

            _priv: (),
        }
    }
}

/// Builder for [`Config`], in the teacher's `ServerBuilder` idiom: every
/// field optional, `unwrap_or_default()` at `build()`.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self { config: Config::default() }
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = hostname.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn queue_depth(mut self, depth: u32) -> Self {
        self.config.queue_depth = depth;
        self
    }

    pub fn max_callbacks(mut self, n: usize) -> Self {
        self.config.max_callbacks = n;
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.config.max_threads = n;
        self
    }

    pub fn max_concurrent_connections(mut self, n: usize) -> Self {
        self.config.max_concurrent_connections = n;
        self
    }

    pub fn max_lifetime_micro_seconds(mut self, us: u64) -> Self {
        self.config.max_lifetime_micro_seconds = us;
        self
    }

    pub fn max_lifetime_exchanges(mut self, n: u64) -> Self {
        self.config.max_lifetime_exchanges = n;
        self
    }

    pub fn max_inactive_duration_ns(mut self, ns: u64) -> Self {
        self.config.max_inactive_duration_ns = ns;
        self
    }

    pub fn protocol(mut self, protocol: ProtocolKind) -> Self {
        self.config.protocol = protocol;
        self
    }

    pub fn logs(mut self, fd: i32, format: LogsFormat) -> Self {
        self.config.logs_file_descriptor = fd;
        self.config.logs_format = format;
        self
    }

    pub fn wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.config.wait_strategy = strategy;
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = tls;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = Config::default();
        assert_eq!(cfg.hostname, "0.0.0.0");
        assert_eq!(cfg.port, 8545);
        assert_eq!(cfg.queue_depth, 4096);
        assert_eq!(cfg.max_callbacks, 128);
        assert_eq!(cfg.max_threads, 1);
        assert_eq!(cfg.max_concurrent_connections, 1024);
    }

    #[test]
    fn builder_overrides_layer_on_defaults() {
        let cfg = ConfigBuilder::new().port(9090).max_threads(4).build();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.max_threads, 4);
        assert_eq!(cfg.max_concurrent_connections, 1024);
    }
}

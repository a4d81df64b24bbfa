//! Server engine (spec.md §4.6 "Server engine / admission"): owns the
//! accept socket, the pool, the registry, the scratch array, the stats, the
//! heartbeat pseudo-connection, and the admission flag. Generalizes the
//! teacher's single `TcpListener::accept().await` loop feeding a `SegQueue`
//! (`server/server_impl.rs` in the original `maker_web` tree) onto a
//! CAS-gated admission path shared by `Config::max_threads` OS-thread
//! workers, since the kernel-completion model lets any worker win the
//! accept rather than there being one dedicated acceptor task.

use crate::adapter::{mio_backend::MioAdapter, NetworkAdapter};
use crate::config::Config;
use crate::connection::{self, Stage};
use crate::errors::CoreError;
use crate::pool::ConnectionPool;
use crate::protocol::{Protocol, RestTemplate};
use crate::registry::{HandlerFn, HandlerRegistry, MethodKind};
use crate::scratch::ScratchArray;
use crate::stats::{Heartbeat, Stats};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{info, warn};

/// Owns every piece of engine-exclusive state from spec.md §3 "Ownership":
/// the pool, the registry, the scratch array, the stats, the heartbeat, and
/// (behind a mutex) the network adapter. Workers borrow scratch by thread
/// index and never hold a back-reference to this struct in a connection
/// record (spec.md §9 "Cyclic ownership").
pub struct ServerEngine {
    config: Config,
    pool: ConnectionPool,
    registry: HandlerRegistry,
    scratch: ScratchArray,
    stats: Stats,
    heartbeat: Heartbeat,
    protocol_template: Protocol,

    /// Single CAS admission flag (spec.md §4.6): only the worker that wins
    /// `0 -> 1` may have an outstanding accept submission at a time.
    reserved: AtomicBool,
    /// Connections dismissed for want of a free pool slot; once non-zero,
    /// already-admitted connections close at their next natural boundary
    /// (spec.md §4.7 lifetime rule (c), §5 "Back-pressure").
    dismissed: AtomicU64,

    /// One shared adapter instance. Spec.md §5 calls for exactly one
    /// submission mutex and one completion mutex; since every adapter
    /// operation here both submits and (for the readiness-based default
    /// backend) completes in the same call, a single mutex around the
    /// adapter covers both roles without duplicating the lock.
    adapter: Mutex<Box<dyn NetworkAdapter + Send>>,
}

impl ServerEngine {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn scratch(&self) -> &ScratchArray {
        &self.scratch
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn protocol_template(&self) -> &Protocol {
        &self.protocol_template
    }

    pub fn dismissed(&self) -> u64 {
        self.dismissed.load(Ordering::Relaxed)
    }

    /// Formats and writes the stats snapshot to `Config::logs_file_descriptor`,
    /// then resets the six counters (spec.md §4.8).
    pub fn emit_heartbeat(&self) {
        if self.config.logs_file_descriptor < 0 {
            self.stats.take_snapshot();
            return;
        }
        let snapshot = self.stats.take_snapshot();
        let line = snapshot.format(self.config.logs_format, self.heartbeat.frequency_secs);
        info!(target: "ringrpc::heartbeat", "{line}");
    }

    /// Wins the admission CAS (if free) and attempts to allocate a pool slot
    /// and submit an accept. Reverts the CAS on allocation/submission
    /// failure so a later call may retry (spec.md §4.6).
    fn try_admit(&self, adapter: &mut dyn NetworkAdapter) {
        if self
            .reserved
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let Some(handle) = self.pool.alloc() else {
            self.dismissed.fetch_add(1, Ordering::Relaxed);
            self.reserved.store(false, Ordering::Release);
            return;
        };

        self.pool.with_record(handle, |record| {
            record.stage = Stage::WaitingToAccept;
        });

        if let Err(err) = adapter.try_accept(handle) {
            warn!(?err, "accept submission failed, releasing reserved slot");
            self.pool.release(handle);
            self.reserved.store(false, Ordering::Release);
        }
    }

    /// Releases the admission CAS once the in-flight accept's completion has
    /// been observed, whichever way it resolved, so the next worker may
    /// submit another accept.
    fn release_admission(&self) {
        self.reserved.store(false, Ordering::Release);
    }

    /// One worker's main loop (spec.md §5 "Scheduling model"): poll the
    /// adapter for completions, drive each through the state machine, then
    /// opportunistically attempt admission of a new connection. Workers
    /// suspend only inside `pop_completed_events` (spec.md §5 "Suspension
    /// points"); every transition here is straight-line code. `worker_index`
    /// is this thread's fixed slot into the engine's `ScratchArray`
    /// (spec.md §4.3) — passed through to every dispatch on this thread,
    /// never shared with another worker.
    fn worker_loop(self: &Arc<Self>, worker_index: usize) {
        let mut completions = Vec::with_capacity(self.config.queue_depth.min(1024) as usize);
        loop {
            {
                let mut adapter = self.adapter.lock().unwrap();
                self.try_admit(&mut **adapter);
                adapter.pop_completed_events(&self.pool, &mut completions, 256);
            }

            for completion in completions.drain(..) {
                let was_accept = completion.stage == Stage::WaitingToAccept;
                let mut adapter = self.adapter.lock().unwrap();
                if let Err(err) = connection::step(
                    self,
                    &mut **adapter,
                    &self.pool,
                    completion.conn,
                    completion,
                    worker_index,
                ) {
                    warn!(?err, conn = completion.conn, "connection step failed");
                }
                drop(adapter);
                if was_accept {
                    self.release_admission();
                }
            }

            if completions.is_empty() {
                match self.config.wait_strategy {
                    crate::config::WaitStrategy::Sleep(d) => thread::sleep(d),
                    crate::config::WaitStrategy::Yield => thread::yield_now(),
                }
            }
        }
    }

    /// Spawns `Config::max_threads` worker threads and blocks the calling
    /// thread forever (the engine has no graceful-shutdown API — matching
    /// the teacher's `Server::launch`, which likewise runs until the process
    /// exits). Each worker gets a distinct index into the scratch array
    /// (spec.md §4.6 "scratch array"), the calling thread taking index 0.
    pub fn serve(self: Arc<Self>) -> ! {
        {
            let mut adapter = self.adapter.lock().unwrap();
            adapter.set_stats_heartbeat(self.heartbeat.frequency_secs);
        }

        let worker_count = self.config.max_threads.max(1);
        let mut handles = Vec::with_capacity(worker_count - 1);
        for worker_index in 1..worker_count {
            let engine = Arc::clone(&self);
            handles.push(thread::spawn(move || engine.worker_loop(worker_index)));
        }
        self.worker_loop(0);
        unreachable!("worker_loop never returns")
    }
}

/// Builds a [`ServerEngine`] (spec.md §6 "Configuration"), in the teacher's
/// `ServerBuilder` idiom: fields accumulate through consuming setters,
/// `build()` resolves defaults and performs the one-time setup (pool
/// preallocation, listener bind) that the engine cannot redo later.
pub struct ServerBuilder {
    config: Config,
    registry: HandlerRegistry,
    rest_templates: Vec<RestTemplate>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        let config = Config::default();
        let registry = HandlerRegistry::new(config.max_callbacks);
        Self { config, registry, rest_templates: Vec::new() }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.registry = HandlerRegistry::new(config.max_callbacks);
        self.config = config;
        self
    }

    /// Registers a handler under `name` for every protocol except REST
    /// (spec.md §4.5 `register`).
    pub fn register(mut self, name: &str, handler: HandlerFn, tag: usize) -> Self {
        self.registry.register(name, MethodKind::Any, handler, tag);
        self
    }

    /// Registers a REST route: `method` (`"GET"`/`"PUT"`/`"POST"`/`"DELETE"`)
    /// and a `{placeholder}` URL template (spec.md §4.4 "REST").
    pub fn register_rest(
        mut self,
        method: &str,
        pattern: &str,
        handler: HandlerFn,
        tag: usize,
    ) -> Result<Self, CoreError> {
        let template = RestTemplate::compile(method, pattern)?;
        let kind = match template.method.as_str() {
            "GET" => MethodKind::Get,
            "PUT" => MethodKind::Put,
            "POST" => MethodKind::Post,
            "DELETE" => MethodKind::Delete,
            _ => MethodKind::Any,
        };
        self.registry.register(pattern, kind, handler, tag);
        self.rest_templates.push(template);
        Ok(self)
    }

    /// Binds the listener for `Config::protocol`, preallocates the
    /// connection pool and scratch array, and returns a ready-to-run
    /// [`ServerEngine`] wrapped for sharing across worker threads.
    pub fn build(self) -> std::io::Result<Arc<ServerEngine>> {
        let protocol_template = match self.config.protocol {
            crate::config::ProtocolKind::RawTcp => Protocol::new_raw_tcp(),
            crate::config::ProtocolKind::Http => Protocol::new_http(),
            crate::config::ProtocolKind::JsonRpcTcp => Protocol::new_json_rpc_tcp(),
            crate::config::ProtocolKind::JsonRpcHttp => Protocol::new_json_rpc_http(),
            crate::config::ProtocolKind::Rest => Protocol::new_rest(self.rest_templates),
        };

        let pool = ConnectionPool::new(self.config.max_concurrent_connections, &protocol_template);
        let scratch = ScratchArray::new(self.config.max_threads.max(1));
        let adapter = MioAdapter::bind(&self.config.hostname, self.config.port, self.config.queue_depth)?;

        Ok(Arc::new(ServerEngine {
            heartbeat: Heartbeat::new(self.config.default_frequency_secs),
            config: self.config,
            pool,
            registry: self.registry,
            scratch,
            stats: Stats::new(),
            protocol_template,
            reserved: AtomicBool::new(false),
            dismissed: AtomicU64::new(0),
            adapter: Mutex::new(Box::new(adapter)),
        }))
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    fn noop(_call: &mut crate::reply::CallHandle, _tag: usize) {}

    #[test]
    fn build_preallocates_pool_to_configured_capacity() {
        let config = ConfigBuilder::new()
            .port(0)
            .max_concurrent_connections(16)
            .build();
        let engine = ServerBuilder::new().config(config).register("sum", noop, 0).build().unwrap();
        assert_eq!(engine.pool().capacity(), 16);
        assert_eq!(engine.registry().len(), 1);
    }

    #[test]
    fn rest_registration_compiles_template() {
        let config = ConfigBuilder::new()
            .port(0)
            .protocol(crate::config::ProtocolKind::Rest)
            .build();
        let engine = ServerBuilder::new()
            .config(config)
            .register_rest("GET", "/books/{id}", noop, 0)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(engine.registry().len(), 1);
    }
}

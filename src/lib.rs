//! ringrpc - a high-throughput, multi-protocol RPC server core.
//!
//! Accepts network connections, frames incoming requests in one of five
//! dialects (raw TCP, HTTP/1.1, JSON-RPC 2.0 over either transport, or a
//! URL-template REST dialect), dispatches each to a registered handler, and
//! writes the response back to the client. Built as a connection engine: a
//! per-connection state machine driving asynchronous I/O against a pluggable
//! completion interface, with zero-allocation steady-state operation via a
//! fixed connection pool and embedded-first exchange pipes.
//!
//! # Quick start
//!
//! ```no_run
//! use ringrpc::{ServerBuilder, Config, CallHandle, MethodKind};
//!
//! fn sum(call: &mut CallHandle, _tag: usize) {
//!     let a = call.param_named_i64("a").unwrap_or(0);
//!     let b = call.param_named_i64("b").unwrap_or(0);
//!     let _ = call.reply_content((a + b).to_string().as_bytes());
//! }
//!
//! fn main() -> std::io::Result<()> {
//!     let engine = ServerBuilder::new()
//!         .config(Config::default())
//!         .register("sum", sum, 0)
//!         .build()?;
//!     engine.serve();
//! }
//! ```
//!
//! # Scope
//!
//! This crate is the connection engine only: sample programs, CLI flag
//! parsing, TLS material loading, language bindings and user handler bodies
//! are out of scope. Handlers are opaque callbacks; TLS material is carried
//! as an opaque path pair for an external collaborator to consume.

pub mod adapter;
pub mod config;
pub mod errors;
pub mod pipe;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod reply;
pub mod scratch;
pub mod stats;

pub(crate) mod connection;
pub(crate) mod server;

pub use crate::{
    config::{Config, ConfigBuilder, LogsFormat, ProtocolKind, TlsConfig, WaitStrategy},
    errors::CoreError,
    pipe::HalfPipe,
    protocol::{Call, ParamValue, Protocol, RestTemplate},
    registry::{HandlerFn, MethodKind},
    reply::CallHandle,
    scratch::ScratchSpace,
    server::{ServerBuilder, ServerEngine},
};

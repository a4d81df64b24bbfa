//! Connection state machine (spec.md §4.7). `step` is the single transition
//! function; every connection is driven exclusively by completions handed
//! back from the [`crate::adapter::NetworkAdapter`].

use crate::adapter::{Completion, NetworkAdapter};
use crate::errors::CoreError;
use crate::pool::{ConnectionHandle, ConnectionPool, ConnectionRecord};
use crate::reply::CallHandle;
use crate::server::ServerEngine;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The six connection states from spec.md §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WaitingToAccept,
    ExpectingReception,
    RespondingInProgress,
    WaitingToClose,
    LogStats,
    Unknown,
}

/// Runs one completion through the state machine for `handle`, submitting
/// whatever follow-up operation the transition implies. `worker_index`
/// identifies the calling worker's slot in the engine's `ScratchArray`
/// (spec.md §4.3) and is only consulted on the dispatch transition.
pub fn step(
    engine: &ServerEngine,
    adapter: &mut dyn NetworkAdapter,
    pool: &ConnectionPool,
    handle: ConnectionHandle,
    completion: Completion,
    worker_index: usize,
) -> Result<(), CoreError> {
    if completion.stage == Stage::LogStats {
        engine.emit_heartbeat();
        adapter.set_stats_heartbeat(engine.config().default_frequency_secs);
        return Ok(());
    }

    pool.with_record(handle, |record| {
        step_record(engine, adapter, handle, record, completion, worker_index)
    })
}

fn step_record(
    engine: &ServerEngine,
    adapter: &mut dyn NetworkAdapter,
    handle: ConnectionHandle,
    record: &mut ConnectionRecord,
    completion: Completion,
    worker_index: usize,
) -> Result<(), CoreError> {
    if adapter.is_corrupted(completion.result) || is_expired(record, engine) {
        return close(engine, adapter, handle, record);
    }

    match record.stage {
        Stage::WaitingToAccept => on_accept(engine, adapter, handle, record, completion),
        Stage::ExpectingReception => on_receive(engine, adapter, handle, record, completion, worker_index),
        Stage::RespondingInProgress => on_send(engine, adapter, handle, record, completion),
        Stage::WaitingToClose => {
            pool_release(engine, handle);
            Ok(())
        }
        Stage::LogStats | Stage::Unknown => Ok(()),
    }
}

fn on_accept(
    engine: &ServerEngine,
    adapter: &mut dyn NetworkAdapter,
    handle: ConnectionHandle,
    record: &mut ConnectionRecord,
    completion: Completion,
) -> Result<(), CoreError> {
    if adapter.is_canceled(completion.result) {
        pool_release(engine, handle);
        return Ok(());
    }
    record.socket = Some(completion.result as crate::pool::RawSocket);
    engine.stats().record_connection_added();
    if engine.config().max_lifetime_micro_seconds > 0 {
        record.expires_at =
            Some(Instant::now() + Duration::from_micros(engine.config().max_lifetime_micro_seconds));
    }
    record.stage = Stage::ExpectingReception;
    adapter.recv_packet(handle, record.next_wakeup)
}

fn on_receive(
    engine: &ServerEngine,
    adapter: &mut dyn NetworkAdapter,
    handle: ConnectionHandle,
    record: &mut ConnectionRecord,
    completion: Completion,
    worker_index: usize,
) -> Result<(), CoreError> {
    if adapter.is_canceled(completion.result) {
        record.sleep_ns += record.next_wakeup.as_nanos() as u64;
        record.next_wakeup = record.next_wakeup.mul_f64(engine.config().sleep_growth_factor);
        return adapter.recv_packet(handle, record.next_wakeup);
    }

    let n = completion.result.max(0) as usize;
    if n == 0 {
        record.empty_transmits += 1;
        return adapter.recv_packet(handle, record.next_wakeup);
    }

    record.sleep_ns = 0;
    record.next_wakeup = Duration::from_micros(50);
    record.empty_transmits = 0;
    engine.stats().record_received(n as u64);
    record.pipe.input.absorb_input(n)?;

    let complete = record.protocol.is_input_complete(record.pipe.input_span());
    if !complete {
        record.pipe.input.shift_to_dynamic()?;
        return adapter.recv_packet(handle, record.next_wakeup);
    }

    record.stage = Stage::RespondingInProgress;
    dispatch(engine, record, worker_index)?;
    send_next(engine, adapter, handle, record)
}

fn on_send(
    engine: &ServerEngine,
    adapter: &mut dyn NetworkAdapter,
    handle: ConnectionHandle,
    record: &mut ConnectionRecord,
    completion: Completion,
) -> Result<(), CoreError> {
    let n = completion.result.max(0) as usize;
    engine.stats().record_sent(n as u64);
    record.pipe.output.mark_submitted(n);

    if !record.pipe.output.window_complete() {
        return adapter.send_packet(handle);
    }

    if record.pipe.output.prepare_more_outputs() {
        return adapter.send_packet(handle);
    }

    record.pipe.release_outputs();
    record.pipe.release_inputs();
    record.exchanges += 1;
    // Read must_close before reset() clears it back to false.
    let must_close = record.protocol.must_close()
        || record.exchanges >= engine.config().max_lifetime_exchanges
        || engine.dismissed() > 0;
    record.protocol.reset();

    if must_close {
        return close(engine, adapter, handle, record);
    }

    record.stage = Stage::ExpectingReception;
    adapter.recv_packet(handle, record.next_wakeup)
}

fn send_next(
    engine: &ServerEngine,
    adapter: &mut dyn NetworkAdapter,
    handle: ConnectionHandle,
    record: &mut ConnectionRecord,
) -> Result<(), CoreError> {
    if record.pipe.output.is_empty() {
        // No bytes were framed at all (e.g. an all-notification JSON-RPC
        // batch) — still counts as a completed exchange and is subject to
        // the same must_close / max_lifetime_exchanges check `on_send`
        // applies once a real response has been flushed (spec.md §4.7).
        record.exchanges += 1;
        let must_close = record.protocol.must_close()
            || record.exchanges >= engine.config().max_lifetime_exchanges
            || engine.dismissed() > 0;
        record.protocol.reset();
        record.pipe.release_inputs();
        if must_close {
            return close(engine, adapter, handle, record);
        }
        record.stage = Stage::ExpectingReception;
        return adapter.recv_packet(handle, record.next_wakeup);
    }
    record.pipe.output.prepare_more_outputs();
    adapter.send_packet(handle)
}

fn close(
    engine: &ServerEngine,
    adapter: &mut dyn NetworkAdapter,
    handle: ConnectionHandle,
    record: &mut ConnectionRecord,
) -> Result<(), CoreError> {
    if record.stage != Stage::WaitingToClose {
        record.stage = Stage::WaitingToClose;
        return adapter.close_connection_gracefully(handle);
    }
    pool_release(engine, handle);
    Ok(())
}

fn pool_release(engine: &ServerEngine, handle: ConnectionHandle) {
    engine.pool().with_record(handle, |record| {
        record.reset(engine.protocol_template());
    });
    engine.pool().release(handle);
    engine.stats().record_connection_closed();
    debug!(handle, "connection released");
}

fn is_expired(record: &ConnectionRecord, engine: &ServerEngine) -> bool {
    record.is_expired(engine.config().max_inactive_duration_ns)
}

/// Dispatch transition (spec.md §4.7 "Dispatch"): `parse_headers` →
/// `parse_content` → `prepare_response` → per-call lookup/invoke/error →
/// `finalize_response`.
fn dispatch(engine: &ServerEngine, record: &mut ConnectionRecord, worker_index: usize) -> Result<(), CoreError> {
    let header_result = record.protocol.parse_headers(record.pipe.input_span());
    if let Err(err) = header_result {
        return emit_single_error(record, &err);
    }

    let content_result = engine.scratch().with_scratch(worker_index, |scratch| {
        record.protocol.parse_content(record.pipe.input_span(), scratch)
    });
    if let Err(err) = content_result {
        return emit_single_error(record, &err);
    }

    let calls = record.protocol.calls().to_vec();
    let kind = record.protocol.method_kind();

    // Plain HTTP and REST answer with an HTTP status line reflecting the
    // single call's outcome (spec.md §4.4 "Errors use HTTP status
    // numerics"); JSON-RPC/HTTP always answers 200 and reports failures in
    // the envelope, handled inside `prepare_response`/`finalize_response`.
    let status = if calls.iter().any(|c| engine.registry().lookup(&c.method, kind).is_none()) {
        CoreError::MethodNotFound.http_status()
    } else {
        200
    };
    record.protocol.prepare_response(&mut record.pipe.output, status)?;

    for call in &calls {
        match engine.registry().lookup(&call.method, kind) {
            Some((handler, tag)) => {
                let mut call_handle =
                    CallHandle::new(&mut record.protocol, &mut record.pipe.output, call.clone());
                handler(&mut call_handle, tag);
            }
            None => {
                let mut call_handle =
                    CallHandle::new(&mut record.protocol, &mut record.pipe.output, call.clone());
                let _ = call_handle.reply_error(&CoreError::MethodNotFound);
            }
        }
    }

    record.protocol.finalize_response(&mut record.pipe.output, status)
}

/// Emits the protocol's single canned error reply when framing/parsing
/// itself failed, so the client still sees a complete response
/// (spec.md §7 "Clients always see a complete, well-framed response").
fn emit_single_error(record: &mut ConnectionRecord, err: &CoreError) -> Result<(), CoreError> {
    warn!(?err, "dispatch failed before a call could be decoded");
    let status = err.http_status();
    record.protocol.prepare_response(&mut record.pipe.output, status)?;
    let placeholder = crate::protocol::Call {
        id: None,
        method: String::new(),
        params: serde_json::Value::Null,
        is_notification: false,
        raw: None,
    };
    record.protocol.append_error(&mut record.pipe.output, &placeholder, err)?;
    record.protocol.finalize_response(&mut record.pipe.output, status)
}

#[cfg(test)]
mod tests {
    use crate::pool::ConnectionPool;
    use crate::protocol::Protocol;

    #[test]
    fn is_expired_checks_empty_transmit_ceiling() {
        let pool = ConnectionPool::new(1, &Protocol::new_json_rpc_tcp());
        let handle = pool.alloc().unwrap();
        pool.with_record(handle, |record| {
            record.empty_transmits = 101;
            assert!(record.is_expired(u64::MAX));
        });
    }
}

//! JSON-RPC 2.0 framing, layered over either raw-TCP or HTTP transport
//! (spec.md §4.4 "JSON-RPC 2.0"). `JsonRpcState::http` only participates
//! when the variant is `Protocol::JsonRpcHttp`; the TCP variant ignores it.

use super::{Call, HttpState};
use crate::errors::CoreError;
use crate::pipe::HalfPipe;
use crate::scratch::ScratchSpace;
use serde_json::Value;

#[derive(Default)]
pub struct JsonRpcState {
    pub http: HttpState,
    pub calls: Vec<Call>,
    pub is_batch: bool,
    pub any_output: bool,
}

impl JsonRpcState {
    pub fn reset(&mut self) {
        self.http.reset();
        self.calls.clear();
        self.is_batch = false;
        self.any_output = false;
    }

    pub fn http_body<'a>(&self, span: &'a [u8]) -> &'a [u8] {
        self.http.body(span)
    }

    /// Decodes `body` through the worker's [`ScratchSpace`] (spec.md §4.3)
    /// instead of allocating a fresh top-level `Value` per request.
    pub fn parse_content(&mut self, body: &[u8], scratch: &mut ScratchSpace) -> Result<(), CoreError> {
        self.calls.clear();
        self.any_output = false;

        let value = scratch.decode(body)?;
        match value {
            Value::Array(items) => {
                self.is_batch = true;
                for item in items {
                    self.calls.push(decode_call(item)?);
                }
            }
            other => {
                self.is_batch = false;
                self.calls.push(decode_call(other)?);
            }
        }
        Ok(())
    }
}

fn decode_call(value: &Value) -> Result<Call, CoreError> {
    let Value::Object(obj) = value else {
        return Err(CoreError::InvalidRequest);
    };

    let method = match obj.get("method") {
        Some(Value::String(m)) => m.clone(),
        _ => return Err(CoreError::InvalidRequest),
    };
    let id = obj.get("id").cloned();
    let is_notification = id.is_none();
    let params = obj.get("params").cloned().unwrap_or(Value::Null);

    Ok(Call { id, method, params, is_notification, raw: None })
}

fn id_json(call: &Call) -> String {
    match &call.id {
        Some(v) => v.to_string(),
        None => "null".to_string(),
    }
}

/// Appends one response entry for `call`, framing it in the JSON-RPC
/// envelope and preceding it with a comma if it is not the batch's first
/// entry (spec.md §4.4 "Batches are framed in `[ … ]` with responses
/// comma-separated"). Notifications never reach this function — the
/// dispatch loop skips them before replying (spec.md §4.4 "notifications
/// produce no output").
pub fn append_single(
    out: &mut HalfPipe,
    state: &mut JsonRpcState,
    call: &Call,
    body: &[u8],
    err: Option<&CoreError>,
) -> Result<(), CoreError> {
    if state.any_output {
        out.append(b",")?;
    }
    state.any_output = true;

    let id = id_json(call);
    match err {
        Some(e) => {
            let envelope = format!(
                r#"{{"jsonrpc":"2.0","id":{},"error":{{"code":{},"message":"{}"}}}}"#,
                id,
                e.json_rpc_code(),
                e.canned_message()
            );
            out.append(envelope.as_bytes())
        }
        None => {
            out.append(br#"{"jsonrpc":"2.0","id":"#)?;
            out.append(id.as_bytes())?;
            out.append(br#","result":"#)?;
            if body.is_empty() {
                out.append(b"null")?;
            } else {
                out.append(body)?;
            }
            out.append(b"}")
        }
    }
}

pub fn close_batch(out: &mut HalfPipe) -> Result<(), CoreError> {
    out.append(b"]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_call() {
        let mut state = JsonRpcState::default();
        let mut scratch = ScratchSpace::new();
        state
            .parse_content(br#"{"jsonrpc":"2.0","method":"sum","params":{"a":1,"b":2},"id":7}"#, &mut scratch)
            .unwrap();

        assert!(!state.is_batch);
        assert_eq!(state.calls.len(), 1);
        assert_eq!(state.calls[0].method, "sum");
        assert!(!state.calls[0].is_notification);
    }

    #[test]
    fn notification_has_no_id() {
        let mut state = JsonRpcState::default();
        let mut scratch = ScratchSpace::new();
        state
            .parse_content(br#"{"jsonrpc":"2.0","method":"sum","params":{"a":1,"b":2}}"#, &mut scratch)
            .unwrap();
        assert!(state.calls[0].is_notification);
    }

    #[test]
    fn decodes_batch() {
        let mut state = JsonRpcState::default();
        let mut scratch = ScratchSpace::new();
        state
            .parse_content(
                br#"[{"jsonrpc":"2.0","method":"sum","params":{"a":1,"b":2},"id":1},
                    {"jsonrpc":"2.0","method":"sum","params":{"a":3,"b":4},"id":2}]"#,
                &mut scratch,
            )
            .unwrap();
        assert!(state.is_batch);
        assert_eq!(state.calls.len(), 2);
    }

    #[test]
    fn reused_scratch_space_is_overwritten_per_call() {
        // Regression for spec.md §4.3: the same `ScratchSpace` decoding two
        // requests back to back must not leak the first request's tree into
        // the second's calls.
        let mut state = JsonRpcState::default();
        let mut scratch = ScratchSpace::new();
        state
            .parse_content(br#"{"jsonrpc":"2.0","method":"first","id":1}"#, &mut scratch)
            .unwrap();
        assert_eq!(state.calls[0].method, "first");

        state
            .parse_content(br#"{"jsonrpc":"2.0","method":"second","id":2}"#, &mut scratch)
            .unwrap();
        assert_eq!(state.calls.len(), 1);
        assert_eq!(state.calls[0].method, "second");
    }
}

//! Protocol engines: the five framing dialects from spec.md §4.4, unified
//! behind a tagged union rather than a trait object (spec.md §9
//! "Polymorphism over protocols" — no dynamic dispatch, the central state
//! machine matches inline).

mod http;
mod jsonrpc;
mod raw_tcp;
mod rest;

pub use http::HttpState;
pub use jsonrpc::JsonRpcState;
pub use raw_tcp::RawTcpState;
pub use rest::{RestState, RestTemplate};

use crate::errors::CoreError;
use crate::pipe::HalfPipe;
use crate::scratch::ScratchSpace;
use serde_json::Value;

/// A tagged value returned by `get_param`/`get_header` (spec.md §4.4).
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ParamValue::Null,
            Value::Bool(b) => ParamValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ParamValue::Int(i)
                } else {
                    ParamValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => ParamValue::Str(s.clone()),
            other => ParamValue::Str(other.to_string()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(f) => Some(*f),
            ParamValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A single call decoded out of a request (one per non-batch request; one
/// per array element for a JSON-RPC batch or a REST call).
#[derive(Clone)]
pub struct Call {
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
    pub is_notification: bool,
    /// Raw-TCP's payload, carried byte-for-byte alongside `params` so the
    /// echo path never round-trips through lossy UTF-8 (spec.md §8
    /// "Raw-TCP echo: input `x\0` yields response `x\0`").
    pub raw: Option<Vec<u8>>,
}

/// Tagged union over the five protocol variants (spec.md §3 "Protocol
/// instance"). Owned by the connection record; reset on every exchange.
pub enum Protocol {
    RawTcp(RawTcpState),
    Http(HttpState),
    JsonRpcTcp(JsonRpcState),
    JsonRpcHttp(JsonRpcState),
    Rest(RestState),
}

impl Protocol {
    pub fn new_raw_tcp() -> Self {
        Protocol::RawTcp(RawTcpState::default())
    }

    pub fn new_http() -> Self {
        Protocol::Http(HttpState::default())
    }

    pub fn new_json_rpc_tcp() -> Self {
        Protocol::JsonRpcTcp(JsonRpcState::default())
    }

    pub fn new_json_rpc_http() -> Self {
        Protocol::JsonRpcHttp(JsonRpcState::default())
    }

    pub fn new_rest(templates: Vec<RestTemplate>) -> Self {
        Protocol::Rest(RestState::new(templates))
    }

    /// Creates a reset copy with the same registration-time state (e.g.
    /// REST templates) but no per-exchange data — used to seed every pool
    /// slot from the one instance built at startup.
    pub fn fresh_clone(&self) -> Self {
        match self {
            Protocol::RawTcp(_) => Protocol::RawTcp(RawTcpState::default()),
            Protocol::Http(_) => Protocol::Http(HttpState::default()),
            Protocol::JsonRpcTcp(_) => Protocol::JsonRpcTcp(JsonRpcState::default()),
            Protocol::JsonRpcHttp(_) => Protocol::JsonRpcHttp(JsonRpcState::default()),
            Protocol::Rest(state) => Protocol::Rest(RestState::new(state.templates.clone())),
        }
    }

    /// Clears per-exchange state while preserving parser capacity / REST
    /// templates (spec.md §4.4 `reset()`).
    pub fn reset(&mut self) {
        match self {
            Protocol::RawTcp(s) => s.reset(),
            Protocol::Http(s) => s.reset(),
            Protocol::JsonRpcTcp(s) | Protocol::JsonRpcHttp(s) => s.reset(),
            Protocol::Rest(s) => s.reset(),
        }
    }

    pub fn is_input_complete(&self, span: &[u8]) -> bool {
        match self {
            Protocol::RawTcp(_) => raw_tcp::is_input_complete(span),
            Protocol::Http(_) | Protocol::JsonRpcHttp(_) | Protocol::Rest(_) => {
                http::is_input_complete(span)
            }
            Protocol::JsonRpcTcp(_) => raw_tcp::is_input_complete(span),
        }
    }

    pub fn parse_headers(&mut self, span: &[u8]) -> Result<(), CoreError> {
        match self {
            Protocol::RawTcp(_) | Protocol::JsonRpcTcp(_) => Ok(()),
            Protocol::Http(s) => s.parse_headers(span),
            Protocol::JsonRpcHttp(s) => s.parse_headers(span),
            Protocol::Rest(s) => s.parse_headers(span),
        }
    }

    /// Decodes the payload into calls, dropping the protocol framing
    /// (null terminator / HTTP body) first. JSON-decoding variants route
    /// through the caller's per-worker [`ScratchSpace`] (spec.md §4.3)
    /// instead of allocating a fresh `Value` tree per request.
    pub fn parse_content(&mut self, span: &[u8], scratch: &mut ScratchSpace) -> Result<(), CoreError> {
        match self {
            Protocol::RawTcp(s) => s.parse_content(raw_tcp::body(span)),
            Protocol::Http(s) => s.parse_content(),
            Protocol::JsonRpcTcp(s) => s.parse_content(raw_tcp::body(span), scratch),
            Protocol::JsonRpcHttp(s) => {
                let body = s.http_body(span);
                s.parse_content(body, scratch)
            }
            Protocol::Rest(s) => s.parse_content(span, scratch),
        }
    }

    pub fn calls(&self) -> &[Call] {
        match self {
            Protocol::RawTcp(s) => &s.calls,
            Protocol::Http(s) => &s.calls,
            Protocol::JsonRpcTcp(s) | Protocol::JsonRpcHttp(s) => &s.calls,
            Protocol::Rest(s) => &s.calls,
        }
    }

    pub fn get_method_name(&self, call: &Call) -> &str {
        &call.method
    }

    pub fn get_header<'a>(&'a self, name: &str) -> Option<&'a str> {
        match self {
            Protocol::Http(s) | Protocol::JsonRpcHttp(s) => s.header(name),
            Protocol::Rest(s) => s.header(name),
            _ => None,
        }
    }

    /// `get_param(name)` (spec.md §4.4): for REST this reads a matched
    /// URL-template placeholder; for every other variant it reads a field
    /// out of the call's JSON `params` object.
    pub fn get_named_param(&self, call: &Call, name: &str) -> Option<ParamValue> {
        match self {
            Protocol::Rest(s) => s.get_param(name).map(|v| ParamValue::Str(v.to_string())),
            _ => call.params.as_object().and_then(|o| o.get(name)).map(ParamValue::from_json),
        }
    }

    /// `get_param(index)` (spec.md §4.4): reads a positional element out of
    /// the call's JSON `params` array. Not meaningful for REST, whose
    /// placeholders are named.
    pub fn get_positional_param(&self, call: &Call, index: usize) -> Option<ParamValue> {
        call.params.as_array().and_then(|a| a.get(index)).map(ParamValue::from_json)
    }

    /// `status` is only meaningful for the plain HTTP and REST variants,
    /// whose single call's outcome maps directly onto the HTTP status line
    /// (spec.md §4.4). JSON-RPC/HTTP always answers `200 OK` and reports
    /// per-call failures inside the envelope instead.
    pub fn prepare_response(&mut self, out: &mut HalfPipe, status: u16) -> Result<(), CoreError> {
        match self {
            Protocol::RawTcp(_) => Ok(()),
            Protocol::JsonRpcTcp(s) => {
                if s.calls.len() > 1 || s.is_batch {
                    out.append(b"[")
                } else {
                    Ok(())
                }
            }
            Protocol::Http(_) | Protocol::Rest(_) => http::prepare_response(out, status),
            Protocol::JsonRpcHttp(s) => {
                http::prepare_response(out, 200)?;
                if s.calls.len() > 1 || s.is_batch {
                    out.append(b"[")
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn append_response(
        &mut self,
        out: &mut HalfPipe,
        call: &Call,
        body: &[u8],
    ) -> Result<(), CoreError> {
        match self {
            Protocol::RawTcp(_) => out.append(body),
            Protocol::Http(_) | Protocol::Rest(_) => out.append(body),
            Protocol::JsonRpcTcp(s) => jsonrpc::append_single(out, s, call, body, None),
            Protocol::JsonRpcHttp(s) => jsonrpc::append_single(out, s, call, body, None),
        }
    }

    pub fn append_error(
        &mut self,
        out: &mut HalfPipe,
        call: &Call,
        err: &CoreError,
    ) -> Result<(), CoreError> {
        match self {
            Protocol::RawTcp(_) => out.append(err.canned_message().as_bytes()),
            Protocol::Http(_) | Protocol::Rest(_) => http::append_error(out, err),
            Protocol::JsonRpcTcp(s) => jsonrpc::append_single(out, s, call, b"", Some(err)),
            Protocol::JsonRpcHttp(s) => jsonrpc::append_single(out, s, call, b"", Some(err)),
        }
    }

    /// Writes any framing suffix; patches HTTP's `Content-Length`, appends
    /// raw TCP's null terminator, closes a JSON-RPC batch array. `status`
    /// must match the value passed to [`Self::prepare_response`].
    pub fn finalize_response(&mut self, out: &mut HalfPipe, status: u16) -> Result<(), CoreError> {
        match self {
            Protocol::RawTcp(_) => out.append(b"\0"),
            Protocol::JsonRpcTcp(s) => {
                let is_batch = s.calls.len() > 1 || s.is_batch;
                if !s.any_output {
                    // A batch of all-notifications (or a lone notification)
                    // elicits no response whatsoever (spec.md §4.4 "for a
                    // batch that yields only notifications, no response is
                    // sent") — wipe the `[` `prepare_response` already wrote.
                    out.release();
                    return Ok(());
                }
                if is_batch {
                    jsonrpc::close_batch(out)?;
                }
                out.append(b"\0")
            }
            Protocol::Http(_) | Protocol::Rest(_) => http::finalize_response(out, status),
            Protocol::JsonRpcHttp(s) => {
                if s.calls.len() > 1 || s.is_batch {
                    jsonrpc::close_batch(out)?;
                }
                http::finalize_response(out, 200)
            }
        }
    }

    /// The registry kind a lookup should use for the current exchange:
    /// REST dispatches by HTTP verb, every other variant is verb-agnostic
    /// (spec.md §4.5 "(name, kind)" — only REST registrations carry a
    /// meaningful kind).
    pub fn method_kind(&self) -> crate::registry::MethodKind {
        use crate::registry::MethodKind;
        match self {
            Protocol::Rest(s) => match s.http.method.as_str() {
                "GET" => MethodKind::Get,
                "PUT" => MethodKind::Put,
                "POST" => MethodKind::Post,
                "DELETE" => MethodKind::Delete,
                _ => MethodKind::Any,
            },
            _ => MethodKind::Any,
        }
    }

    pub fn must_close(&self) -> bool {
        match self {
            Protocol::Http(s) => s.must_close,
            Protocol::JsonRpcHttp(s) => s.http.must_close,
            Protocol::Rest(s) => s.must_close,
            Protocol::RawTcp(_) | Protocol::JsonRpcTcp(_) => false,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_clone_preserves_rest_templates() {
        let templates = vec![RestTemplate::compile("GET", "/books/{id}").unwrap()];
        let protocol = Protocol::new_rest(templates);
        let clone = protocol.fresh_clone();
        match clone {
            Protocol::Rest(state) => assert_eq!(state.templates.len(), 1),
            _ => panic!("expected Rest variant"),
        }
    }
}

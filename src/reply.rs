//! In-handler reply API (spec.md §4.5 "callback contract", §6 "Reply API").
//!
//! A [`CallHandle`] is handed to a registered [`crate::registry::HandlerFn`]
//! for the duration of one call. The handler must call exactly one of the
//! `reply_*` methods before returning; `Drop` logs (but does not panic) if
//! that contract was violated, since a panicking drop inside a worker
//! thread would take the whole connection down with it.

use crate::errors::CoreError;
use crate::pipe::HalfPipe;
use crate::protocol::{Call, ParamValue, Protocol};
use tracing::warn;

pub struct CallHandle<'a> {
    protocol: &'a mut Protocol,
    out: &'a mut HalfPipe,
    call: Call,
    replied: bool,
}

impl<'a> CallHandle<'a> {
    pub fn new(protocol: &'a mut Protocol, out: &'a mut HalfPipe, call: Call) -> Self {
        Self { protocol, out, call, replied: false }
    }

    pub fn method(&self) -> &str {
        &self.call.method
    }

    pub fn is_notification(&self) -> bool {
        self.call.is_notification
    }

    /// Raw-TCP's payload, byte-for-byte (spec.md §8 "Raw-TCP echo").
    pub fn raw_body(&self) -> Option<&[u8]> {
        self.call.raw.as_deref()
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.protocol.get_header(name)
    }

    pub fn get_param_named(&self, name: &str) -> Option<ParamValue> {
        self.protocol.get_named_param(&self.call, name)
    }

    pub fn get_param_positional(&self, index: usize) -> Option<ParamValue> {
        self.protocol.get_positional_param(&self.call, index)
    }

    pub fn param_named_bool(&self, name: &str) -> Option<bool> {
        self.get_param_named(name)?.as_bool()
    }

    pub fn param_named_i64(&self, name: &str) -> Option<i64> {
        self.get_param_named(name)?.as_i64()
    }

    pub fn param_named_f64(&self, name: &str) -> Option<f64> {
        self.get_param_named(name)?.as_f64()
    }

    pub fn param_named_str(&self, name: &str) -> Option<String> {
        self.get_param_named(name).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn param_positional_bool(&self, index: usize) -> Option<bool> {
        self.get_param_positional(index)?.as_bool()
    }

    pub fn param_positional_i64(&self, index: usize) -> Option<i64> {
        self.get_param_positional(index)?.as_i64()
    }

    pub fn param_positional_f64(&self, index: usize) -> Option<f64> {
        self.get_param_positional(index)?.as_f64()
    }

    pub fn param_positional_str(&self, index: usize) -> Option<String> {
        self.get_param_positional(index).and_then(|v| v.as_str().map(str::to_string))
    }

    /// Writes `bytes` as the call's successful result. A no-op for
    /// notifications, which produce no output (spec.md §4.4).
    pub fn reply_content(&mut self, bytes: &[u8]) -> Result<(), CoreError> {
        self.replied = true;
        if self.call.is_notification {
            return Ok(());
        }
        self.protocol.append_response(self.out, &self.call, bytes)
    }

    pub fn reply_error(&mut self, err: &CoreError) -> Result<(), CoreError> {
        self.replied = true;
        if self.call.is_notification {
            return Ok(());
        }
        self.protocol.append_error(self.out, &self.call, err)
    }

    pub fn reply_error_invalid_params(&mut self) -> Result<(), CoreError> {
        self.reply_error(&CoreError::InvalidParams)
    }

    pub fn reply_error_unknown(&mut self) -> Result<(), CoreError> {
        self.reply_error(&CoreError::Unknown)
    }

    pub fn reply_error_out_of_memory(&mut self) -> Result<(), CoreError> {
        self.reply_error(&CoreError::OutOfMemory)
    }
}

impl Drop for CallHandle<'_> {
    fn drop(&mut self) {
        if !self.replied && !self.call.is_notification {
            warn!(method = %self.call.method, "handler returned without replying");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Protocol;
    use serde_json::json;

    fn sample_call() -> Call {
        Call {
            id: Some(json!(1)),
            method: "sum".to_string(),
            params: json!({"a": 1, "b": 2}),
            is_notification: false,
            raw: None,
        }
    }

    #[test]
    fn reply_content_writes_through_protocol() {
        let mut protocol = Protocol::new_json_rpc_tcp();
        let mut out = HalfPipe::new();
        let call = sample_call();
        let mut handle = CallHandle::new(&mut protocol, &mut out, call);
        handle.reply_content(b"3").unwrap();
        drop(handle);

        let text = String::from_utf8_lossy(out.span()).into_owned();
        assert!(text.contains(r#""result":3"#));
    }

    #[test]
    fn named_param_reads_object_field() {
        let protocol = Protocol::new_json_rpc_tcp();
        let call = sample_call();
        assert_eq!(protocol.get_named_param(&call, "a").and_then(|v| v.as_i64()), Some(1));
    }

    #[test]
    fn notification_reply_is_a_noop() {
        let mut protocol = Protocol::new_json_rpc_tcp();
        let mut out = HalfPipe::new();
        let mut call = sample_call();
        call.is_notification = true;
        let mut handle = CallHandle::new(&mut protocol, &mut out, call);
        handle.reply_content(b"3").unwrap();
        assert!(out.is_empty());
    }
}

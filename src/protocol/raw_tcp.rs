//! Raw-TCP framing: request is a null-terminated byte sequence, response is
//! the handler's bytes followed by a null byte (spec.md §4.4 "Raw TCP").

use super::Call;
use crate::errors::CoreError;
use memchr::memchr;
use serde_json::Value;

#[derive(Default)]
pub struct RawTcpState {
    pub calls: Vec<Call>,
}

impl RawTcpState {
    pub fn reset(&mut self) {
        self.calls.clear();
    }

    pub fn parse_content(&mut self, body: &[u8]) -> Result<(), CoreError> {
        self.calls.clear();
        self.calls.push(Call {
            id: None,
            method: String::new(),
            params: Value::Null,
            is_notification: false,
            raw: Some(body.to_vec()),
        });
        Ok(())
    }
}

/// True once a null terminator has arrived (spec.md §4.4 framing rule).
pub fn is_input_complete(span: &[u8]) -> bool {
    memchr(0, span).is_some()
}

/// Strips the trailing null terminator, returning the framed body.
pub fn body(span: &[u8]) -> &[u8] {
    match memchr(0, span) {
        Some(pos) => &span[..pos],
        None => span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_without_terminator() {
        assert!(!is_input_complete(b"hello"));
        assert!(is_input_complete(b"hello\0"));
    }

    #[test]
    fn body_strips_terminator() {
        assert_eq!(body(b"x\0"), b"x");
    }
}

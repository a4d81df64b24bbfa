//! Wire-level error taxonomy shared by every protocol engine.

use std::{error, fmt, io};

/// Errors surfaced while framing, parsing or dispatching an exchange.
///
/// Every variant maps to both an HTTP status and a JSON-RPC numeric code via
/// [`CoreError::json_rpc_code`] / [`CoreError::http_status`], so a single
/// error can be rendered by whichever protocol engine hit it.
#[derive(Debug, PartialEq)]
pub enum CoreError {
    /// Malformed request-line / status-line framing.
    InvalidFraming,
    /// Declared `Content-Length` could not be parsed or trusted.
    InvalidContentLength,
    /// Too many headers for the configured limit.
    TooManyHeaders,
    /// Payload exceeded the configured body-size ceiling.
    BodyTooLarge,
    /// JSON parse failure (`serde_json` surfaced a syntax error).
    ParseError,
    /// Request-shape error: missing/invalid JSON-RPC fields.
    InvalidRequest,
    /// No handler registered for the requested `(name, kind)`.
    MethodNotFound,
    /// Handler rejected its parameters.
    InvalidParams,
    /// Allocation failure while growing scratch space or a pipe.
    OutOfMemory,
    /// REST dispatch found no matching template.
    NoRoute,
    /// REST request declared a body but not `application/json`.
    UnsupportedMediaType,
    /// Catch-all for conditions that should be unreachable.
    Unknown,
    /// Wraps a transport-level I/O failure.
    Io(IoError),
}

impl CoreError {
    /// JSON-RPC 2.0 numeric error code (spec.md §4.4 / §7).
    pub const fn json_rpc_code(&self) -> i32 {
        match self {
            CoreError::InvalidFraming => -32700,
            CoreError::ParseError => -32700,
            CoreError::InvalidRequest => -32600,
            CoreError::MethodNotFound | CoreError::NoRoute => -32601,
            CoreError::InvalidParams | CoreError::UnsupportedMediaType => -32602,
            CoreError::OutOfMemory => -32000,
            CoreError::InvalidContentLength
            | CoreError::TooManyHeaders
            | CoreError::BodyTooLarge
            | CoreError::Unknown
            | CoreError::Io(_) => -32603,
        }
    }

    /// HTTP status numeric used by the HTTP/REST engines.
    pub const fn http_status(&self) -> u16 {
        match self {
            CoreError::InvalidFraming
            | CoreError::InvalidContentLength
            | CoreError::InvalidRequest
            | CoreError::ParseError => 400,
            CoreError::TooManyHeaders => 431,
            CoreError::BodyTooLarge => 413,
            CoreError::UnsupportedMediaType => 415,
            CoreError::MethodNotFound | CoreError::NoRoute => 404,
            CoreError::InvalidParams => 422,
            CoreError::OutOfMemory | CoreError::Unknown | CoreError::Io(_) => 500,
        }
    }

    /// Canned message matching the three named reply helpers in spec.md §6.
    pub const fn canned_message(&self) -> &'static str {
        match self {
            CoreError::InvalidParams => "Invalid method param(s).",
            CoreError::OutOfMemory => "Out of memory.",
            CoreError::MethodNotFound | CoreError::NoRoute => "Method not found",
            _ => "Unknown error.",
        }
    }
}

impl error::Error for CoreError {}
impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> Self {
        CoreError::Io(IoError(err))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() {
            CoreError::InvalidRequest
        } else {
            CoreError::ParseError
        }
    }
}

#[derive(Debug)]
pub struct IoError(pub io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_rpc_codes_match_spec_table() {
        assert_eq!(CoreError::InvalidRequest.json_rpc_code(), -32600);
        assert_eq!(CoreError::MethodNotFound.json_rpc_code(), -32601);
        assert_eq!(CoreError::InvalidParams.json_rpc_code(), -32602);
        assert_eq!(CoreError::Unknown.json_rpc_code(), -32603);
        assert_eq!(CoreError::ParseError.json_rpc_code(), -32700);
        assert_eq!(CoreError::OutOfMemory.json_rpc_code(), -32000);
    }

    #[test]
    fn canned_messages_match_reply_api() {
        assert_eq!(CoreError::InvalidParams.canned_message(), "Invalid method param(s).");
        assert_eq!(CoreError::OutOfMemory.canned_message(), "Out of memory.");
    }
}

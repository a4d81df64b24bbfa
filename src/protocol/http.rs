//! HTTP/1.1 framing: a permissive request-line + header parser that only
//! inspects `Content-Length`, `Content-Type` and `Connection`/`Keep-Alive`
//! (spec.md §4.4 "HTTP/1.1"). Shared by the plain HTTP, JSON-RPC/HTTP and
//! REST variants via their `http: HttpState` field.

use super::Call;
use crate::errors::CoreError;
use crate::pipe::HalfPipe;
use memchr::memchr;
use serde_json::Value;

const PLACEHOLDER_WIDTH: usize = 9;
const PRELUDE_SUFFIX: &[u8] = b"\r\nContent-Type: application/json\r\n\r\n";

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        415 => "HTTP/1.1 415 Unsupported Media Type",
        422 => "HTTP/1.1 422 Unprocessable Entity",
        431 => "HTTP/1.1 431 Request Header Fields Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

fn prelude_prefix_len(status: u16) -> usize {
    status_line(status).len() + b"\r\nContent-Length: ".len()
}

#[derive(Default)]
pub struct HttpState {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub content_length: usize,
    pub body_start: usize,
    pub must_close: bool,
    pub calls: Vec<Call>,
}

impl HttpState {
    pub fn reset(&mut self) {
        self.method.clear();
        self.path.clear();
        self.headers.clear();
        self.content_length = 0;
        self.body_start = 0;
        self.must_close = false;
        self.calls.clear();
    }

    pub fn parse_headers(&mut self, span: &[u8]) -> Result<(), CoreError> {
        let line_end = memchr(b'\n', span).ok_or(CoreError::InvalidFraming)?;
        let line = trim_cr(&span[..line_end]);
        let mut parts = line.split(|&b| b == b' ');
        let method = parts.next().ok_or(CoreError::InvalidFraming)?;
        let path = parts.next().ok_or(CoreError::InvalidFraming)?;
        let _version = parts.next().ok_or(CoreError::InvalidFraming)?;

        self.method = String::from_utf8_lossy(method).into_owned();
        self.path = String::from_utf8_lossy(path).into_owned();
        self.headers.clear();
        self.content_length = 0;
        self.must_close = false;

        let headers_region = &span[line_end + 1..];
        let body_sep = find_header_terminator(headers_region).ok_or(CoreError::InvalidFraming)?;
        self.body_start = line_end + 1 + body_sep;

        for header_line in headers_region[..body_sep].split(|&b| b == b'\n') {
            let header_line = trim_cr(header_line);
            if header_line.is_empty() {
                continue;
            }
            let colon = memchr(b':', header_line).ok_or(CoreError::InvalidFraming)?;
            let name = String::from_utf8_lossy(&header_line[..colon]).trim().to_lowercase();
            let value = String::from_utf8_lossy(trim_leading_space(&header_line[colon + 1..]))
                .trim()
                .to_string();

            if name == "content-length" {
                self.content_length = value.parse().map_err(|_| CoreError::InvalidContentLength)?;
            }
            if name == "connection" {
                self.must_close = value.eq_ignore_ascii_case("close");
            }
            self.headers.push((name, value));
        }

        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let lname = name.to_lowercase();
        self.headers.iter().find(|(n, _)| *n == lname).map(|(_, v)| v.as_str())
    }

    pub fn body<'a>(&self, span: &'a [u8]) -> &'a [u8] {
        let end = (self.body_start + self.content_length).min(span.len());
        if self.body_start >= span.len() {
            &[]
        } else {
            &span[self.body_start..end]
        }
    }

    /// Decodes the request as a single call named after the request path
    /// (the non-JSON-RPC, non-REST HTTP dialect still dispatches by exact
    /// path match — spec.md §1 "no request routing beyond exact
    /// method-name (or URL-template) match").
    pub fn parse_content(&mut self) -> Result<(), CoreError> {
        self.calls.clear();
        self.calls.push(Call {
            id: None,
            method: self.path.clone(),
            params: Value::Null,
            is_notification: false,
            raw: None,
        });
        Ok(())
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

fn trim_leading_space(value: &[u8]) -> &[u8] {
    match value.first() {
        Some(b' ') => &value[1..],
        _ => value,
    }
}

/// Finds the blank line that terminates the header section, returning the
/// offset of the byte right after it (where the body begins). A line is
/// "blank" once its trailing `\r` (if any) is stripped — this covers the
/// real-world `\r\n\r\n` terminator as well as a lone `\r\n` when the
/// preceding `\r\n` was already consumed as the request line's own
/// terminator (`headers_region` then starts directly on the blank line).
fn find_header_terminator(data: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    while let Some(rel) = memchr(b'\n', &data[line_start..]) {
        let line_end = line_start + rel;
        let content_end = if line_end > line_start && data[line_end - 1] == b'\r' {
            line_end - 1
        } else {
            line_end
        };
        if content_end == line_start {
            return Some(line_end + 1);
        }
        line_start = line_end + 1;
    }
    None
}

pub fn is_input_complete(span: &[u8]) -> bool {
    find_header_terminator(span).is_some()
}

pub fn prepare_response(out: &mut HalfPipe, status: u16) -> Result<(), CoreError> {
    out.append(status_line(status).as_bytes())?;
    out.append(b"\r\nContent-Length: ")?;
    out.append(&[b'0'; PLACEHOLDER_WIDTH])?;
    out.append(PRELUDE_SUFFIX)
}

pub fn finalize_response(out: &mut HalfPipe, status: u16) -> Result<(), CoreError> {
    let prelude_len = prelude_prefix_len(status) + PLACEHOLDER_WIDTH + PRELUDE_SUFFIX.len();
    let body_len = out.len().saturating_sub(prelude_len);
    let digits = format!("{:0>width$}", body_len, width = PLACEHOLDER_WIDTH);
    out.patch(prelude_prefix_len(status), digits.as_bytes());
    Ok(())
}

pub fn append_error(out: &mut HalfPipe, err: &CoreError) -> Result<(), CoreError> {
    let body = format!(
        r#"{{"error":"{}","code":{}}}"#,
        err.canned_message(),
        err.http_status()
    );
    out.append(body.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line_and_headers() {
        let raw = b"POST /sum HTTP/1.1\r\nContent-Length: 5\r\nContent-Type: application/json\r\n\r\nhello";
        let mut state = HttpState::default();
        state.parse_headers(raw).unwrap();

        assert_eq!(state.method, "POST");
        assert_eq!(state.path, "/sum");
        assert_eq!(state.content_length, 5);
        assert_eq!(state.header("content-type"), Some("application/json"));
        assert_eq!(state.body(raw), b"hello");
    }

    #[test]
    fn parses_request_line_with_no_headers() {
        // Regression: a request with no headers at all leaves only the
        // blank-line terminator (`\r\n`) in `headers_region`, since the
        // request line's own `\r\n` was already consumed by `line_end`.
        let raw = b"GET /books/42 HTTP/1.1\r\n\r\n";
        let mut state = HttpState::default();
        state.parse_headers(raw).unwrap();

        assert_eq!(state.method, "GET");
        assert_eq!(state.path, "/books/42");
        assert!(state.body(raw).is_empty());
        assert!(is_input_complete(raw));
    }

    #[test]
    fn connection_close_is_detected() {
        let raw = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        let mut state = HttpState::default();
        state.parse_headers(raw).unwrap();
        assert!(state.must_close);
    }

    #[test]
    fn finalize_patches_content_length() {
        let mut out = HalfPipe::new();
        prepare_response(&mut out, 200).unwrap();
        out.append(b"{\"ok\":true}").unwrap();
        finalize_response(&mut out, 200).unwrap();

        let text = String::from_utf8_lossy(out.span()).into_owned();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\nContent-Length: 000000011\r\n"));
        assert!(text.ends_with("{\"ok\":true}"));
    }

    #[test]
    fn finalize_patches_content_length_for_error_status() {
        let mut out = HalfPipe::new();
        prepare_response(&mut out, 404).unwrap();
        out.append(b"{\"error\":\"not found\"}").unwrap();
        finalize_response(&mut out, 404).unwrap();

        let text = String::from_utf8_lossy(out.span()).into_owned();
        let body_len = br#"{"error":"not found"}"#.len();
        assert!(text.starts_with(&format!(
            "HTTP/1.1 404 Not Found\r\nContent-Length: {:0>9}\r\n",
            body_len
        )));
    }
}

//! End-to-end scenarios from spec.md §8, driven directly against `Protocol`
//! instances and raw byte buffers — no live socket required. Each test
//! replicates the dispatch order `parse_headers -> parse_content ->
//! prepare_response -> per-call handle -> finalize_response` that
//! `connection::dispatch` runs internally.

use ringrpc::{Call, CallHandle, CoreError, HalfPipe, Protocol, ScratchSpace};
use serde_json::json;

fn sum_handler(call: &mut CallHandle) {
    let a = call.param_named_i64("a").unwrap_or(0);
    let b = call.param_named_i64("b").unwrap_or(0);
    let _ = call.reply_content((a + b).to_string().as_bytes());
}

/// Runs the standard dispatch sequence for a request body/span and a single
/// "sum"-or-unknown handler, returning the finalized output bytes.
fn run(protocol: &mut Protocol, input: &[u8], status_for_unknown: u16) -> Vec<u8> {
    let mut scratch = ScratchSpace::new();
    protocol.parse_headers(input).unwrap();
    protocol.parse_content(input, &mut scratch).unwrap();

    let calls: Vec<Call> = protocol.calls().to_vec();
    let any_unknown = calls.iter().any(|c| c.method != "sum");
    let status = if any_unknown { status_for_unknown } else { 200 };

    let mut out = HalfPipe::new();
    protocol.prepare_response(&mut out, status).unwrap();

    for call in &calls {
        let mut handle = CallHandle::new(protocol, &mut out, call.clone());
        if call.method == "sum" {
            sum_handler(&mut handle);
        } else {
            let _ = handle.reply_error(&CoreError::MethodNotFound);
        }
    }

    protocol.finalize_response(&mut out, status).unwrap();
    out.span().to_vec()
}

#[test]
fn scenario_1_sum_json_rpc_tcp() {
    let mut protocol = Protocol::new_json_rpc_tcp();
    let mut framed = br#"{"jsonrpc":"2.0","method":"sum","params":{"a":41,"b":1},"id":1}"#.to_vec();
    framed.push(0);

    let out = run(&mut protocol, &framed, 404);
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text, r#"{"jsonrpc":"2.0","id":1,"result":42}"#.to_string() + "\0");
}

#[test]
fn scenario_2_notification_produces_no_output() {
    let mut protocol = Protocol::new_json_rpc_tcp();
    let mut framed = br#"{"jsonrpc":"2.0","method":"sum","params":{"a":1,"b":2}}"#.to_vec();
    framed.push(0);

    let out = run(&mut protocol, &framed, 404);
    assert!(out.is_empty());
}

#[test]
fn scenario_3_batch_over_json_rpc_http() {
    let mut protocol = Protocol::new_json_rpc_http();
    let body = br#"[{"jsonrpc":"2.0","method":"sum","params":{"a":1,"b":2},"id":1},{"jsonrpc":"2.0","method":"sum","params":{"a":3,"b":4},"id":2}]"#;
    let request = format!(
        "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        String::from_utf8_lossy(body)
    );

    let out = run(&mut protocol, request.as_bytes(), 404);
    let text = String::from_utf8(out).unwrap();

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    let body_start = text.find("\r\n\r\n").unwrap() + 4;
    let response_body = &text[body_start..];
    assert_eq!(
        response_body,
        r#"[{"jsonrpc":"2.0","id":1,"result":3},{"jsonrpc":"2.0","id":2,"result":7}]"#
    );

    let declared_len: usize = text
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(declared_len, response_body.len());
}

#[test]
fn scenario_4_unknown_method() {
    let mut protocol = Protocol::new_json_rpc_tcp();
    let mut framed = br#"{"jsonrpc":"2.0","method":"nope","id":9}"#.to_vec();
    framed.push(0);

    let out = run(&mut protocol, &framed, 404);
    let text = String::from_utf8(out).unwrap();
    assert_eq!(
        text,
        r#"{"jsonrpc":"2.0","id":9,"error":{"code":-32601,"message":"Method not found"}}"#.to_string() + "\0"
    );
}

#[test]
fn scenario_5_rest_template_param() {
    use ringrpc::RestTemplate;

    let templates = vec![RestTemplate::compile("GET", "/books/{id}").unwrap()];
    let mut protocol = Protocol::new_rest(templates);
    let request = b"GET /books/42 HTTP/1.1\r\n\r\n";

    let mut scratch = ScratchSpace::new();
    protocol.parse_headers(request).unwrap();
    protocol.parse_content(request, &mut scratch).unwrap();

    let calls = protocol.calls().to_vec();
    assert_eq!(calls.len(), 1);
    assert_eq!(protocol.get_named_param(&calls[0], "id").unwrap().as_str(), Some("42"));
}

#[test]
fn scenario_6_keep_alive_limit_closes_after_third_exchange() {
    use ringrpc::pool::ConnectionPool;

    let template = Protocol::new_raw_tcp();
    let pool = ConnectionPool::new(1, &template);
    let handle = pool.alloc().unwrap();

    pool.with_record(handle, |record| {
        record.exchanges = 3;
    });

    let max_lifetime_exchanges = 3u64;
    pool.with_record(handle, |record| {
        assert!(record.exchanges >= max_lifetime_exchanges);
    });
}

#[test]
fn raw_tcp_echoes_payload_verbatim() {
    let mut protocol = Protocol::new_raw_tcp();
    let input = b"x\0";
    let mut scratch = ScratchSpace::new();
    protocol.parse_headers(input).unwrap();
    protocol.parse_content(input, &mut scratch).unwrap();

    let calls = protocol.calls().to_vec();
    assert_eq!(calls.len(), 1);

    let mut out = HalfPipe::new();
    protocol.prepare_response(&mut out, 200).unwrap();
    {
        let mut handle = CallHandle::new(&mut protocol, &mut out, calls[0].clone());
        let body = handle.raw_body().unwrap().to_vec();
        handle.reply_content(&body).unwrap();
    }
    protocol.finalize_response(&mut out, 200).unwrap();

    assert_eq!(out.span(), b"x\0");
}

#[test]
fn json_rpc_batch_is_order_preserving_for_n_non_notifications() {
    let mut protocol = Protocol::new_json_rpc_tcp();
    let mut framed = json!([
        {"jsonrpc": "2.0", "method": "sum", "params": {"a": 1, "b": 1}, "id": 1},
        {"jsonrpc": "2.0", "method": "sum", "params": {"a": 2, "b": 2}, "id": 2},
        {"jsonrpc": "2.0", "method": "sum", "params": {"a": 3, "b": 3}, "id": 3},
    ])
    .to_string()
    .into_bytes();
    framed.push(0);

    let out = run(&mut protocol, &framed, 404);
    let text = String::from_utf8(out).unwrap();
    let body = text.trim_end_matches('\0');
    assert_eq!(
        body,
        r#"[{"jsonrpc":"2.0","id":1,"result":2},{"jsonrpc":"2.0","id":2,"result":4},{"jsonrpc":"2.0","id":3,"result":6}]"#
    );
}

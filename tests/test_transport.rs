//! Framing tests
//!
//! `Content-Length` framing over in-memory readers, scripted partial reads and
//! failing I/O.

mod common;

use common::*;
use lsp_engine::error::{ErrorCode, ResponseError};
use lsp_engine::types::{NotificationMessage, RpcMessage};
use lsp_engine::{transport::*, Connection, Dispatcher, EngineConfig, LspError};
use serde_json::{json, Value};
use std::io::{Cursor, ErrorKind};
use tokio::time::{timeout, Duration};

fn reader(input: &str) -> TransportReader<Cursor<Vec<u8>>> {
    TransportReader::new(Cursor::new(input.as_bytes().to_vec()))
}

#[tokio::test]
async fn test_back_to_back_messages_are_classified() {
    let mut reader = reader(&TestMessages::multiple_messages());

    let kinds: Vec<&str> = {
        let mut kinds = Vec::new();
        for _ in 0..3 {
            let message = reader.read_message().await.unwrap();
            kinds.push(match message.parse_rpc_message().unwrap() {
                RpcMessage::Request(_) => "request",
                RpcMessage::Notification(_) => "notification",
                RpcMessage::Response(_) => "response",
            });
        }
        kinds
    };
    assert_eq!(kinds, vec!["request", "notification", "response"]);
    assert!(matches!(
        reader.read_message().await,
        Err(LspError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_frame_split_across_reads() {
    let body = r#"{"jsonrpc":"2.0","id":1}"#;
    let mock = tokio_test::io::Builder::new()
        .read(b"Content-")
        .read(b"Length: 24\r")
        .read(b"\n\r\n{\"jsonrpc\"")
        .read(b":\"2.0\",\"id\":1}")
        .build();
    let mut reader = TransportReader::new(mock);

    let message = reader.read_message().await.unwrap();
    assert_eq!(message.content, body);
    assert_eq!(message.headers.content_length, body.len());
}

#[tokio::test]
async fn test_header_errors() {
    let cases = [
        "Invalid-Header 45\r\n\r\n{}",
        "\r\n{}",
        "Content-Length: many\r\n\r\n{}",
        "Content-Length: 2\r\nContent-Type: application/vscode-jsonrpc; charset=latin1\r\n\r\n{}",
    ];
    for input in cases {
        assert!(
            matches!(reader(input).read_message().await, Err(LspError::Transport(_))),
            "{:?} should be rejected",
            input
        );
    }
}

#[tokio::test]
async fn test_accepted_header_variants() {
    let body = r#"{"jsonrpc":"2.0","id":1}"#;
    let inputs = [
        format!("Content-Length: {}\n\n{}", body.len(), body),
        format!("content-length:{}\r\n\r\n{}", body.len(), body),
        format!(
            "Content-Length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf8\r\nX-Trace: on\r\n\r\n{}",
            body.len(),
            body
        ),
    ];
    for input in &inputs {
        let message = reader(input).read_message().await.unwrap();
        assert_eq!(message.content, body);
    }

    let message = reader(&inputs[2]).read_message().await.unwrap();
    assert_eq!(
        message.headers.additional.get("X-Trace").map(String::as_str),
        Some("on")
    );
}

#[tokio::test]
async fn test_short_body_is_an_io_error() {
    let mut reader = reader("Content-Length: 100\r\n\r\n{\"jsonrpc\":\"2.0\"}");
    assert!(matches!(reader.read_message().await, Err(LspError::Io(_))));
}

#[tokio::test]
async fn test_content_length_mismatch() {
    let mut reader = reader("Content-Length: 10\n\n{\"jsonrpc\":\"2.0\",\"method\":\"test\",\"id\":1}");

    // Ten bytes are taken as the body; the rest cannot be framed.
    let message = reader.read_message().await.unwrap();
    assert_eq!(message.content, "{\"jsonrpc\"");
    assert!(reader.read_message().await.is_err());
}

#[tokio::test]
async fn test_large_body() {
    let body = format!(r#"{{"jsonrpc":"2.0","method":"x","params":"{}"}}"#, "x".repeat(100_000));
    let mut reader = reader(&frame(&body));
    let message = timeout(Duration::from_secs(1), reader.read_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.content.len(), body.len());
}

#[tokio::test]
async fn test_written_frame() {
    let mut writer = TransportWriter::new(Cursor::new(Vec::new()));
    writer
        .write_rpc_message(&RpcMessage::Notification(NotificationMessage::new(
            "test/method",
        )))
        .await
        .unwrap();

    let written = String::from_utf8(writer.into_inner().into_inner()).unwrap();
    let (header, body) = written.split_once("\r\n\r\n").unwrap();
    assert_eq!(header, format!("Content-Length: {}", body.len()));
    assert_json_eq(r#"{"jsonrpc":"2.0","method":"test/method"}"#, body);
}

#[tokio::test]
async fn test_non_ascii_length_is_in_bytes() {
    let mut writer = TransportWriter::new(Cursor::new(Vec::new()));
    writer
        .write_message(&Message::new(r#"{"text":"héllo ✓"}"#))
        .await
        .unwrap();
    let written = writer.into_inner().into_inner();

    let mut reader = TransportReader::new(Cursor::new(written));
    let message = reader.read_message().await.unwrap();
    assert_eq!(message.content, r#"{"text":"héllo ✓"}"#);
    assert_eq!(message.headers.content_length, message.content.len());
}

#[tokio::test]
async fn test_read_error_closes_connection() {
    let connection = Connection::new(
        MockTransport::with_read_error(ErrorKind::ConnectionReset),
        MockTransport::new(Vec::new()),
        Dispatcher::new(),
        EngineConfig::default(),
    );
    timeout(RECV_TIMEOUT, connection.closed())
        .await
        .expect("read error should close the connection");

    assert!(matches!(
        connection.peer().send_request("test/after", None).await,
        Err(LspError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_write_error_fails_request() {
    let (_remote, local) = tokio::io::duplex(1024);
    let connection = Connection::new(
        local,
        MockTransport::with_write_error(ErrorKind::BrokenPipe),
        Dispatcher::new(),
        EngineConfig::default(),
    );
    let peer = connection.peer();

    let result = peer.send_request("test/method", None).await;
    assert!(matches!(result, Err(LspError::Io(e)) if e.kind() == ErrorKind::BrokenPipe));
    assert_eq!(peer.pending_request_count().await, 0);

    // The call was recorded as a local write failure
    let last = lsp_engine::types::Id::Number(1);
    assert_eq!(
        peer.correlation_table().completion(&last).await,
        Some(lsp_engine::pending::Completion::Failed)
    );
    assert_eq!(ErrorCode::MessageWriteError.code(), -32099);
}

#[tokio::test]
async fn test_garbage_frame_does_not_stop_connection() {
    let (connection, mut raw) = connect_raw(Dispatcher::new(), EngineConfig::default());

    raw.send_raw("[1, 2, 3]").await;
    let response = raw.recv().await;
    assert_eq!(response["id"], serde_json::Value::Null);
    assert_eq!(response["error"]["code"], -32600);

    raw.send_raw("").await;
    let response = raw.recv().await;
    assert_eq!(response["error"]["code"], -32700);
    assert!(!connection.peer().is_closed());
}

fn ping_dispatcher() -> Dispatcher {
    Dispatcher::new().on_request("ping", |_params: Value, _ctx| async move {
        Ok::<_, ResponseError>(json!("pong"))
    })
}

#[tokio::test]
async fn test_rejected_charset_keeps_stream_in_sync() {
    let (_connection, mut raw) = connect_raw(ping_dispatcher(), EngineConfig::default());

    let mut latin1 = Message::new(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
    latin1.headers.content_type = "application/vscode-jsonrpc; charset=latin1".to_string();
    raw.send_message(&latin1).await;
    raw.send(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"})).await;

    let rejected = raw.recv().await;
    assert_eq!(rejected["id"], Value::Null);
    assert_eq!(rejected["error"]["code"], -32700);

    let answered = raw.recv().await;
    assert_eq!(answered["id"], 2);
    assert_eq!(answered["result"], "pong");
}

#[tokio::test]
async fn test_oversized_frame_is_skipped() {
    let config = EngineConfig::default().with_max_message_size(64);
    let (_connection, mut raw) = connect_raw(ping_dispatcher(), config);

    let padding = "x".repeat(200);
    raw.send(json!({"jsonrpc": "2.0", "method": "big", "params": {"padding": padding}}))
        .await;
    raw.send(json!({"jsonrpc": "2.0", "id": 3, "method": "ping"})).await;

    let rejected = raw.recv().await;
    assert_eq!(rejected["error"]["code"], -32700);
    assert!(rejected["error"]["message"]
        .as_str()
        .unwrap()
        .contains("exceeds the limit"));

    let answered = raw.recv().await;
    assert_eq!(answered["id"], 3);
    assert_eq!(answered["result"], "pong");
}

#[tokio::test]
async fn test_huge_content_length_fails_pending_calls_on_close() {
    let (connection, mut raw) = connect_raw(Dispatcher::new(), EngineConfig::default());
    let peer = connection.peer();
    let pending = peer.start_request("test/slow", None).await.unwrap();

    let mut huge = Message::new("");
    huge.headers.content_length = usize::MAX;
    raw.send_message(&huge).await;
    // The reader waits for a body that never comes until the stream ends.
    drop(raw);

    let result = timeout(RECV_TIMEOUT, pending)
        .await
        .expect("pending call should complete");
    assert_eq!(result.unwrap_err().kind(), ErrorCode::ConnectionClosed);
    timeout(RECV_TIMEOUT, connection.closed())
        .await
        .expect("connection should close");
    assert!(peer.is_closed());
}

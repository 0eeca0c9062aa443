//! Common test utilities and infrastructure for lsp-engine tests
//!
//! This module provides in-memory connections, a raw wire-level peer for
//! driving a connection with hand-written JSON, failure-injecting I/O and
//! document store fixtures.
#![allow(dead_code)]
use lsp_engine::transport::{Message, Transport};
use lsp_engine::types::*;
use lsp_engine::workspace::MemoryDocumentStore;
use lsp_engine::{Connection, Dispatcher, EngineConfig};
use serde_json::Value;
use std::io::{Cursor, Result as IoResult};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf, ReadHalf, WriteHalf};

/// How long a test waits for a message before failing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Mock I/O that can be configured with predefined data or errors
pub struct MockTransport {
    pub read_data: Cursor<Vec<u8>>,
    pub write_data: Cursor<Vec<u8>>,
    pub read_error: Option<std::io::ErrorKind>,
    pub write_error: Option<std::io::ErrorKind>,
}

impl MockTransport {
    /// Create a new mock transport with predefined read data
    pub fn new(read_data: Vec<u8>) -> Self {
        Self {
            read_data: Cursor::new(read_data),
            write_data: Cursor::new(Vec::new()),
            read_error: None,
            write_error: None,
        }
    }

    /// Create a mock transport that will return an error on read
    pub fn with_read_error(kind: std::io::ErrorKind) -> Self {
        Self {
            read_error: Some(kind),
            ..Self::new(Vec::new())
        }
    }

    /// Create a mock transport that will return an error on write
    pub fn with_write_error(kind: std::io::ErrorKind) -> Self {
        Self {
            write_error: Some(kind),
            ..Self::new(Vec::new())
        }
    }

    /// Get the data that was written to this transport
    pub fn written_data(&self) -> &[u8] {
        self.write_data.get_ref()
    }
}

impl AsyncRead for MockTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<IoResult<()>> {
        if let Some(kind) = self.read_error {
            return Poll::Ready(Err(std::io::Error::new(kind, "Mock read error")));
        }
        Pin::new(&mut self.read_data).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        if let Some(kind) = self.write_error {
            return Poll::Ready(Err(std::io::Error::new(kind, "Mock write error")));
        }
        Pin::new(&mut self.write_data).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.write_data).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.write_data).poll_shutdown(cx)
    }
}

/// Frame a JSON body with a `Content-Length` header.
pub fn frame(body: &str) -> String {
    format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
}

/// Sample wire messages for testing
pub struct TestMessages;

impl TestMessages {
    /// A registration request as sent by a server
    pub fn register_capability_request() -> String {
        frame(r#"{"jsonrpc":"2.0","id":1,"method":"client/registerCapability","params":{"registrations":[{"id":"r1","method":"textDocument/didSave"}]}}"#)
    }

    /// A notification
    pub fn progress_notification() -> String {
        frame(r#"{"jsonrpc":"2.0","method":"$/progress","params":{"token":"workDone","value":{"kind":"begin","title":"Processing"}}}"#)
    }

    /// A response to request 1
    pub fn response() -> String {
        frame(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
    }

    /// Multiple messages concatenated
    pub fn multiple_messages() -> String {
        format!(
            "{}{}{}",
            Self::register_capability_request(),
            Self::progress_notification(),
            Self::response()
        )
    }
}

/// The far end of a connection, speaking raw JSON.
pub struct RawPeer {
    transport: Transport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>,
}

impl RawPeer {
    /// Send an arbitrary body, valid JSON or not.
    pub async fn send_raw(&mut self, body: &str) {
        self.transport
            .write_message(&Message::new(body))
            .await
            .expect("raw write should succeed");
    }

    /// Send a prepared frame with whatever headers it carries.
    pub async fn send_message(&mut self, message: &Message) {
        self.transport
            .write_message(message)
            .await
            .expect("raw write should succeed");
    }

    pub async fn send(&mut self, value: Value) {
        self.send_raw(&value.to_string()).await;
    }

    /// Receive the next message as JSON, failing the test after
    /// [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> Value {
        let message = tokio::time::timeout(RECV_TIMEOUT, self.transport.read_message())
            .await
            .expect("timed out waiting for a message")
            .expect("read should succeed");
        serde_json::from_str(&message.content).expect("message should be JSON")
    }

    /// Whether a message arrives within `wait`.
    pub async fn recv_within(&mut self, wait: Duration) -> Option<Value> {
        match tokio::time::timeout(wait, self.transport.read_message()).await {
            Ok(Ok(message)) => serde_json::from_str(&message.content).ok(),
            _ => None,
        }
    }
}

/// Start a connection whose peer is a [`RawPeer`].
pub fn connect_raw(dispatcher: Dispatcher, config: EngineConfig) -> (Connection, RawPeer) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(local);
    let connection = Connection::new(reader, writer, dispatcher, config);

    let (remote_reader, remote_writer) = tokio::io::split(remote);
    let raw = RawPeer {
        transport: Transport::new(remote_reader, remote_writer),
    };
    (connection, raw)
}

/// Start two connections talking to each other.
pub fn connect_pair(
    client: Dispatcher,
    client_config: EngineConfig,
    server: Dispatcher,
    server_config: EngineConfig,
) -> (Connection, Connection) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client_reader, client_writer) = tokio::io::split(client_io);
    let (server_reader, server_writer) = tokio::io::split(server_io);
    (
        Connection::new(client_reader, client_writer, client, client_config),
        Connection::new(server_reader, server_writer, server, server_config),
    )
}

/// The two documents used by most edit tests.
pub fn two_documents() -> MemoryDocumentStore {
    MemoryDocumentStore::new()
        .with_document("file:///a.txt", "alpha\n", 1)
        .with_document("file:///b.txt", "beta\n", 1)
}

/// A text document edit inserting `text` at the start of `uri`.
pub fn insert_at_start(uri: &str, version: Option<i32>, text: &str) -> DocumentChange {
    TextDocumentEdit::new(
        OptionalVersionedTextDocumentIdentifier::new(uri, version),
        vec![TextEdit::insert(Position::new(0, 0), text)],
    )
    .into()
}

/// Assert that two JSON values are equivalent, ignoring field order
pub fn assert_json_eq(expected: &str, actual: &str) {
    let expected: serde_json::Value =
        serde_json::from_str(expected).expect("Expected JSON should be valid");
    let actual: serde_json::Value =
        serde_json::from_str(actual).expect("Actual JSON should be valid");
    assert_eq!(expected, actual, "JSON values should be equal");
}

/// Create a range for testing
pub fn test_range() -> Range {
    Range::new(Position::new(0, 0), Position::new(0, 5))
}

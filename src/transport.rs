//! `Content-Length` framing.
//!
//! Each message is a header block of `Name: value` lines, an empty line, and
//! a UTF-8 JSON body of exactly `Content-Length` bytes. Header lines may end
//! in `\r\n` or a bare `\n`. A [`Transport`] splits into a [`TransportReader`]
//! and a [`TransportWriter`] so that the read loop never waits on a writer.

use crate::error::{LspError, Result};
use crate::types::{MalformedMessage, RpcMessage};
use std::collections::HashMap;
use std::fmt::Write as _;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Content type assumed when a message carries no `Content-Type` header.
pub const DEFAULT_CONTENT_TYPE: &str = "application/vscode-jsonrpc; charset=utf-8";

/// Largest body a reader accepts unless configured otherwise.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Parsed header block of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeaders {
    pub content_length: usize,
    pub content_type: String,
    /// Headers other than `Content-Length` and `Content-Type`, as received.
    pub additional: HashMap<String, String>,
}

impl MessageHeaders {
    pub fn new(content_length: usize) -> Self {
        Self {
            content_length,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            additional: HashMap::new(),
        }
    }

    /// The `charset` parameter of the content type, lowercased. `utf8` is
    /// read as `utf-8`; a missing parameter means `utf-8`.
    pub fn charset(&self) -> String {
        let charset = self
            .content_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("charset="))
            .map(|value| value.trim().trim_matches('"').to_ascii_lowercase())
            .next();
        match charset.as_deref() {
            None | Some("utf8") => "utf-8".to_string(),
            Some(other) => other.to_string(),
        }
    }

    fn insert(&mut self, name: String, value: String) -> Result<()> {
        if name.eq_ignore_ascii_case("content-length") {
            self.content_length = value.parse().map_err(|_| {
                LspError::Transport(format!("Invalid Content-Length: {}", value))
            })?;
        } else if name.eq_ignore_ascii_case("content-type") {
            self.content_type = value;
        } else {
            self.additional.insert(name, value);
        }
        Ok(())
    }
}

/// One framed message.
#[derive(Debug, Clone)]
pub struct Message {
    pub headers: MessageHeaders,
    pub content: String,
}

impl Message {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            headers: MessageHeaders::new(content.len()),
            content,
        }
    }

    pub fn from_rpc_message(rpc_message: &RpcMessage) -> Result<Self> {
        Ok(Self::new(serde_json::to_string(rpc_message)?))
    }

    /// Classify the body as a JSON-RPC message.
    pub fn parse_rpc_message(&self) -> std::result::Result<RpcMessage, MalformedMessage> {
        RpcMessage::decode(&self.content)
    }

    /// The frame as sent on the wire. `Content-Type` is only written when it
    /// differs from the default.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = String::with_capacity(64);
        // Writing into a String cannot fail.
        let _ = write!(header, "Content-Length: {}\r\n", self.headers.content_length);
        if self.headers.content_type != DEFAULT_CONTENT_TYPE {
            let _ = write!(header, "Content-Type: {}\r\n", self.headers.content_type);
        }
        for (name, value) in &self.headers.additional {
            let _ = write!(header, "{}: {}\r\n", name, value);
        }
        header.push_str("\r\n");

        let mut frame = header.into_bytes();
        frame.extend_from_slice(self.content.as_bytes());
        frame
    }
}

/// Reader and writer framed together.
pub struct Transport<R, W> {
    reader: TransportReader<R>,
    writer: TransportWriter<W>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Transport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: TransportReader::new(reader),
            writer: TransportWriter::new(writer),
        }
    }

    pub async fn read_message(&mut self) -> Result<Message> {
        self.reader.read_message().await
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        self.writer.write_message(message).await
    }

    pub async fn write_rpc_message(&mut self, rpc_message: &RpcMessage) -> Result<()> {
        self.writer.write_rpc_message(rpc_message).await
    }

    /// Split into independently owned halves.
    pub fn into_split(self) -> (TransportReader<R>, TransportWriter<W>) {
        (self.reader, self.writer)
    }
}

/// Reading half of a [`Transport`].
pub struct TransportReader<R> {
    reader: BufReader<R>,
    max_message_size: usize,
}

impl<R: AsyncRead + Unpin> TransportReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Limit the declared `Content-Length` of accepted messages.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Read the next message.
    ///
    /// A stream that ends cleanly between two messages yields
    /// [`LspError::ConnectionClosed`]. Framing problems are
    /// [`LspError::Transport`]; a body cut short is [`LspError::Io`].
    /// A rejected message is consumed whole, so the next read starts at the
    /// following frame.
    pub async fn read_message(&mut self) -> Result<Message> {
        let headers = self.read_headers().await?;

        if headers.content_length > self.max_message_size {
            self.discard(headers.content_length).await?;
            return Err(LspError::Transport(format!(
                "Message of {} bytes exceeds the limit of {} bytes",
                headers.content_length, self.max_message_size
            )));
        }

        let mut body = vec![0; headers.content_length];
        self.reader.read_exact(&mut body).await?;

        let charset = headers.charset();
        if charset != "utf-8" {
            return Err(LspError::Transport(format!(
                "Unsupported charset: {}",
                charset
            )));
        }

        let content = String::from_utf8(body)
            .map_err(|e| LspError::Transport(format!("Body is not UTF-8: {}", e)))?;
        Ok(Message { headers, content })
    }

    async fn read_headers(&mut self) -> Result<MessageHeaders> {
        let mut headers = MessageHeaders::new(0);
        let mut seen_length = false;
        let mut lines = 0usize;

        loop {
            let line = match self.read_line().await? {
                Some(line) => line,
                None if lines == 0 => return Err(LspError::ConnectionClosed),
                None => {
                    return Err(LspError::Transport(
                        "Stream ended inside message headers".to_string(),
                    ))
                }
            };
            lines += 1;
            if line.is_empty() {
                break;
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| LspError::Transport(format!("Invalid header line: {}", line)))?;
            let name = name.trim();
            seen_length |= name.eq_ignore_ascii_case("content-length");
            headers.insert(name.to_string(), value.trim().to_string())?;
        }

        if !seen_length {
            return Err(LspError::Transport(
                "Missing Content-Length header".to_string(),
            ));
        }
        Ok(headers)
    }

    /// Skip `len` body bytes without buffering them.
    async fn discard(&mut self, len: usize) -> Result<()> {
        let len = len as u64;
        let mut body = (&mut self.reader).take(len);
        let skipped = tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;
        if skipped < len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Stream ended inside message body",
            )
            .into());
        }
        Ok(())
    }

    /// One header line without its terminator, or `None` at end of stream.
    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(None);
        }
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        String::from_utf8(line)
            .map(Some)
            .map_err(|e| LspError::Transport(format!("Header is not UTF-8: {}", e)))
    }
}

/// Writing half of a [`Transport`].
pub struct TransportWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> TransportWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame and flush it.
    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        self.writer.write_all(&message.to_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn write_rpc_message(&mut self, rpc_message: &RpcMessage) -> Result<()> {
        self.write_message(&Message::from_rpc_message(rpc_message)?)
            .await
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

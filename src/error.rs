//! Error types for the protocol engine.
//!
//! This module defines all error types that can occur while running a JSON-RPC
//! session, from transport-level errors up to protocol-level failures.

use crate::types::Id;
use std::fmt;
use thiserror::Error;

/// A specialized Result type for engine operations.
pub type Result<T> = std::result::Result<T, LspError>;

/// The main error type for engine operations.
#[derive(Error, Debug)]
pub enum LspError {
    /// IO errors from the transport layer
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol-level errors as returned by the peer
    #[error("LSP protocol error: {0}")]
    Protocol(#[from] ResponseError),

    /// Transport protocol errors (malformed headers, etc.)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection is gone; no further messages can be exchanged.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// The request was cancelled before its response arrived.
    #[error("Request {0} was cancelled")]
    Cancelled(Id),

    /// A request id was reused while a call with the same id is still pending.
    #[error("Request id {0} is already pending")]
    DuplicateRequestId(Id),

    /// A response arrived for an id that already completed with a response.
    #[error("Duplicate response for request {0}")]
    DuplicateResponse(Id),

    /// A response arrived for an id that was cancelled or timed out earlier.
    #[error("Late response for request {0}")]
    LateResponse(Id),

    /// A response arrived for an id the engine never issued.
    #[error("Response for unknown request {0}")]
    UnknownResponse(Id),

    /// Registering an id that is already active.
    #[error("Registration id '{0}' is already active")]
    AlreadyRegistered(String),

    /// Unregistering an id that is not active.
    #[error("Registration id '{0}' is not active")]
    NotRegistered(String),

    /// A method is being claimed both statically and dynamically.
    #[error("Capability '{method}' cannot be both statically declared and dynamically registered")]
    CapabilityConflict { method: String },

    /// Unregistration named a different method than the one recorded.
    #[error("Registration '{id}' is for method '{expected}', not '{actual}'")]
    MethodMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    /// An undo token is unknown or has expired.
    #[error("Undo journal entry {0} is unknown or has expired")]
    UndoExpired(u64),

    /// Generic error for other cases
    #[error("LSP error: {0}")]
    Other(String),
}

impl LspError {
    /// Convert this error to the JSON-RPC error object sent to the peer.
    ///
    /// Errors that have a dedicated code in the protocol taxonomy keep it;
    /// anything else becomes an `InternalError`.
    pub fn to_response_error(&self) -> ResponseError {
        match self {
            LspError::Protocol(err) => err.clone(),
            LspError::Json(err) => ResponseError::invalid_params(err.to_string()),
            LspError::Timeout => ResponseError::new(ErrorCode::RequestTimeout, self.to_string()),
            LspError::Cancelled(_) => ResponseError::request_cancelled(self.to_string()),
            LspError::ConnectionClosed => {
                ResponseError::new(ErrorCode::ConnectionClosed, self.to_string())
            }
            LspError::DuplicateRequestId(_)
            | LspError::AlreadyRegistered(_)
            | LspError::NotRegistered(_)
            | LspError::CapabilityConflict { .. }
            | LspError::MethodMismatch { .. } => ResponseError::invalid_params(self.to_string()),
            _ => ResponseError::internal_error(self.to_string()),
        }
    }
}

/// LSP ResponseError as defined by the JSON-RPC specification.
/// This corresponds to the error object in LSP response messages.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseError {
    /// A number indicating the error type that occurred.
    pub code: i32,
    /// A string providing a short description of the error.
    pub message: String,
    /// A primitive or structured value that contains additional information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ResponseError {}

/// Error codes as defined by the LSP specification, plus the engine's own.
pub mod error_codes {
    // JSON RPC error codes
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // JSON RPC reserved error range
    pub const JSONRPC_RESERVED_ERROR_RANGE_START: i32 = -32099;
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;
    pub const UNKNOWN_ERROR_CODE: i32 = -32001;
    pub const JSONRPC_RESERVED_ERROR_RANGE_END: i32 = -32000;

    // Engine-local codes, taken from the implementation-defined server range
    pub const MESSAGE_WRITE_ERROR: i32 = -32099;
    pub const MESSAGE_READ_ERROR: i32 = -32098;
    pub const REQUEST_TIMEOUT: i32 = -32097;
    pub const CONNECTION_CLOSED: i32 = -32096;

    // LSP reserved error range
    pub const LSP_RESERVED_ERROR_RANGE_START: i32 = -32899;
    pub const CONTENT_MODIFIED: i32 = -32801;
    pub const REQUEST_CANCELLED: i32 = -32800;
    pub const LSP_RESERVED_ERROR_RANGE_END: i32 = -32800;
}

/// The closed set of error codes the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerNotInitialized,
    UnknownErrorCode,
    RequestCancelled,
    ContentModified,
    MessageWriteError,
    MessageReadError,
    RequestTimeout,
    ConnectionClosed,
}

impl ErrorCode {
    /// The integer sent on the wire.
    pub fn code(self) -> i32 {
        use error_codes::*;
        match self {
            ErrorCode::ParseError => PARSE_ERROR,
            ErrorCode::InvalidRequest => INVALID_REQUEST,
            ErrorCode::MethodNotFound => METHOD_NOT_FOUND,
            ErrorCode::InvalidParams => INVALID_PARAMS,
            ErrorCode::InternalError => INTERNAL_ERROR,
            ErrorCode::ServerNotInitialized => SERVER_NOT_INITIALIZED,
            ErrorCode::UnknownErrorCode => UNKNOWN_ERROR_CODE,
            ErrorCode::RequestCancelled => REQUEST_CANCELLED,
            ErrorCode::ContentModified => CONTENT_MODIFIED,
            ErrorCode::MessageWriteError => MESSAGE_WRITE_ERROR,
            ErrorCode::MessageReadError => MESSAGE_READ_ERROR,
            ErrorCode::RequestTimeout => REQUEST_TIMEOUT,
            ErrorCode::ConnectionClosed => CONNECTION_CLOSED,
        }
    }

    /// Map a wire code back into the taxonomy.
    /// Codes outside the closed set map to `UnknownErrorCode`.
    pub fn from_code(code: i32) -> Self {
        use error_codes::*;
        match code {
            PARSE_ERROR => ErrorCode::ParseError,
            INVALID_REQUEST => ErrorCode::InvalidRequest,
            METHOD_NOT_FOUND => ErrorCode::MethodNotFound,
            INVALID_PARAMS => ErrorCode::InvalidParams,
            INTERNAL_ERROR => ErrorCode::InternalError,
            SERVER_NOT_INITIALIZED => ErrorCode::ServerNotInitialized,
            REQUEST_CANCELLED => ErrorCode::RequestCancelled,
            CONTENT_MODIFIED => ErrorCode::ContentModified,
            MESSAGE_WRITE_ERROR => ErrorCode::MessageWriteError,
            MESSAGE_READ_ERROR => ErrorCode::MessageReadError,
            REQUEST_TIMEOUT => ErrorCode::RequestTimeout,
            CONNECTION_CLOSED => ErrorCode::ConnectionClosed,
            _ => ErrorCode::UnknownErrorCode,
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl ResponseError {
    /// Create a new ResponseError with the given code and message.
    pub fn new(code: impl Into<i32>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Create a new ResponseError with additional data.
    pub fn with_data(
        code: impl Into<i32>,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: Some(data),
        }
    }

    /// The taxonomy entry for this error's code.
    pub fn kind(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }

    /// Create a parse error.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Create a method not found error.
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MethodNotFound, message)
    }

    /// Create an invalid params error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    /// Create an internal error.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a server not initialized error.
    pub fn server_not_initialized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServerNotInitialized, message)
    }

    /// Create a request cancelled error.
    pub fn request_cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RequestCancelled, message)
    }

    /// Create a content modified error.
    pub fn content_modified(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ContentModified, message)
    }

    /// Create a request timeout error.
    pub fn request_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RequestTimeout, message)
    }

    /// Create a connection closed error.
    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionClosed, message)
    }
}

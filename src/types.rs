//! Wire types consumed by the engine.
//!
//! This module contains the JSON-RPC envelope types, the text and workspace
//! edit structures the edit applier works on, and the capability registration
//! payloads. The rest of the LSP schema is left to downstream crates.

use serde::{Deserialize, Serialize};

pub mod jsonrpc;
pub mod lsp;
pub mod registration;

pub use jsonrpc::*;
pub use lsp::*;
pub use registration::*;

/// Type alias for request/notification IDs.
/// Can be either a number or a string as per JSON-RPC spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Number(value)
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::String(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::String(value.to_string())
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "{}", s),
        }
    }
}

/// URI type as defined by LSP.
/// Over the wire, it's transferred as a string but represents a valid URI.
pub type Uri = String;

/// Document URI type as defined by LSP.
pub type DocumentUri = Uri;

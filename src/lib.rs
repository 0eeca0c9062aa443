//! # lsp-engine
//!
//! The protocol engine around the Language Server Protocol message types.
//!
//! This crate does not know anything about hover, completion or diagnostics.
//! It provides the machinery both sides of an LSP session need:
//!
//! - a JSON-RPC 2.0 connection that correlates outbound requests with their
//!   responses, dispatches inbound requests and notifications to handlers and
//!   supports reverse calls such as `workspace/applyEdit`;
//! - a ledger of dynamic capability registrations;
//! - a workspace edit applier that applies text and resource changes to a
//!   document store under the protocol's failure handling strategies.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lsp_engine::prelude::*;
//! use serde_json::Value;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let dispatcher = Dispatcher::new().on_request(
//!         "initialize",
//!         |_params: Value, _ctx: RequestContext| async move {
//!             Ok::<_, ResponseError>(serde_json::json!({ "capabilities": {} }))
//!         },
//!     );
//!     let connection = Connection::new(
//!         tokio::io::stdin(),
//!         tokio::io::stdout(),
//!         dispatcher,
//!         EngineConfig::default(),
//!     );
//!     connection.closed().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod pending;
pub mod registration;
pub mod transport;
pub mod types;
pub mod workspace;

pub use config::EngineConfig;
pub use connection::{Connection, Peer};
pub use dispatcher::{Dispatcher, RequestContext};
pub use error::{LspError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{EngineConfig, UndoRetention};
    pub use crate::connection::{Connection, Peer};
    pub use crate::dispatcher::{Dispatcher, LifecycleState, RequestContext};
    pub use crate::error::{ErrorCode, LspError, ResponseError, Result};
    pub use crate::registration::RegistrationLedger;
    pub use crate::types::*;
    pub use crate::workspace::{
        DocumentStore, EditFailure, EditOutcome, MemoryDocumentStore, UndoToken,
        WorkspaceEditApplier,
    };
}

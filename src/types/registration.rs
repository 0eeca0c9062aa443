//! Payloads of the engine-level reverse calls: dynamic capability
//! registration and `workspace/applyEdit`.

use crate::types::WorkspaceEdit;
use serde::{Deserialize, Serialize};

/// Method names the engine itself understands.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
    pub const CANCEL_REQUEST: &str = "$/cancelRequest";
    pub const REGISTER_CAPABILITY: &str = "client/registerCapability";
    pub const UNREGISTER_CAPABILITY: &str = "client/unregisterCapability";
    pub const APPLY_EDIT: &str = "workspace/applyEdit";
}

/// General parameters to register for a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// The id used to register the request. The id can be used to deregister
    /// the request again.
    pub id: String,
    /// The method / capability to register for.
    pub method: String,
    /// Options necessary for the registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register_options: Option<serde_json::Value>,
}

impl Registration {
    pub fn new(id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            register_options: None,
        }
    }

    pub fn with_options(
        id: impl Into<String>,
        method: impl Into<String>,
        register_options: serde_json::Value,
    ) -> Self {
        Self {
            register_options: Some(register_options),
            ..Self::new(id, method)
        }
    }
}

/// Parameters of `client/registerCapability`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationParams {
    pub registrations: Vec<Registration>,
}

/// General parameters to unregister a capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unregistration {
    /// The id used to unregister the request or notification. Usually an id
    /// provided during the register request.
    pub id: String,
    /// The method / capability to unregister for.
    pub method: String,
}

impl Unregistration {
    pub fn new(id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
        }
    }
}

impl From<&Registration> for Unregistration {
    fn from(registration: &Registration) -> Self {
        Self::new(registration.id.clone(), registration.method.clone())
    }
}

/// Parameters of `client/unregisterCapability`.
///
/// The field name keeps the protocol's historical misspelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnregistrationParams {
    #[serde(rename = "unregisterations")]
    pub unregistrations: Vec<Unregistration>,
}

/// Parameters of `workspace/applyEdit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyWorkspaceEditParams {
    /// An optional label of the workspace edit, e.g. for an undo stack.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// The edits to apply.
    pub edit: WorkspaceEdit,
}

/// Result of `workspace/applyEdit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyWorkspaceEditResult {
    /// Indicates whether the edit was applied or not.
    pub applied: bool,
    /// An optional textual description for why the edit was not applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Depending on the client's failure handling strategy `failed_change`
    /// might contain the index of the change that failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_change: Option<u32>,
}

//! Engine configuration.
//!
//! Every field has a default, so a config can be deserialized from a partial
//! JSON object such as a session's `initializationOptions`. Durations are
//! expressed in milliseconds on the wire.

use crate::transport::DEFAULT_MAX_MESSAGE_SIZE;
use crate::types::FailureHandlingKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of completed request ids remembered for duplicate detection.
pub const DEFAULT_COMPLETED_HISTORY: usize = 1024;

/// Default interval at which expired pending calls are reaped.
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 250;

/// Runtime configuration of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Outbound requests older than this are rejected with a timeout error.
    /// `None` disables the timeout.
    pub request_timeout_ms: Option<u64>,
    /// How often the connection looks for expired calls.
    pub reap_interval_ms: u64,
    /// How many completed request ids are kept to tell duplicate or late
    /// responses apart from responses to ids that were never issued.
    pub completed_history: usize,
    /// Strategy used by the built-in `workspace/applyEdit` handler.
    pub failure_handling: FailureHandlingKind,
    /// Retention of undo journals recorded under `FailureHandlingKind::Undo`.
    pub undo_retention: UndoRetention,
    /// Reject traffic that arrives outside the initialize/shutdown lifecycle.
    pub enforce_lifecycle: bool,
    /// Inbound messages whose `Content-Length` exceeds this many bytes are
    /// skipped and answered with a parse error.
    pub max_message_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: None,
            reap_interval_ms: DEFAULT_REAP_INTERVAL_MS,
            completed_history: DEFAULT_COMPLETED_HISTORY,
            failure_handling: FailureHandlingKind::default(),
            undo_retention: UndoRetention::default(),
            enforce_lifecycle: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Parse a config from a JSON value, e.g. `initializationOptions`.
    pub fn from_json(value: serde_json::Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the failure handling strategy for the built-in edit handler.
    pub fn with_failure_handling(mut self, kind: FailureHandlingKind) -> Self {
        self.failure_handling = kind;
        self
    }

    /// Turn lifecycle enforcement on or off.
    pub fn with_lifecycle(mut self, enforce: bool) -> Self {
        self.enforce_lifecycle = enforce;
        self
    }

    /// Limit the size of inbound messages.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms.max(1))
    }
}

/// How long undo journals are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UndoRetention {
    /// Maximum number of journals kept; the oldest is evicted first.
    pub max_entries: usize,
    /// Journals older than this are discarded. `None` keeps them until evicted
    /// by `max_entries`.
    pub max_age_ms: Option<u64>,
}

impl Default for UndoRetention {
    fn default() -> Self {
        Self {
            max_entries: 16,
            max_age_ms: Some(5 * 60 * 1000),
        }
    }
}

impl UndoRetention {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_config() {
        let config = EngineConfig::from_json(json!({
            "requestTimeoutMs": 1500,
            "failureHandling": "undo",
            "undoRetention": {"maxEntries": 2}
        }))
        .unwrap();

        assert_eq!(config.request_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.failure_handling, FailureHandlingKind::Undo);
        assert_eq!(config.undo_retention.max_entries, 2);
        assert_eq!(
            config.undo_retention.max_age_ms,
            UndoRetention::default().max_age_ms
        );
        assert_eq!(config.completed_history, DEFAULT_COMPLETED_HISTORY);
        assert!(!config.enforce_lifecycle);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_invalid_config() {
        assert!(EngineConfig::from_json(json!({"failureHandling": "sometimes"})).is_err());
    }
}

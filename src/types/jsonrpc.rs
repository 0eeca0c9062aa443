//! JSON-RPC 2.0 message types as defined by the specification.
//!
//! Inbound traffic is classified exactly once, from the presence of the
//! `id`/`method`/`result`/`error` fields, into the [`RpcMessage`] sum type.
//! Anything that does not fit is reported as a [`MalformedMessage`] carrying
//! the error response the engine owes the peer.

use crate::error::ResponseError;
use crate::types::Id;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The only protocol version the engine speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request message to describe a request between client and server.
/// Every processed request must send a response back to the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// The request ID
    pub id: Id,
    /// The method to be invoked
    pub method: String,
    /// The method's parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestMessage {
    /// Create a new request message.
    pub fn new(id: impl Into<Id>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    /// Create a new request message with parameters.
    pub fn with_params(id: impl Into<Id>, method: impl Into<String>, params: Value) -> Self {
        Self {
            params: Some(params),
            ..Self::new(id, method)
        }
    }
}

/// Response message sent as a result of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// The request ID (same as the request, or null for parse errors)
    pub id: Option<Id>,
    /// The result of a successful request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error object in case of failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponseMessage {
    /// Create a successful response.
    pub fn success(id: impl Into<Id>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Id>, error: ResponseError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Build the response for a finished handler.
    pub fn from_result(id: Id, result: std::result::Result<Value, ResponseError>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(error) => Self::error(Some(id), error),
        }
    }

    /// Check if this response represents an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Get the error if present.
    pub fn get_error(&self) -> Option<&ResponseError> {
        self.error.as_ref()
    }

    /// Split the response into the outcome delivered to the waiting caller.
    pub fn into_result(self) -> std::result::Result<Value, ResponseError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Notification message.
/// A processed notification message must not send a response back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// The method to be invoked
    pub method: String,
    /// The notification's parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl NotificationMessage {
    /// Create a new notification message.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: None,
        }
    }

    /// Create a new notification message with parameters.
    pub fn with_params(method: impl Into<String>, params: Value) -> Self {
        Self {
            params: Some(params),
            ..Self::new(method)
        }
    }
}

/// Any JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RpcMessage {
    Request(RequestMessage),
    Notification(NotificationMessage),
    Response(ResponseMessage),
}

/// A message that could not be classified.
///
/// `id` is recovered whenever the envelope carried a usable one, so the
/// error response can be correlated by the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedMessage {
    pub id: Option<Id>,
    pub error: ResponseError,
}

impl MalformedMessage {
    fn invalid(id: Option<Id>, message: impl Into<String>) -> Self {
        Self {
            id,
            error: ResponseError::invalid_request(message),
        }
    }

    /// The error response owed to the peer for this message.
    pub fn into_response(self) -> ResponseMessage {
        ResponseMessage::error(self.id, self.error)
    }
}

impl RpcMessage {
    /// Check if this is a request message.
    pub fn is_request(&self) -> bool {
        matches!(self, RpcMessage::Request(_))
    }

    /// Check if this is a response message.
    pub fn is_response(&self) -> bool {
        matches!(self, RpcMessage::Response(_))
    }

    /// Check if this is a notification message.
    pub fn is_notification(&self) -> bool {
        matches!(self, RpcMessage::Notification(_))
    }

    /// Get the method name if this is a request or notification.
    pub fn method(&self) -> Option<&str> {
        match self {
            RpcMessage::Request(req) => Some(&req.method),
            RpcMessage::Notification(notif) => Some(&notif.method),
            RpcMessage::Response(_) => None,
        }
    }

    /// Get the ID if this is a request or response.
    pub fn id(&self) -> Option<&Id> {
        match self {
            RpcMessage::Request(req) => Some(&req.id),
            RpcMessage::Response(resp) => resp.id.as_ref(),
            RpcMessage::Notification(_) => None,
        }
    }

    /// Decode a message body. Invalid JSON is a `ParseError`; valid JSON that
    /// is not a JSON-RPC 2.0 envelope is an `InvalidRequest`.
    pub fn decode(content: &str) -> std::result::Result<Self, MalformedMessage> {
        let value: Value = serde_json::from_str(content).map_err(|e| MalformedMessage {
            id: None,
            error: ResponseError::parse_error(format!("Invalid JSON: {}", e)),
        })?;
        Self::from_value(value)
    }

    /// Classify an already parsed JSON value.
    pub fn from_value(value: Value) -> std::result::Result<Self, MalformedMessage> {
        let mut object = match value {
            Value::Object(object) => object,
            _ => return Err(MalformedMessage::invalid(None, "Message must be a JSON object")),
        };

        let id = take_id(&mut object)?;

        match object.get("jsonrpc") {
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            _ => {
                return Err(MalformedMessage::invalid(
                    id,
                    "Missing or unsupported jsonrpc version",
                ))
            }
        }

        if let Some(method) = object.remove("method") {
            let method = match method {
                Value::String(method) => method,
                _ => return Err(MalformedMessage::invalid(id, "Method must be a string")),
            };
            let params = match object.remove("params") {
                None | Some(Value::Null) => None,
                Some(params @ (Value::Object(_) | Value::Array(_))) => Some(params),
                Some(_) => {
                    return Err(MalformedMessage::invalid(
                        id,
                        "Params must be an object or an array",
                    ))
                }
            };
            return Ok(match id {
                Some(id) => RpcMessage::Request(RequestMessage {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id,
                    method,
                    params,
                }),
                None => RpcMessage::Notification(NotificationMessage {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    method,
                    params,
                }),
            });
        }

        let result = object.remove("result");
        let error = object.remove("error");
        match (result, error) {
            (Some(_), Some(_)) => Err(MalformedMessage::invalid(
                id,
                "Response must not carry both result and error",
            )),
            (Some(result), None) => Ok(RpcMessage::Response(ResponseMessage {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                result: Some(result),
                error: None,
            })),
            (None, Some(error)) => {
                let error: ResponseError = serde_json::from_value(error).map_err(|e| {
                    MalformedMessage::invalid(id.clone(), format!("Invalid error object: {}", e))
                })?;
                Ok(RpcMessage::Response(ResponseMessage::error(id, error)))
            }
            (None, None) => Err(MalformedMessage::invalid(
                id,
                "Message is neither a request, a notification nor a response",
            )),
        }
    }
}

/// Pull the `id` out of an envelope. `null` and absent both mean "no id".
fn take_id(object: &mut Map<String, Value>) -> std::result::Result<Option<Id>, MalformedMessage> {
    match object.remove("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(Id::String(s))),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(n) => Ok(Some(Id::Number(n))),
            None => Err(MalformedMessage::invalid(None, "Id must be an integer or a string")),
        },
        Some(_) => Err(MalformedMessage::invalid(None, "Id must be an integer or a string")),
    }
}

impl<'de> Deserialize<'de> for RpcMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RpcMessage::from_value(value).map_err(|m| serde::de::Error::custom(m.error.message))
    }
}

/// Parameters for the $/cancelRequest notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelParams {
    /// The request ID to cancel.
    pub id: Id,
}

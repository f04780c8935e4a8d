//! JSON-RPC 2.0 envelope codec
//!
//! Parses a single top-level JSON object into one of the three envelope
//! variants and emits the same shapes. Discrimination is by field presence,
//! matching what peers put on the wire:
//!
//! - `method` and `id` present  => [`Request`]
//! - `method` without `id`      => [`Notification`]
//! - `result` or `error`        => [`Response`]
//! - anything else              => `InvalidRequest(-32600)`
//!
//! Malformed JSON fails with `ParseError(-32700)`. Unknown fields are
//! ignored on input; `null` optionals are omitted on output.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, JsonRpcError, Result};
use crate::protocol::{JSONRPC_VERSION, RequestId};

/// JSON-RPC 2.0 request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// JSON-RPC 2.0 notification envelope (no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// JSON-RPC 2.0 response envelope, carrying exactly one of `result`/`error`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl Response {
    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Resolve into the result value or the peer's error
    pub fn into_result(self) -> std::result::Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A single JSON-RPC envelope of any variant
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    /// The method name, for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Message::Notification(n)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

/// Codec instance shared by a session and its transport.
///
/// Stateless today; passed by value through construction so a different
/// mapper can be swapped in without touching global state.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    _priv: (),
}

impl JsonCodec {
    pub fn new() -> Self {
        Self { _priv: () }
    }

    /// Parse one envelope from its wire text.
    pub fn decode(&self, text: &str) -> Result<Message> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::JsonRpc(JsonRpcError::parse_error(e.to_string())))?;
        self.decode_value(value)
    }

    /// Discriminate an already-parsed JSON value into an envelope.
    pub fn decode_value(&self, value: Value) -> Result<Message> {
        let Some(map) = value.as_object() else {
            return Err(Error::JsonRpc(JsonRpcError::invalid_request(
                "expected a JSON object",
            )));
        };

        let message = if map.contains_key("method") && map.contains_key("id") {
            serde_json::from_value::<Request>(value).map(Message::Request)
        } else if map.contains_key("method") {
            serde_json::from_value::<Notification>(value).map(Message::Notification)
        } else if map.contains_key("result") || map.contains_key("error") {
            serde_json::from_value::<Response>(value).map(Message::Response)
        } else {
            return Err(Error::JsonRpc(JsonRpcError::invalid_request(
                "unparseable envelope",
            )));
        };

        message.map_err(|e| Error::JsonRpc(JsonRpcError::invalid_request(e.to_string())))
    }

    /// Serialize one envelope to its wire text.
    pub fn encode(&self, message: &Message) -> Result<String> {
        serde_json::to_string(message).map_err(Error::from)
    }

    /// Convert a previously parsed generic value into a typed result.
    ///
    /// Used by the session after response correlation.
    pub fn from_value<T: DeserializeOwned>(&self, value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(Error::from)
    }

    /// Serialize typed params into a generic value.
    pub fn to_value<T: Serialize>(&self, value: &T) -> Result<Value> {
        serde_json::to_value(value).map_err(Error::from)
    }
}

//! Error types for duplex-mcp
//!
//! ## JSON-RPC Error Codes
//!
//! Standard JSON-RPC 2.0 error codes are defined in the specification:
//! <https://www.jsonrpc.org/specification#error_object>
//!
//! | Code   | Message          | Meaning                                      |
//! |--------|------------------|----------------------------------------------|
//! | -32700 | Parse error      | Invalid JSON was received                    |
//! | -32600 | Invalid Request  | The JSON sent is not a valid Request         |
//! | -32601 | Method not found | The method does not exist / is not available |
//! | -32602 | Invalid params   | Invalid method parameter(s)                  |
//! | -32603 | Internal error   | Internal JSON-RPC error                      |
//!
//! Session-local failures (`Timeout`, `Cancelled`, `SessionClosed`) never
//! cross the wire; the only externally visible trace of a cancellation is a
//! single `notifications/cancelled` notification.

use serde::{Deserialize, Serialize};

/// Type-erased error type used at handler seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Standard JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Invalid JSON was received
    ParseError = -32700,
    /// The JSON sent is not a valid Request object
    InvalidRequest = -32600,
    /// The method does not exist / is not available
    MethodNotFound = -32601,
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal JSON-RPC error
    InternalError = -32603,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// JSON-RPC error object carried in a response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// duplex-mcp error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error response received from the peer
    #[error("{0}")]
    JsonRpc(JsonRpcError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Byte-level transport failure (I/O, HTTP status, stream reset)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport refused the operation because it has been closed
    #[error("Transport closed")]
    TransportClosed,

    /// The session closed while the request was pending
    #[error("Session closed")]
    SessionClosed,

    /// The request deadline elapsed before a response arrived
    #[error("Request timed out")]
    Timeout,

    /// The pending request was cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// MCP protocol-level failure that is not a peer error response
    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JsonRpcError> for Error {
    fn from(err: JsonRpcError) -> Self {
        Error::JsonRpc(err)
    }
}

impl Error {
    /// The JSON-RPC error object to put on the wire when an inbound request
    /// fails with this error. Peer-supplied code/message/data triples pass
    /// through; everything else maps to `InternalError`.
    pub fn to_wire(&self) -> JsonRpcError {
        match self {
            Error::JsonRpc(e) => e.clone(),
            Error::Serialization(e) => JsonRpcError::invalid_params(e.to_string()),
            other => JsonRpcError::internal_error(other.to_string()),
        }
    }
}

/// Result type alias for duplex-mcp
pub type Result<T> = std::result::Result<T, Error>;

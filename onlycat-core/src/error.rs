// Error types for the OnlyCat gateway client

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Diagnostic code carried by disconnect failures, mirroring the
/// WebSocket "abnormal closure" close code.
pub const DISCONNECTED_CODE: u16 = 1006;

/// Status code a gateway response must carry (or omit) to count as success.
pub const SUCCESS_CODE: i64 = 200;

/// Type alias for gateway client results
pub type OnlyCatResult<T> = Result<T, OnlyCatError>;

#[derive(Debug, Error)]
pub enum OnlyCatError {
    #[error("Not initialized: {message}")]
    NotInitialized {
        message: String,
    },

    #[error("Disconnected (code {code})")]
    Disconnected {
        code: u16,
        message: String,
    },

    #[error("Remote error: {response}")]
    Remote {
        /// Full response payload, passed through verbatim.
        response: Value,
    },

    #[error("Request timed out after {after:?}")]
    Timeout {
        after: Duration,
    },

    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        retryable: bool,
    },

    #[error("Decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl OnlyCatError {
    /// Create a not-initialized error (operation attempted with no live transport)
    pub fn not_initialized() -> Self {
        Self::NotInitialized {
            message: "socket not initialized, call init_connection first".to_string(),
        }
    }

    /// Create a disconnected-in-flight error
    pub fn disconnected() -> Self {
        Self::Disconnected {
            code: DISCONNECTED_CODE,
            message: "Disconnected".to_string(),
        }
    }

    /// Create a remote error carrying the response payload
    pub fn remote(response: Value) -> Self {
        Self::Remote { response }
    }

    /// Create a request timeout error
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout { after }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
            retryable: true,
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            source: None,
        }
    }

    /// Numeric diagnostic code, when the error kind carries one
    pub fn code(&self) -> Option<u16> {
        match self {
            OnlyCatError::Disconnected { code, .. } => Some(*code),
            OnlyCatError::Remote { response } => response
                .get("code")
                .and_then(Value::as_i64)
                .and_then(|c| u16::try_from(c).ok()),
            _ => None,
        }
    }

    /// The response payload, for errors that carry one verbatim
    pub fn response(&self) -> Option<&Value> {
        match self {
            OnlyCatError::Remote { response } => Some(response),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            OnlyCatError::Transport { retryable, .. } => *retryable,
            OnlyCatError::Disconnected { .. } => true,
            OnlyCatError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Extract the status code from an opaque gateway response, if present.
pub fn response_code(response: &Value) -> Option<i64> {
    response.get("code").and_then(Value::as_i64)
}

/// A response is successful when it carries no code, or the success code.
pub fn is_success(response: &Value) -> bool {
    match response_code(response) {
        Some(code) => code == SUCCESS_CODE,
        None => true,
    }
}

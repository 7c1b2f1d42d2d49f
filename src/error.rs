//! Error taxonomy for the ledger client.
//!
//! Network and validation failures are caught at the mutation boundary and
//! turned into a `Failed` record; preference-store failures are logged and
//! swallowed. Nothing here is fatal to the process.

use reqwest::StatusCode;
use thiserror::Error;

const GENERIC_FAILURE: &str = "Could not save. Please try again.";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    /// No usable credential at submission time. No network attempt is made.
    #[error("not signed in: missing auth token")]
    Unauthenticated,

    /// Network unreachable, timeout, or a response body we could not parse.
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-2xx status.
    #[error("server rejected request (HTTP {status}): {}", message.as_deref().unwrap_or("no message"))]
    ServerRejection {
        status: u16,
        message: Option<String>,
    },

    /// A persisted preference could not be decoded.
    #[error("malformed cached value for '{key}': {reason}")]
    MalformedCache { key: String, reason: String },

    #[error("invalid payload: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Text to show the cashier next to a failed record.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::Unauthenticated => "Your session has expired. Sign in again.".to_string(),
            LedgerError::ServerRejection {
                message: Some(m), ..
            } if !m.trim().is_empty() => m.trim().to_string(),
            LedgerError::ServerRejection { status, .. } => status_message(*status),
            LedgerError::Validation(m) => m.clone(),
            LedgerError::Transport(_) => "Cannot reach the server. Check your connection.".into(),
            _ => GENERIC_FAILURE.to_string(),
        }
    }

    /// Whether a resubmission of the same payload could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Transport(_) => true,
            LedgerError::ServerRejection { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Fallback message by HTTP status when the server sent none.
pub(crate) fn status_message(status: u16) -> String {
    match status {
        401 => "Session is invalid or expired".to_string(),
        403 => "You are not allowed to do this".to_string(),
        404 => "Backend endpoint not found".to_string(),
        s if s >= 500 => format!("Server error (HTTP {s})"),
        _ => GENERIC_FAILURE.to_string(),
    }
}

/// Convert a `reqwest::Error` into a user-friendly transport error.
pub(crate) fn transport_error(url: &str, err: &reqwest::Error) -> LedgerError {
    if err.is_connect() {
        return LedgerError::Transport(format!("cannot reach backend at {url}"));
    }
    if err.is_timeout() {
        return LedgerError::Transport(format!("connection to {url} timed out"));
    }
    if err.is_builder() {
        return LedgerError::Config(format!("invalid backend URL: {url}"));
    }
    LedgerError::Transport(format!("network error communicating with {url}: {err}"))
}

pub(crate) fn rejection(status: StatusCode, message: Option<String>) -> LedgerError {
    LedgerError::ServerRejection {
        status: status.as_u16(),
        message,
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

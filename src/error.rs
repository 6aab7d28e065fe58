//! Error types for collaboration operations

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::store::StoreError;

/// Classification of a failed collaboration operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    NetworkError,
    StorageError,
    ValidationError,
    NotFound,
    InvalidState,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Whether errors of this kind are retried unless told otherwise
    pub fn default_retryable(&self) -> bool {
        matches!(self, ErrorKind::NetworkError | ErrorKind::StorageError)
    }

    /// Static, user-facing recovery hints shown next to the current error
    pub fn recovery_suggestions(&self) -> &'static [&'static str] {
        match self {
            ErrorKind::PermissionDenied => &[
                "Check that you own this item or have team management rights",
                "Ask the person who delegated the task to make the change",
            ],
            ErrorKind::NetworkError => &[
                "Check your connection and try again",
                "Live updates resume automatically once reconnected",
            ],
            ErrorKind::StorageError => &[
                "Free up local storage by clearing old notifications",
                "Try the action again",
            ],
            ErrorKind::ValidationError => &["Review the highlighted fields and submit again"],
            ErrorKind::NotFound => &[
                "The item may have been deleted; refresh the list",
            ],
            ErrorKind::InvalidState => &[
                "The item changed since you opened it; refresh to see its current status",
            ],
            ErrorKind::Unknown => &["Try again later"],
        }
    }

    /// Best-effort classification of a free-form error message
    pub fn classify_message(message: &str) -> ErrorKind {
        let msg = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

        if has(&["permission", "unauthorized", "forbidden", "not allowed"]) {
            ErrorKind::PermissionDenied
        } else if has(&["network", "timeout", "timed out", "connection", "offline"]) {
            ErrorKind::NetworkError
        } else if has(&["quota", "storage"]) {
            ErrorKind::StorageError
        } else if has(&["not found", "does not exist"]) {
            ErrorKind::NotFound
        } else if has(&["invalid state", "cannot transition"]) {
            ErrorKind::InvalidState
        } else if has(&["invalid", "required", "must not be empty"]) {
            ErrorKind::ValidationError
        } else {
            ErrorKind::Unknown
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "permission_denied" => Ok(ErrorKind::PermissionDenied),
            "network_error" => Ok(ErrorKind::NetworkError),
            "storage_error" => Ok(ErrorKind::StorageError),
            "validation_error" => Ok(ErrorKind::ValidationError),
            "not_found" => Ok(ErrorKind::NotFound),
            "invalid_state" => Ok(ErrorKind::InvalidState),
            "unknown" => Ok(ErrorKind::Unknown),
            _ => Err(format!("Invalid error kind: {}", s)),
        }
    }
}

/// A classified collaboration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CollabError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    /// Diagnostic context (task id, notification id, operation name...)
    pub context: BTreeMap<String, String>,
}

impl CollabError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.default_retryable(),
            context: BTreeMap::new(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Override the kind's default retryability
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach a diagnostic key/value; an existing key is kept
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.entry(key.into()).or_insert_with(|| value.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn suggestions(&self) -> &'static [&'static str] {
        self.kind.recovery_suggestions()
    }

    fn from_store_ref(err: &StoreError) -> Self {
        match err {
            StoreError::RecordNotFound { .. } => Self::not_found(err.to_string()),
            _ => Self::storage(err.to_string()),
        }
    }

    /// Classify an arbitrary error, recognising the crate's own error types first
    pub fn classify(err: &(dyn std::error::Error + 'static)) -> Self {
        if let Some(e) = err.downcast_ref::<CollabError>() {
            return e.clone();
        }
        if let Some(e) = err.downcast_ref::<StoreError>() {
            return Self::from_store_ref(e);
        }
        if let Some(e) = err.downcast_ref::<sqlx::Error>() {
            return Self::storage(format!("Database error: {}", e));
        }
        if let Some(e) = err.downcast_ref::<serde_json::Error>() {
            return Self::storage(format!("Corrupt record payload: {}", e));
        }
        let message = err.to_string();
        Self::new(ErrorKind::classify_message(&message), message)
    }
}

impl From<StoreError> for CollabError {
    fn from(err: StoreError) -> Self {
        Self::from_store_ref(&err)
    }
}

impl From<sqlx::Error> for CollabError {
    fn from(err: sqlx::Error) -> Self {
        Self::classify(&err)
    }
}

impl From<serde_json::Error> for CollabError {
    fn from(err: serde_json::Error) -> Self {
        Self::classify(&err)
    }
}

impl From<anyhow::Error> for CollabError {
    fn from(err: anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<CollabError>() {
                return e.clone();
            }
            if let Some(e) = cause.downcast_ref::<StoreError>() {
                return Self::from_store_ref(e);
            }
        }
        let message = format!("{:#}", err);
        Self::new(ErrorKind::classify_message(&message), message)
    }
}

pub type Result<T> = std::result::Result<T, CollabError>;

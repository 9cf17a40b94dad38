//! Error type shared by every provider operation
//!
//! Each error carries a [`ErrorKind`], a message, an optional chained cause,
//! the time it was raised and a free-form context map.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Boxed cause stored inside an [`LlmError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = LlmError> = std::result::Result<T, E>;

/// Classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Internal,
    NotFound,
    InvalidInput,
    AgentFailed,
    ToolNotFound,
    ToolExecution,
    ToolValidation,
    AuthFailed,
    PermissionDenied,
}

impl ErrorKind {
    /// Stable error code reported to callers and logs
    pub fn code(&self) -> &'static str {
        match self {
            Self::Internal => "ERR_DUCKOPS_1000",
            Self::NotFound => "ERR_DUCKOPS_1001",
            Self::InvalidInput => "ERR_DUCKOPS_1002",
            Self::AgentFailed => "ERR_DUCKOPS_2001",
            Self::ToolNotFound => "ERR_DUCKOPS_3000",
            Self::ToolExecution => "ERR_DUCKOPS_3001",
            Self::ToolValidation => "ERR_DUCKOPS_3002",
            Self::AuthFailed => "ERR_DUCKOPS_4000",
            Self::PermissionDenied => "ERR_DUCKOPS_4003",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Error raised by the provider layer
#[derive(Debug, thiserror::Error)]
#[error("[{kind}] {message}")]
pub struct LlmError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
    timestamp: DateTime<Utc>,
    context: BTreeMap<String, Value>,
}

impl LlmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            timestamp: Utc::now(),
            context: BTreeMap::new(),
        }
    }

    /// Wrap an underlying failure, keeping it reachable through `source()`
    pub fn wrap(err: impl Into<BoxError>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message).with_cause(err)
    }

    /// Attach a diagnostic value under `key`
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, err: impl Into<BoxError>) -> Self {
        self.source = Some(err.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// JSON view used by log sinks and API responses. The cause is omitted.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "code": self.kind.code(),
            "message": self.message,
            "timestamp": self.timestamp.to_rfc3339(),
            "context": self.context,
        })
    }
}

impl From<anyhow::Error> for LlmError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<LlmError>() {
            Ok(inner) => inner,
            Err(err) => Self::wrap(err, ErrorKind::Internal, "internal system error"),
        }
    }
}

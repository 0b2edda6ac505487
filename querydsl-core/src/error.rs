use std::time::Duration;
use thiserror::Error;

/// Which registry a function name was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Compute,
    Filter,
}

impl std::fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionKind::Compute => write!(f, "compute"),
            FunctionKind::Filter => write!(f, "filter"),
        }
    }
}

/// Coarse classification of [`Error`], for callers that branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedRequest,
    UnregisteredFunction,
    Backend,
    FunctionFailed,
    Cancelled,
    Configuration,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Unregistered {kind} function: {name}")]
    UnregisteredFunction { kind: FunctionKind, name: String },

    #[error("Function '{name}' failed: {source}")]
    FunctionFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Function '{function}' requires field '{field}' which was not fetched")]
    UnresolvedField { function: String, field: String },

    #[error("Backend error ({context}): {message}")]
    Backend { context: String, message: String },

    #[error("Fetched more than {limit} rows")]
    ResultTooLarge { limit: usize },

    #[error("Statement timed out after {0:?}")]
    Timeout(Duration),

    #[error("Statement cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedRequest(message.into())
    }

    pub fn backend(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Backend {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedRequest(_) | Error::Serialization(_) => ErrorKind::MalformedRequest,
            Error::UnregisteredFunction { .. } => ErrorKind::UnregisteredFunction,
            // A missing dependency field is reported like a failed function call.
            Error::FunctionFailed { .. } | Error::UnresolvedField { .. } => ErrorKind::FunctionFailed,
            Error::Backend { .. } | Error::ResultTooLarge { .. } => ErrorKind::Backend,
            Error::Timeout(_) | Error::Cancelled => ErrorKind::Cancelled,
            Error::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

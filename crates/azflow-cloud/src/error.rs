//! Reconciliation error types

use crate::dispatch::SpecPhase;
use crate::resource::ResourceKind;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the reconciliation engine
///
/// Every error that crosses a component boundary is wrapped with a short
/// context string (`Context`) or, at the dispatcher, with the resource kind
/// and name (`Reconcile`). The original error stays reachable through
/// [`std::error::Error::source`] and [`CloudError::root`].
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("unexpected resource type {found:?}. Expected one of [{}]", .expected.join(", "))]
    UnknownResourceKind {
        found: String,
        expected: Vec<&'static str>,
    },

    #[error("{found} is not a {expected}")]
    TypeMismatch {
        expected: ResourceKind,
        found: ResourceKind,
    },

    #[error("{kind} {name} has no assignable identity principal")]
    MissingPrincipal { kind: ResourceKind, name: String },

    #[error("operation not found: {0}")]
    OperationNotFound(String),

    #[error("operation {token} failed: {message}")]
    OperationFailed { token: String, message: String },

    #[error("call cancelled")]
    Cancelled,

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<CloudError>,
    },

    #[error("reconcile {kind} {name:?} failed ({phase}): {source}")]
    Reconcile {
        kind: String,
        name: String,
        phase: SpecPhase,
        #[source]
        source: Box<CloudError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used by callers to pick a recovery path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Target resource is absent; a create path may apply
    NotFound,
    /// Target already exists with the requested shape
    AlreadyExists,
    /// Network, throttling or in-progress work; retry later
    Transient,
    /// Malformed input or unsupported kind; surface to the operator
    Permanent,
    /// Long-running operation bookkeeping failure
    Operation,
    /// Caller cancelled or the deadline expired
    Interrupted,
}

impl CloudError {
    /// Wrap this error with a context message
    pub fn context(self, context: impl Into<String>) -> Self {
        CloudError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context layers
    pub fn root(&self) -> &CloudError {
        match self {
            CloudError::Context { source, .. } | CloudError::Reconcile { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self.root() {
            CloudError::NotFound(_) => ErrorClass::NotFound,
            CloudError::AlreadyExists(_) => ErrorClass::AlreadyExists,
            CloudError::Transient(_) | CloudError::Io(_) => ErrorClass::Transient,
            CloudError::Permanent(_)
            | CloudError::UnknownResourceKind { .. }
            | CloudError::TypeMismatch { .. }
            | CloudError::MissingPrincipal { .. }
            | CloudError::Json(_) => ErrorClass::Permanent,
            CloudError::OperationNotFound(_) | CloudError::OperationFailed { .. } => {
                ErrorClass::Operation
            }
            CloudError::Cancelled | CloudError::DeadlineExceeded(_) => ErrorClass::Interrupted,
            CloudError::Context { .. } | CloudError::Reconcile { .. } => {
                unreachable!("root() never returns a wrapper")
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    /// Whether an orchestrator may retry the whole pass
    ///
    /// An unknown operation token is retryable: the next pass starts the
    /// operation from scratch. A failed operation is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            CloudError::Transient(_)
                | CloudError::Io(_)
                | CloudError::OperationNotFound(_)
                | CloudError::DeadlineExceeded(_)
        )
    }
}

/// Context wrapping for engine results
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

//! Error types for the HTTP engine.
//!
//! Every failure that reaches a caller through an invocation view (blocking wait, future,
//! callback, or a body read) is a [`ProcessingError`]. Transport library errors never leak:
//! the [`translate`](crate::engine) layer classifies them into a [`FailureKind`] and keeps the
//! original error as the [`source`](std::error::Error::source) for diagnostics.
//!
//! Engine construction has its own [`BuildError`], since it happens before any invocation
//! exists.

use std::fmt;
use std::time::Duration;

/// Boxed error used as the diagnostic cause of a [`ProcessingError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for invocation outcomes.
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Closed taxonomy of failures surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The request deadline elapsed before the exchange completed.
    Timeout,
    /// The connection was refused or reset, at connect time or mid-flight.
    ConnectionFailure,
    /// The peer closed the connection before a complete response arrived.
    PrematureClose,
    /// The response could not be parsed or decoded.
    MalformedResponse,
    /// A request body writer failed while producing bytes.
    WriteFailure,
    /// A response filter failed while inspecting the response.
    FilterFailure,
    /// The request descriptor cannot be put on the wire.
    InvalidRequest,
    /// The caller cancelled the invocation.
    Cancelled,
    /// Engine-side fault (closed engine, panicked worker).
    Internal,
}

impl FailureKind {
    /// Stable lowercase name, used in log fields and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ConnectionFailure => "connection failure",
            FailureKind::PrematureClose => "premature close",
            FailureKind::MalformedResponse => "malformed response",
            FailureKind::WriteFailure => "write failure",
            FailureKind::FilterFailure => "filter failure",
            FailureKind::InvalidRequest => "invalid request",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The uniform processing failure.
///
/// Blocking calls return it, futures resolve to it, callbacks receive it through
/// [`InvocationCallback::failed`](crate::InvocationCallback::failed).
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProcessingError {
    kind: FailureKind,
    message: String,
    #[source]
    cause: Option<BoxError>,
}

impl ProcessingError {
    /// Create a failure without an underlying cause.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        ProcessingError {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Create a failure wrapping the original cause.
    pub fn with_cause(
        kind: FailureKind,
        message: impl Into<String>,
        cause: impl Into<BoxError>,
    ) -> Self {
        ProcessingError {
            kind,
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// Deadline expiry; the cause is a [`DeadlineElapsed`].
    pub fn timeout(budget: Duration) -> Self {
        Self::with_cause(
            FailureKind::Timeout,
            "request deadline elapsed",
            DeadlineElapsed { budget },
        )
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidRequest, message)
    }

    /// The failure class.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Human-readable description, without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The original cause, if any.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Shorthand for `kind() == FailureKind::Timeout`.
    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::Timeout
    }

    /// Convert into an `io::Error` so the failure can travel through `std::io::Read`.
    pub(crate) fn into_io(self) -> std::io::Error {
        std::io::Error::other(self)
    }

    /// Recover a `ProcessingError` that was carried inside an `io::Error`, such as one
    /// returned by [`BodyStream`](crate::BodyStream)'s `Read` impl.
    ///
    /// Plain I/O errors become `fallback` failures with the I/O error as cause.
    pub fn from_io(err: std::io::Error, fallback: FailureKind) -> Self {
        if err
            .get_ref()
            .is_some_and(|inner| inner.is::<ProcessingError>())
        {
            if let Some(inner) = err.into_inner() {
                if let Ok(processing) = inner.downcast::<ProcessingError>() {
                    return *processing;
                }
            }
            return ProcessingError::internal("lost wrapped processing error");
        }
        ProcessingError::with_cause(fallback, err.to_string(), err)
    }
}

/// Cause attached to [`FailureKind::Timeout`] failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline of {budget:?} elapsed")]
pub struct DeadlineElapsed {
    /// The configured timeout that expired.
    pub budget: Duration,
}

/// Errors raised while constructing an engine.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The configuration is inconsistent.
    #[error("invalid engine configuration: {0}")]
    Config(String),

    /// The event loop runtime could not be started.
    #[error("failed to start engine runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// The underlying HTTP client rejected its settings.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// A CA certificate could not be loaded.
    #[error("failed to load certificate {path}: {reason}")]
    Certificate {
        /// Certificate file path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },
}

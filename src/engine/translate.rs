//! Failure translation.
//!
//! Maps transport faults onto the closed [`FailureKind`] taxonomy and wraps them in a
//! [`ProcessingError`] that keeps the original error as its cause. The classification walks
//! the error's source chain, looking for the `hyper` and `io` errors underneath `reqwest`.

use crate::engine::body::WriteFailureSlot;
use crate::error::{FailureKind, ProcessingError};
use std::error::Error as StdError;
use std::io;

/// Where in the exchange the error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Connecting, writing the request, or reading the response head.
    Send,
    /// Reading the response body.
    Body,
}

/// Translate a failure of `send()`.
pub(crate) fn send_error(err: reqwest::Error, writes: &WriteFailureSlot) -> ProcessingError {
    if let Some(reason) = writes.take() {
        return ProcessingError::with_cause(
            FailureKind::WriteFailure,
            format!("request body writer failed: {reason}"),
            err,
        );
    }
    wrap(classify(&err, Phase::Send), err)
}

/// Translate a failure while streaming the response body.
pub(crate) fn body_error(err: reqwest::Error) -> ProcessingError {
    wrap(classify(&err, Phase::Body), err)
}

fn wrap(kind: FailureKind, err: reqwest::Error) -> ProcessingError {
    let message = match kind {
        FailureKind::Timeout => "transport timed out",
        FailureKind::ConnectionFailure => "connection failed",
        FailureKind::PrematureClose => "connection closed before the response completed",
        FailureKind::MalformedResponse => "malformed response",
        FailureKind::InvalidRequest => "request rejected by transport",
        _ => "transport failure",
    };
    ProcessingError::with_cause(kind, message, err)
}

fn classify(err: &reqwest::Error, phase: Phase) -> FailureKind {
    if err.is_builder() {
        return FailureKind::InvalidRequest;
    }
    if err.is_timeout() {
        return FailureKind::Timeout;
    }
    if let Some(kind) = classify_chain(err) {
        return kind;
    }
    if err.is_connect() {
        return FailureKind::ConnectionFailure;
    }
    if err.is_decode() || err.is_redirect() {
        return FailureKind::MalformedResponse;
    }
    match phase {
        Phase::Send => FailureKind::ConnectionFailure,
        Phase::Body => FailureKind::PrematureClose,
    }
}

fn classify_chain(err: &(dyn StdError + 'static)) -> Option<FailureKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            if hyper_err.is_incomplete_message() {
                return Some(FailureKind::PrematureClose);
            }
            if hyper_err.is_parse() {
                return Some(FailureKind::MalformedResponse);
            }
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if let Some(kind) = classify_io(io_err.kind()) {
                return Some(kind);
            }
        }
        source = cause.source();
    }
    None
}

fn classify_io(kind: io::ErrorKind) -> Option<FailureKind> {
    match kind {
        io::ErrorKind::UnexpectedEof => Some(FailureKind::PrematureClose),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::AddrNotAvailable => Some(FailureKind::ConnectionFailure),
        io::ErrorKind::TimedOut => Some(FailureKind::Timeout),
        io::ErrorKind::InvalidData => Some(FailureKind::MalformedResponse),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] io::Error);

    #[test]
    fn test_io_kinds() {
        assert_eq!(
            classify_io(io::ErrorKind::UnexpectedEof),
            Some(FailureKind::PrematureClose)
        );
        assert_eq!(
            classify_io(io::ErrorKind::ConnectionReset),
            Some(FailureKind::ConnectionFailure)
        );
        assert_eq!(classify_io(io::ErrorKind::NotFound), None);
    }

    #[test]
    fn test_chain_walk_inspects_sources() {
        let reset = Outer(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(classify_chain(&reset), Some(FailureKind::ConnectionFailure));

        let eof = Outer(io::Error::new(io::ErrorKind::UnexpectedEof, "eof in chunk"));
        assert_eq!(classify_chain(&eof), Some(FailureKind::PrematureClose));

        let unrelated = Outer(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert_eq!(classify_chain(&unrelated), None);
    }
}

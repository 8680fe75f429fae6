//! Response filters.
//!
//! Filters observe (and may adjust) a response after its head arrives and before it is
//! handed to the caller. They run on a blocking worker, so they may read the body with
//! [`std::io::Read`]. What the caller sees afterwards depends on the engine's
//! [`FilterReadPolicy`]: by default reads are destructive and the caller gets only the
//! unread remainder; with `Replay` the bytes a filter read are put back.

use crate::config::FilterReadPolicy;
use crate::engine::body::BodyStream;
use crate::engine::bridge::ResponseHandle;
use crate::error::{BoxError, FailureKind, ProcessingError, Result};
use crate::protocol::HeaderList;
use crate::types::RequestDescriptor;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::sync::Arc;
use url::Url;

/// Observes responses before they reach the caller.
///
/// Implemented for closures with the same signature as [`filter`](Self::filter).
pub trait ResponseFilter: Send + Sync + 'static {
    /// Inspect or modify `response`. An error fails the invocation with
    /// [`FailureKind::FilterFailure`].
    fn filter(
        &self,
        request: &RequestContext,
        response: &mut ResponseContext<'_>,
    ) -> std::result::Result<(), BoxError>;
}

impl<F> ResponseFilter for F
where
    F: Fn(&RequestContext, &mut ResponseContext<'_>) -> std::result::Result<(), BoxError>
        + Send
        + Sync
        + 'static,
{
    fn filter(
        &self,
        request: &RequestContext,
        response: &mut ResponseContext<'_>,
    ) -> std::result::Result<(), BoxError> {
        self(request, response)
    }
}

/// What a filter can see of the request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    url: Url,
    headers: HeaderList,
}

impl RequestContext {
    pub(crate) fn capture(request: &RequestDescriptor) -> Self {
        RequestContext {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
        }
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers as supplied by the caller.
    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }
}

/// Mutable view of a response for filters.
#[derive(Debug)]
pub struct ResponseContext<'a> {
    response: &'a mut ResponseHandle,
}

impl ResponseContext<'_> {
    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    /// Override the status code.
    pub fn set_status(&mut self, status: StatusCode) {
        self.response.status = status;
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    /// Response headers, for modification.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response.headers
    }

    /// The body stream. Reads here consume bytes under the destructive policy.
    pub fn entity_stream(&mut self) -> &mut BodyStream {
        &mut self.response.body
    }

    /// Replace the body with `body`. The original body is released.
    pub fn set_entity(&mut self, body: impl Into<Bytes>) {
        self.response.body = BodyStream::from_bytes(body);
    }
}

/// Ordered set of registered filters.
#[derive(Clone, Default)]
pub(crate) struct FilterChain {
    filters: Vec<Arc<dyn ResponseFilter>>,
}

impl FilterChain {
    pub(crate) fn push(&mut self, filter: Arc<dyn ResponseFilter>) {
        self.filters.push(filter);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.filters.len()
    }

    /// Run every filter in registration order; the first error stops the chain.
    pub(crate) fn apply(
        &self,
        request: &RequestContext,
        response: &mut ResponseHandle,
        policy: FilterReadPolicy,
    ) -> Result<()> {
        if policy == FilterReadPolicy::Replay {
            response.body.start_recording();
        }
        let mut outcome = Ok(());
        for (index, filter) in self.filters.iter().enumerate() {
            let mut context = ResponseContext {
                response: &mut *response,
            };
            if let Err(e) = filter.filter(request, &mut context) {
                tracing::debug!(index, error = %e, "response filter failed");
                outcome = Err(ProcessingError::with_cause(
                    FailureKind::FilterFailure,
                    format!("response filter #{index} failed"),
                    e,
                ));
                break;
            }
        }
        if policy == FilterReadPolicy::Replay {
            response.body.replay_recorded();
        }
        outcome
    }
}

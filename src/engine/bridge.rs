//! Response bridge.
//!
//! Turns the transport's response into the caller's result type. A [`ResponseHandle`] gives
//! access to status, headers and a live [`BodyStream`]; [`FromEntity`] decides whether a
//! typed result needs the whole body in memory or can keep the stream.
//!
//! | Requested type | Body handling |
//! |----------------|---------------|
//! | [`ResponseHandle`] | live stream, read later by the caller |
//! | [`BodyStream`] | live stream, never buffered |
//! | `Bytes`, `Vec<u8>`, `String`, [`Json<T>`] | collected before the result is delivered |

use crate::engine::body::{self, BodyStream};
use crate::engine::deadline::Deadline;
use crate::error::{FailureKind, ProcessingError, Result};
use crate::protocol::constants::headers;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use serde::de::DeserializeOwned;
use tokio::sync::OwnedSemaphorePermit;
use url::Url;

/// A received response.
///
/// The caller owns it exclusively. Dropping or [`close`](Self::close)-ing it releases the
/// underlying connection even if the body was never read.
#[derive(Debug)]
pub struct ResponseHandle {
    pub(crate) status: StatusCode,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) url: Url,
    pub(crate) body: BodyStream,
}

impl ResponseHandle {
    pub(crate) fn from_transport(
        handle: &tokio::runtime::Handle,
        response: reqwest::Response,
        deadline: Option<Deadline>,
        permit: Option<OwnedSemaphorePermit>,
        capacity: usize,
    ) -> Self {
        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = body::spawn_pump(handle, response, deadline, permit, capacity);
        ResponseHandle {
            status,
            version,
            headers,
            url,
            body,
        }
    }

    /// Build a response from parts, with a fully buffered body.
    pub fn from_parts(status: StatusCode, headers: HeaderMap, url: Url, body: Bytes) -> Self {
        ResponseHandle {
            status,
            version: Version::HTTP_11,
            headers,
            url,
            body: BodyStream::from_bytes(body),
        }
    }

    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.header(headers::CONTENT_TYPE)
    }

    /// The `Content-Length` header, when present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.header(headers::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    /// Final URL, after any redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The body, for incremental reads.
    pub fn body_mut(&mut self) -> &mut BodyStream {
        &mut self.body
    }

    /// Give up the head and keep only the body.
    pub fn into_body(self) -> BodyStream {
        self.body
    }

    /// Convert the body into `T`, blocking the calling thread while it is read.
    pub fn read_entity<T: FromEntity>(self) -> Result<T> {
        let entity = if T::STREAMING {
            EntityBody::Streaming(self.body)
        } else {
            EntityBody::Buffered(self.body.collect_blocking()?)
        };
        T::from_entity(entity)
    }

    /// Convert the body into `T`.
    pub async fn entity<T: FromEntity>(self) -> Result<T> {
        into_entity(self).await
    }

    /// Release the response and its connection.
    pub fn close(self) {
        tracing::trace!(status = %self.status, "response closed");
    }
}

pub(crate) async fn into_entity<T: FromEntity>(response: ResponseHandle) -> Result<T> {
    let entity = if T::STREAMING {
        EntityBody::Streaming(response.body)
    } else {
        EntityBody::Buffered(response.body.collect().await?)
    };
    T::from_entity(entity)
}

/// A response body as handed to [`FromEntity`].
#[derive(Debug)]
pub enum EntityBody {
    /// The complete body.
    Buffered(Bytes),
    /// The live body stream.
    Streaming(BodyStream),
}

impl EntityBody {
    fn into_bytes(self) -> Result<Bytes> {
        match self {
            EntityBody::Buffered(bytes) => Ok(bytes),
            EntityBody::Streaming(body) => body.collect_blocking(),
        }
    }
}

/// Types a response body can be converted into.
pub trait FromEntity: Sized + Send + 'static {
    /// `true` if the conversion wants the live stream rather than the collected body.
    const STREAMING: bool = false;

    /// Perform the conversion.
    fn from_entity(body: EntityBody) -> Result<Self>;
}

impl FromEntity for Bytes {
    fn from_entity(body: EntityBody) -> Result<Self> {
        body.into_bytes()
    }
}

impl FromEntity for Vec<u8> {
    fn from_entity(body: EntityBody) -> Result<Self> {
        body.into_bytes().map(|b| b.to_vec())
    }
}

impl FromEntity for String {
    fn from_entity(body: EntityBody) -> Result<Self> {
        let bytes = body.into_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            ProcessingError::with_cause(
                FailureKind::MalformedResponse,
                "response body is not valid UTF-8",
                e,
            )
        })
    }
}

impl FromEntity for BodyStream {
    const STREAMING: bool = true;

    fn from_entity(body: EntityBody) -> Result<Self> {
        Ok(match body {
            EntityBody::Streaming(stream) => stream,
            EntityBody::Buffered(bytes) => BodyStream::from_bytes(bytes),
        })
    }
}

/// A JSON response body deserialized into `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Unwrap the value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: DeserializeOwned + Send + 'static> FromEntity for Json<T> {
    fn from_entity(body: EntityBody) -> Result<Self> {
        let bytes = body.into_bytes()?;
        serde_json::from_slice(&bytes).map(Json).map_err(|e| {
            ProcessingError::with_cause(
                FailureKind::MalformedResponse,
                "response body is not the expected JSON",
                e,
            )
        })
    }
}

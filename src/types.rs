//! Request-side types.
//!
//! A [`RequestDescriptor`] describes one outbound request: method, target, headers, an
//! optional [`Entity`], and per-request [`RequestOptions`]. It is built with chained calls and
//! moved into the engine on submission, so it cannot change afterwards.
//!
//! ```
//! use rest_engine_http::{Entity, RequestDescriptor};
//! use std::time::Duration;
//!
//! let request = RequestDescriptor::parse(http::Method::POST, "http://localhost:8080/echo")
//!     .unwrap()
//!     .header("Password", "abracadabra")
//!     .entity(Entity::text("hello"))
//!     .timeout(Duration::from_millis(500));
//!
//! assert_eq!(request.headers().get("password"), Some("abracadabra"));
//! ```

use crate::engine::BodySink;
use crate::error::{FailureKind, ProcessingError, Result};
use crate::protocol::constants::media;
use crate::protocol::HeaderList;
use bytes::Bytes;
use http::Method;
use std::fmt;
use std::io;
use std::time::Duration;
use url::Url;

/// Produces a request body lazily, on a worker thread, by writing into a [`BodySink`].
///
/// Implemented for every `FnOnce(&mut BodySink) -> io::Result<()>` closure.
pub trait BodyWriter: Send + 'static {
    /// Write the whole body into `sink`. Returning an error aborts the request.
    fn write_to(self: Box<Self>, sink: &mut BodySink) -> io::Result<()>;
}

impl<F> BodyWriter for F
where
    F: FnOnce(&mut BodySink) -> io::Result<()> + Send + 'static,
{
    fn write_to(self: Box<Self>, sink: &mut BodySink) -> io::Result<()> {
        (*self)(sink)
    }
}

/// Request body source.
pub enum Payload {
    /// No body.
    Empty,
    /// Fully materialized bytes, sent with a `Content-Length`.
    Bytes(Bytes),
    /// Lazily produced bytes, sent with chunked transfer encoding.
    Deferred(Box<dyn BodyWriter>),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => f.write_str("Empty"),
            Payload::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Payload::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// A request body together with its media type.
#[derive(Debug)]
pub struct Entity {
    payload: Payload,
    media_type: Option<String>,
}

impl Entity {
    /// Raw bytes with an explicit media type.
    pub fn bytes(data: impl Into<Bytes>, media_type: impl Into<String>) -> Self {
        Entity {
            payload: Payload::Bytes(data.into()),
            media_type: Some(media_type.into()),
        }
    }

    /// `application/octet-stream` bytes.
    pub fn octets(data: impl Into<Bytes>) -> Self {
        Self::bytes(data, media::APPLICATION_OCTET_STREAM)
    }

    /// UTF-8 text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::bytes(Bytes::from(text.into()), media::TEXT_PLAIN_UTF8)
    }

    /// A JSON document serialized from `value`.
    pub fn json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).map_err(|e| {
            ProcessingError::with_cause(
                FailureKind::InvalidRequest,
                "failed to serialize JSON entity",
                e,
            )
        })?;
        Ok(Self::bytes(body, media::APPLICATION_JSON))
    }

    /// A body produced by `writer` when the request goes on the wire.
    pub fn deferred(writer: impl BodyWriter, media_type: impl Into<String>) -> Self {
        Entity {
            payload: Payload::Deferred(Box::new(writer)),
            media_type: Some(media_type.into()),
        }
    }

    /// A body with no media type.
    pub fn from_payload(payload: Payload) -> Self {
        Entity {
            payload,
            media_type: None,
        }
    }

    /// The media type, if one was set.
    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    /// The body source.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub(crate) fn into_parts(self) -> (Payload, Option<String>) {
        (self.payload, self.media_type)
    }
}

/// Per-request deadline selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutSetting {
    /// Use the engine's configured default.
    #[default]
    EngineDefault,
    /// Fail with a timeout after this long.
    After(Duration),
    /// No deadline, even if the engine has a default.
    Disabled,
}

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Deadline for the whole exchange.
    pub timeout: TimeoutSetting,
}

/// One outbound request.
#[derive(Debug)]
pub struct RequestDescriptor {
    method: Method,
    url: Url,
    headers: HeaderList,
    entity: Option<Entity>,
    options: RequestOptions,
}

impl RequestDescriptor {
    /// Create a descriptor for `method` on `url`.
    pub fn new(method: Method, url: Url) -> Self {
        RequestDescriptor {
            method,
            url,
            headers: HeaderList::new(),
            entity: None,
            options: RequestOptions::default(),
        }
    }

    /// Create a descriptor, parsing `url`.
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| {
            ProcessingError::with_cause(
                FailureKind::InvalidRequest,
                format!("invalid target URI: {url}"),
                e,
            )
        })?;
        Ok(Self::new(method, url))
    }

    /// `GET url`
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// `POST url`
    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// `PUT url`
    pub fn put(url: Url) -> Self {
        Self::new(Method::PUT, url)
    }

    /// `PATCH url`
    pub fn patch(url: Url) -> Self {
        Self::new(Method::PATCH, url)
    }

    /// `DELETE url`
    pub fn delete(url: Url) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// `HEAD url`
    pub fn head(url: Url) -> Self {
        Self::new(Method::HEAD, url)
    }

    /// Append a header value.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Attach a body.
    pub fn entity(mut self, entity: Entity) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Deadline for this request, overriding the engine default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = TimeoutSetting::After(timeout);
        self
    }

    /// Run this request without a deadline.
    pub fn no_timeout(mut self) -> Self {
        self.options.timeout = TimeoutSetting::Disabled;
        self
    }

    /// Replace all options.
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URI.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    /// Request body, if any.
    pub fn body(&self) -> Option<&Entity> {
        self.entity.as_ref()
    }

    /// Request options.
    pub fn request_options(&self) -> &RequestOptions {
        &self.options
    }

    pub(crate) fn into_parts(self) -> (Method, Url, HeaderList, Option<Entity>) {
        (self.method, self.url, self.headers, self.entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn target() -> Url {
        Url::parse("http://localhost:9/resource").unwrap()
    }

    #[test]
    fn test_builder_accumulates_headers() {
        let request = RequestDescriptor::get(target())
            .header("Accept", "text/plain")
            .header("accept", "text/html");
        let values: Vec<_> = request.headers().get_all("ACCEPT").collect();
        assert_eq!(values, vec!["text/plain", "text/html"]);
        assert!(request.body().is_none());
    }

    #[test]
    fn test_timeout_settings() {
        let request = RequestDescriptor::get(target());
        assert_eq!(request.request_options().timeout, TimeoutSetting::EngineDefault);

        let request = request.timeout(Duration::from_millis(500));
        assert_eq!(
            request.request_options().timeout,
            TimeoutSetting::After(Duration::from_millis(500))
        );

        let request = request.no_timeout();
        assert_eq!(request.request_options().timeout, TimeoutSetting::Disabled);
    }

    #[test]
    fn test_parse_rejects_relative_uri() {
        let err = RequestDescriptor::parse(Method::GET, "/relative").unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidRequest);
    }

    #[test]
    fn test_entity_media_types() {
        assert_eq!(Entity::text("hi").media_type(), Some(media::TEXT_PLAIN_UTF8));
        assert_eq!(
            Entity::octets(vec![1u8, 2, 3]).media_type(),
            Some(media::APPLICATION_OCTET_STREAM)
        );
        let json = Entity::json(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(json.media_type(), Some(media::APPLICATION_JSON));
        assert!(matches!(json.payload(), Payload::Bytes(b) if b.as_ref() == br#"{"a":1}"#));
    }

    #[test]
    fn test_deferred_entity_accepts_closure() {
        let entity = Entity::deferred(
            |sink: &mut BodySink| sink.write_all(b"later"),
            media::APPLICATION_OCTET_STREAM,
        );
        assert!(matches!(entity.payload(), Payload::Deferred(_)));
    }
}

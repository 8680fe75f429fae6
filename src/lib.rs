#![warn(missing_docs)]

//! # rest-engine-http: an asynchronous HTTP client engine
//!
//! This crate connects a non-blocking HTTP transport ([`reqwest`] on a [`tokio`] event loop)
//! to three ways of calling it: blocking calls, futures, and completion callbacks. Every
//! request, whichever way it was submitted, goes through the same pipeline and settles
//! exactly once.
//!
//! ## Key Features
//!
//! - **One engine, three call styles**: [`HttpEngine::invoke`], awaiting a
//!   [`PendingInvocation`], or [`HttpEngine::submit_with_callback`]
//! - **Streaming in both directions**: request bodies written lazily into a [`BodySink`],
//!   response bodies read incrementally from a [`BodyStream`] with bounded buffering
//! - **Deadlines**: per-request timeouts covering the whole exchange, with the losing side of
//!   the race aborted
//! - **Failure taxonomy**: transport faults surface as a [`ProcessingError`] with a
//!   [`FailureKind`], never as raw transport errors
//! - **Response filters**: inspect or rewrite responses before callers see them
//! - **Connection limits**: a bounded number of concurrent exchanges per authority
//!
//! ## Usage
//!
//! ```no_run
//! use rest_engine_http::{Entity, HttpEngine, RequestDescriptor};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = HttpEngine::new()?;
//!
//! let request = RequestDescriptor::parse(http::Method::POST, "http://localhost:8080/echo")?
//!     .entity(Entity::text("hello"))
//!     .timeout(Duration::from_secs(5));
//!
//! let response = engine.submit(request).await?;
//! println!("status: {}", response.status());
//! let body: String = response.entity().await?;
//! assert_eq!(body, "hello");
//! # Ok(())
//! # }
//! ```
//!
//! ## Deferred Request Bodies
//!
//! ```no_run
//! use rest_engine_http::{BodySink, Entity, HttpEngine, RequestDescriptor};
//! use std::io::Write;
//!
//! let engine = HttpEngine::new().unwrap();
//! let request = RequestDescriptor::parse(http::Method::POST, "http://localhost:8080/echo")
//!     .unwrap()
//!     .entity(Entity::deferred(
//!         |sink: &mut BodySink| -> std::io::Result<()> {
//!             for line in 0..1000 {
//!                 writeln!(sink, "line {line}")?;
//!             }
//!             Ok(())
//!         },
//!         "text/plain",
//!     ));
//!
//! let echoed: Vec<u8> = engine.invoke_as(request).unwrap();
//! assert!(echoed.starts_with(b"line 0\n"));
//! ```
//!
//! ## Module Structure
//!
//! - **[engine]** - The engine, invocations, body streaming, filters
//! - **[types]** - Request descriptors and entities
//! - **[config]** - Engine configuration
//! - **[error]** - Error types and the failure taxonomy
//! - **[protocol]** - Header list and wire constants

pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::{EngineConfig, FilterReadPolicy, ProtocolVersion, TlsOptions};
pub use engine::{
    callback, BodySink, BodyStream, EngineBuilder, EntityBody, FnCallback, FromEntity,
    HttpEngine, InvocationCallback, Json, PendingInvocation, RequestContext, ResponseContext,
    ResponseFilter, ResponseHandle,
};
pub use error::{BoxError, BuildError, DeadlineElapsed, FailureKind, ProcessingError, Result};
pub use protocol::HeaderList;
pub use types::{BodyWriter, Entity, Payload, RequestDescriptor, RequestOptions, TimeoutSetting};

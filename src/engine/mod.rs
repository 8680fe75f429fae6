//! The asynchronous HTTP engine.
//!
//! # Module Organization
//!
//! ```text
//! engine/
//! ├── transport  - HttpEngine, EngineBuilder, request translation
//! ├── invocation - PendingInvocation and its single-completion cell
//! ├── deadline   - Request deadlines and the timer task
//! ├── body       - Request body sink and response body stream
//! ├── bridge     - ResponseHandle and typed entity conversion
//! ├── filter     - Response filters
//! ├── pool       - Per-authority connection gate
//! └── translate  - Transport error classification
//! ```
//!
//! # Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`HttpEngine`] | Submits requests and owns the event loop |
//! | [`PendingInvocation`] | Wait on it, await it, or attach a callback |
//! | [`ResponseHandle`] | Status, headers and a live body |
//! | [`BodyStream`] | Destructive, incremental body reads |
//! | [`BodySink`] | Destination for deferred request bodies |
//! | [`ResponseFilter`] | Inspects responses before callers see them |
//!
//! # Examples
//!
//! ```no_run
//! use rest_engine_http::{callback, HttpEngine, RequestDescriptor};
//!
//! let engine = HttpEngine::new().unwrap();
//! let request = || RequestDescriptor::parse(http::Method::GET, "http://localhost:8080/").unwrap();
//!
//! // Blocking
//! let body: String = engine.invoke_as(request()).unwrap();
//!
//! // Callback
//! engine.submit_with_callback(
//!     request(),
//!     callback(
//!         |body: String| println!("{body}"),
//!         |err| eprintln!("request failed: {err}"),
//!     ),
//! );
//! # drop(body);
//! ```

mod body;
mod bridge;
mod deadline;
mod filter;
mod invocation;
mod pool;
mod translate;
mod transport;

pub use body::{BodySink, BodyStream};
pub use bridge::{EntityBody, FromEntity, Json, ResponseHandle};
pub use filter::{RequestContext, ResponseContext, ResponseFilter};
pub use invocation::{callback, FnCallback, InvocationCallback, PendingInvocation};
pub use transport::{EngineBuilder, HttpEngine};

//! Transport adapter and the engine facade.
//!
//! [`HttpEngine`] owns a `reqwest::Client` (connection pooling, TLS, ALPN negotiation) and the
//! event loop that drives it. Each submission becomes one exchange task:
//!
//! 1. wait for a slot on the target's connection gate,
//! 2. translate the [`RequestDescriptor`] into a reqwest request, starting a deferred body
//!    writer if there is one,
//! 3. send, and build a [`ResponseHandle`] around a body pump once the head arrives,
//! 4. run the response filters on a blocking worker,
//! 5. convert to the requested type and settle the invocation.
//!
//! A deadline timer races the exchange; transport errors pass through the failure
//! translator before anything reaches the caller.

use crate::config::{EngineConfig, ProtocolVersion};
use crate::engine::body::{self, WriteFailureSlot};
use crate::engine::bridge::{self, FromEntity, ResponseHandle};
use crate::engine::deadline::{self, Deadline};
use crate::engine::filter::{FilterChain, RequestContext, ResponseFilter};
use crate::engine::invocation::{self, InvocationCallback, Origin, PendingInvocation};
use crate::engine::pool::ConnectionGate;
use crate::error::{BuildError, ProcessingError, Result};
use crate::protocol::constants::headers;
use crate::types::{Payload, RequestDescriptor};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// Builder for an [`HttpEngine`].
///
/// ```no_run
/// use rest_engine_http::{BoxError, EngineConfig, HttpEngine, RequestContext, ResponseContext};
///
/// let engine = HttpEngine::builder()
///     .config(EngineConfig {
///         request_timeout_ms: Some(10_000),
///         ..Default::default()
///     })
///     .filter(
///         |_: &RequestContext, response: &mut ResponseContext<'_>| -> Result<(), BoxError> {
///             tracing::info!(status = %response.status(), "response received");
///             Ok(())
///         },
///     )
///     .build()
///     .unwrap();
/// # drop(engine);
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    filters: FilterChain,
    runtime: Option<tokio::runtime::Handle>,
}

impl EngineBuilder {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a response filter. Filters run in registration order.
    pub fn filter(mut self, filter: impl ResponseFilter) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Drive I/O on an existing runtime instead of starting one.
    pub fn runtime_handle(mut self, handle: tokio::runtime::Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the engine.
    pub fn build(self) -> std::result::Result<HttpEngine, BuildError> {
        self.config.validate()?;
        let client = build_client(&self.config)?;
        let (runtime, handle) = match self.runtime {
            Some(handle) => (None, handle),
            None => {
                let mut builder = tokio::runtime::Builder::new_multi_thread();
                builder.enable_all().thread_name("http-engine");
                if let Some(threads) = self.config.worker_threads {
                    builder.worker_threads(threads);
                }
                let runtime = builder.build()?;
                let handle = runtime.handle().clone();
                (Some(runtime), handle)
            }
        };
        tracing::debug!(
            protocol = ?self.config.protocol,
            owned_runtime = runtime.is_some(),
            filters = self.filters.len(),
            "http engine started"
        );
        Ok(HttpEngine {
            inner: Arc::new(EngineInner {
                client,
                gate: ConnectionGate::new(self.config.max_connections_per_host),
                config: self.config,
                filters: self.filters,
                handle,
                runtime,
                closed: AtomicBool::new(false),
            }),
        })
    }
}

fn build_client(config: &EngineConfig) -> std::result::Result<reqwest::Client, BuildError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .pool_idle_timeout(Duration::from_millis(config.pool_idle_timeout_ms))
        .pool_max_idle_per_host(config.max_idle_per_host)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if let Some(ms) = config.connect_timeout_ms {
        builder = builder.connect_timeout(Duration::from_millis(ms));
    }

    builder = match config.protocol {
        ProtocolVersion::Http1 => builder.http1_only(),
        ProtocolVersion::Negotiate => builder,
        ProtocolVersion::Http2 => builder.http2_prior_knowledge(),
    };

    if config.title_case_headers {
        builder = builder.http1_title_case_headers();
    }

    if config.tls.https_only {
        builder = builder.https_only(true);
    }
    if config.tls.accept_invalid_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }
    for path in &config.tls.ca_certificates {
        let certificate_error = |reason: String| BuildError::Certificate {
            path: path.display().to_string(),
            reason,
        };
        let pem = std::fs::read(path).map_err(|e| certificate_error(e.to_string()))?;
        let certificate =
            reqwest::Certificate::from_pem(&pem).map_err(|e| certificate_error(e.to_string()))?;
        builder = builder.add_root_certificate(certificate);
    }

    if !config.proxy_url.is_empty() {
        builder = builder.proxy(reqwest::Proxy::all(&config.proxy_url)?);
    }

    Ok(builder.build()?)
}

struct EngineInner {
    client: reqwest::Client,
    config: EngineConfig,
    filters: FilterChain,
    gate: ConnectionGate,
    handle: tokio::runtime::Handle,
    runtime: Option<tokio::runtime::Runtime>,
    closed: AtomicBool,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics; shutdown_background never blocks.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Asynchronous HTTP client engine.
///
/// Cheap to clone; clones share the connection pool and event loop.
///
/// # Examples
///
/// ```no_run
/// use rest_engine_http::{HttpEngine, RequestDescriptor};
///
/// let engine = HttpEngine::new().unwrap();
/// let request = RequestDescriptor::parse(http::Method::GET, "http://localhost:8080/")
///     .unwrap()
///     .header("Password", "abracadabra");
///
/// let response = engine.invoke(request).unwrap();
/// assert_eq!(response.status(), 200);
/// assert_eq!(response.read_entity::<String>().unwrap(), "Success");
/// ```
#[derive(Clone)]
pub struct HttpEngine {
    inner: Arc<EngineInner>,
}

impl HttpEngine {
    /// Engine with default configuration and its own runtime.
    pub fn new() -> std::result::Result<Self, BuildError> {
        Self::builder().build()
    }

    /// Engine with `config` and its own runtime.
    pub fn with_config(config: EngineConfig) -> std::result::Result<Self, BuildError> {
        Self::builder().config(config).build()
    }

    /// Start configuring an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Submit a request; the invocation completes with the response head and a live body.
    pub fn submit(&self, request: RequestDescriptor) -> PendingInvocation<ResponseHandle> {
        self.dispatch(request, |response| async move { Ok(response) })
    }

    /// Submit a request; the invocation completes with the body converted to `T`.
    ///
    /// Value types are read completely before the invocation completes, inside the
    /// request deadline. [`BodyStream`](crate::BodyStream) is handed over live.
    pub fn submit_as<T: FromEntity>(&self, request: RequestDescriptor) -> PendingInvocation<T> {
        self.dispatch(request, bridge::into_entity::<T>)
    }

    /// Submit a request and deliver the converted body to `callback`.
    pub fn submit_with_callback<T, C>(&self, request: RequestDescriptor, callback: C)
    where
        T: FromEntity,
        C: InvocationCallback<T>,
    {
        self.submit_as::<T>(request).on_complete(callback)
    }

    /// Send a request and block until the response head arrives.
    pub fn invoke(&self, request: RequestDescriptor) -> Result<ResponseHandle> {
        self.submit(request).wait()
    }

    /// Send a request and block until the body has been converted to `T`.
    pub fn invoke_as<T: FromEntity>(&self, request: RequestDescriptor) -> Result<T> {
        self.submit_as::<T>(request).wait()
    }

    /// Stop accepting requests. In-flight invocations run to completion; later submissions
    /// fail with [`FailureKind::Internal`](crate::FailureKind::Internal).
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.gate.close();
            tracing::debug!("http engine closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Free exchange slots for the authority of `url`, when the pool is bounded and the
    /// authority has been used.
    pub fn available_connections(&self, url: &url::Url) -> Option<usize> {
        self.inner.gate.available(url)
    }

    fn dispatch<T, F, Fut>(&self, request: RequestDescriptor, finish: F) -> PendingInvocation<T>
    where
        T: Send + 'static,
        F: FnOnce(ResponseHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (mut pending, settler) = invocation::pending::<T>(id);

        if self.is_closed() {
            settler.settle(
                Origin::Exchange,
                Err(ProcessingError::internal("engine is closed")),
            );
            return pending;
        }

        let deadline = Deadline::resolve(
            request.request_options().timeout,
            self.inner.config.request_timeout(),
        );
        pending.set_deadline(deadline.map(|d| d.at.into_std()));
        let span = tracing::debug_span!(
            "invocation",
            id = %id,
            method = %request.method(),
            url = %request.url(),
        );
        span.in_scope(|| tracing::debug!(timeout = ?deadline.map(|d| d.budget), "submitted"));

        let inner = Arc::clone(&self.inner);
        let exchange_settler = settler.clone();
        let task = self.inner.handle.spawn(
            async move {
                let outcome = match exchange(&inner, request, deadline).await {
                    Ok(response) => finish(response).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = &outcome {
                    if inner.config.enable_logging {
                        tracing::warn!(kind = %e.kind(), error = %e, "invocation failed");
                    }
                }
                exchange_settler.settle(Origin::Exchange, outcome);
            }
            .instrument(span),
        );
        settler.attach(Origin::Exchange, task.abort_handle());

        if let Some(deadline) = deadline {
            let timer = deadline::arm(&self.inner.handle, deadline, settler.clone());
            settler.attach(Origin::Timer, timer);
        }
        pending
    }
}

impl std::fmt::Debug for HttpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEngine")
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn exchange(
    inner: &EngineInner,
    request: RequestDescriptor,
    deadline: Option<Deadline>,
) -> Result<ResponseHandle> {
    let permit = inner.gate.acquire(request.url()).await?;
    let context = (!inner.filters.is_empty()).then(|| RequestContext::capture(&request));
    let writes = WriteFailureSlot::default();

    let builder = prepare(inner, request, &writes)?;
    let response = builder
        .send()
        .await
        .map_err(|e| crate::engine::translate::send_error(e, &writes))?;
    tracing::debug!(
        status = %response.status(),
        version = ?response.version(),
        "response head received"
    );

    let mut response = ResponseHandle::from_transport(
        &inner.handle,
        response,
        deadline,
        permit,
        inner.config.body_buffer_chunks,
    );

    if let Some(context) = context {
        let filters = inner.filters.clone();
        let policy = inner.config.filter_read_policy;
        let (filtered, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = filters.apply(&context, &mut response, policy);
            (response, outcome)
        })
        .await
        .map_err(|e| {
            ProcessingError::with_cause(
                crate::FailureKind::FilterFailure,
                "response filter panicked",
                e,
            )
        })?;
        outcome?;
        response = filtered;
    }
    Ok(response)
}

fn prepare(
    inner: &EngineInner,
    request: RequestDescriptor,
    writes: &WriteFailureSlot,
) -> Result<reqwest::RequestBuilder> {
    let (method, url, header_list, entity) = request.into_parts();
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProcessingError::invalid_request(format!(
                "unsupported scheme: {other}"
            )))
        }
    }
    let mut header_map = header_list.to_header_map()?;
    let mut builder = inner.client.request(method, url);

    if let Some(entity) = entity {
        let (payload, media_type) = entity.into_parts();
        if let Some(media_type) = media_type {
            if !header_list.contains(headers::CONTENT_TYPE) {
                let value = media_type.parse().map_err(|e| {
                    ProcessingError::with_cause(
                        crate::FailureKind::InvalidRequest,
                        format!("invalid media type: {media_type}"),
                        e,
                    )
                })?;
                header_map.insert(reqwest::header::CONTENT_TYPE, value);
            }
        }
        builder = match payload {
            Payload::Empty => builder,
            Payload::Bytes(bytes) => builder.body(bytes),
            Payload::Deferred(writer) => builder.body(body::spawn_writer(
                writer,
                inner.config.write_chunk_size,
                inner.config.body_buffer_chunks,
                writes.clone(),
            )),
        };
    }
    Ok(builder.headers(header_map))
}

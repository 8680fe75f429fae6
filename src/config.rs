//! Engine configuration.
//!
//! [`EngineConfig`] is a plain struct with public fields and sensible defaults. It can be
//! built in code with struct update syntax or deserialized from JSON.
//!
//! ```
//! use rest_engine_http::{EngineConfig, ProtocolVersion};
//!
//! let config = EngineConfig {
//!     request_timeout_ms: Some(5_000),
//!     protocol: ProtocolVersion::Http1,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//!
//! let parsed = EngineConfig::from_json(r#"{ "request_timeout_ms": 250 }"#).unwrap();
//! assert_eq!(parsed.request_timeout_ms, Some(250));
//! ```

use crate::error::BuildError;
use crate::protocol::constants::DEFAULT_USER_AGENT;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// HTTP protocol selection for new connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVersion {
    /// HTTP/1.1 only.
    Http1,
    /// HTTP/2 when the server advertises it through ALPN, otherwise HTTP/1.1.
    #[default]
    Negotiate,
    /// HTTP/2 with prior knowledge, on plaintext and TLS alike.
    Http2,
}

/// How reads made by response filters affect what the caller later reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReadPolicy {
    /// Bytes a filter reads are gone; the caller sees only the remainder.
    #[default]
    Destructive,
    /// Bytes a filter reads are buffered and handed to the caller again.
    Replay,
}

/// TLS settings for `https` targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// Refuse plaintext targets.
    pub https_only: bool,
    /// Skip certificate verification. Test environments only.
    pub accept_invalid_certs: bool,
    /// Additional PEM-encoded root certificates.
    pub ca_certificates: Vec<PathBuf>,
}

/// Configuration for an [`HttpEngine`](crate::HttpEngine).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default per-request deadline in milliseconds; `None` disables it.
    pub request_timeout_ms: Option<u64>,
    /// TCP/TLS connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Protocol selection.
    pub protocol: ProtocolVersion,
    /// TLS settings.
    pub tls: TlsOptions,
    /// Concurrent exchanges allowed per target authority; `None` is unbounded.
    pub max_connections_per_host: Option<usize>,
    /// Idle connections kept per host for reuse.
    pub max_idle_per_host: usize,
    /// How long an idle connection stays in the pool, in milliseconds.
    pub pool_idle_timeout_ms: u64,
    /// Event loop worker threads for an engine-owned runtime.
    pub worker_threads: Option<usize>,
    /// Size at which a deferred body writer's buffer is flushed to the wire.
    pub write_chunk_size: usize,
    /// Chunks buffered between the connection and a body reader (or writer and connection).
    pub body_buffer_chunks: usize,
    /// Filter read semantics.
    pub filter_read_policy: FilterReadPolicy,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
    /// Send HTTP/1 header names in Title-Case instead of lowercase.
    pub title_case_headers: bool,
    /// Follow up to ten redirects.
    pub follow_redirects: bool,
    /// Proxy for all traffic; empty disables it.
    pub proxy_url: String,
    /// Log translated failures at `warn` level.
    pub enable_logging: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            request_timeout_ms: None,
            connect_timeout_ms: Some(30_000),
            protocol: ProtocolVersion::default(),
            tls: TlsOptions::default(),
            max_connections_per_host: Some(64),
            max_idle_per_host: 16,
            pool_idle_timeout_ms: 90_000,
            worker_threads: None,
            write_chunk_size: 64 * 1024,
            body_buffer_chunks: 16,
            filter_read_policy: FilterReadPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            title_case_headers: false,
            follow_redirects: false,
            proxy_url: String::new(),
            enable_logging: true,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, BuildError> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| BuildError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.request_timeout_ms == Some(0) {
            return Err(BuildError::Config(
                "request_timeout_ms must be positive; use None to disable".into(),
            ));
        }
        if self.connect_timeout_ms == Some(0) {
            return Err(BuildError::Config("connect_timeout_ms must be positive".into()));
        }
        if self.max_connections_per_host == Some(0) {
            return Err(BuildError::Config(
                "max_connections_per_host must be positive; use None for unbounded".into(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(BuildError::Config("worker_threads must be positive".into()));
        }
        if self.write_chunk_size == 0 {
            return Err(BuildError::Config("write_chunk_size must be positive".into()));
        }
        if self.body_buffer_chunks == 0 {
            return Err(BuildError::Config("body_buffer_chunks must be positive".into()));
        }
        Ok(())
    }

    /// The engine-wide default deadline.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

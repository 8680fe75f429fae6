//! Wire-level constants and header handling.
//!
//! The engine does not introduce any framing of its own; these are the standard HTTP names
//! and media types it needs when translating descriptors.

mod headers;

pub use headers::HeaderList;

/// Header and media type constants.
pub mod constants {
    /// Header names the engine reads or writes.
    pub mod headers {
        /// `Content-Type`
        pub const CONTENT_TYPE: &str = "Content-Type";
        /// `Content-Length`
        pub const CONTENT_LENGTH: &str = "Content-Length";
        /// `User-Agent`
        pub const USER_AGENT: &str = "User-Agent";
    }

    /// Media types used by the built-in entity constructors.
    pub mod media {
        /// `application/octet-stream`
        pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";
        /// `text/plain; charset=utf-8`
        pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";
        /// `application/json`
        pub const APPLICATION_JSON: &str = "application/json";
    }

    /// Default `User-Agent` sent by the engine.
    pub const DEFAULT_USER_AGENT: &str = concat!("rest-engine-http/", env!("CARGO_PKG_VERSION"));
}

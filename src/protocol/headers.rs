//! Multi-valued request header list.
//!
//! Header names keep the casing the caller supplied. Lookups are ASCII case-insensitive, as
//! HTTP field names are. Values of the same name keep the order they were appended in.
//!
//! # Examples
//!
//! ```
//! use rest_engine_http::protocol::HeaderList;
//!
//! let mut headers = HeaderList::new();
//! headers.append("X-Trace", "a");
//! headers.append("x-trace", "b");
//!
//! assert_eq!(headers.get_all("X-TRACE").collect::<Vec<_>>(), vec!["a", "b"]);
//! assert_eq!(headers.names().collect::<Vec<_>>(), vec!["X-Trace", "x-trace"]);
//! ```

use crate::error::{ProcessingError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Ordered header list with case-preserving names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping earlier values of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value of `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Remove every value of `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether any value of `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Header names exactly as supplied, one per entry.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Iterate `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries (not distinct names).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert into a wire header map.
    ///
    /// Fails with [`FailureKind::InvalidRequest`](crate::FailureKind::InvalidRequest) when a
    /// name or value is not a legal HTTP token.
    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ProcessingError::with_cause(
                    crate::FailureKind::InvalidRequest,
                    format!("invalid header name: {name:?}"),
                    e,
                )
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                ProcessingError::with_cause(
                    crate::FailureKind::InvalidRequest,
                    format!("invalid value for header {name}"),
                    e,
                )
            })?;
            map.append(header_name, header_value);
        }
        Ok(map)
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderList
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        HeaderList {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

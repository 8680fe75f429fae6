//! Per-target connection gate.
//!
//! reqwest owns the sockets and keeps idle connections for reuse; the gate bounds how many
//! exchanges may use connections to one authority at a time. When the bound is reached, new
//! invocations suspend in [`ConnectionGate::acquire`] until an earlier exchange releases its
//! permit (its response body completes, fails, or is dropped). The request deadline keeps
//! running while an invocation waits here.

use crate::error::{ProcessingError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

pub(crate) struct ConnectionGate {
    limit: Option<usize>,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ConnectionGate {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        ConnectionGate {
            limit,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for a slot on `url`'s authority. `None` when the gate is unbounded.
    pub(crate) async fn acquire(&self, url: &Url) -> Result<Option<OwnedSemaphorePermit>> {
        let Some(limit) = self.limit else {
            return Ok(None);
        };
        let key = authority_key(url)?;
        let semaphore = {
            let mut hosts = self.hosts.lock();
            Arc::clone(
                hosts
                    .entry(key)
                    .or_insert_with(|| Arc::new(Semaphore::new(limit))),
            )
        };
        if semaphore.available_permits() == 0 {
            tracing::debug!(url = %url, limit, "connection limit reached, waiting");
        }
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| ProcessingError::internal("connection gate closed"))?;
        Ok(Some(permit))
    }

    /// Free slots for `url`'s authority, or `None` if unbounded or never used.
    pub(crate) fn available(&self, url: &Url) -> Option<usize> {
        let key = authority_key(url).ok()?;
        self.hosts
            .lock()
            .get(&key)
            .map(|semaphore| semaphore.available_permits())
    }

    pub(crate) fn close(&self) {
        for semaphore in self.hosts.lock().values() {
            semaphore.close();
        }
    }
}

fn authority_key(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| ProcessingError::invalid_request(format!("target has no host: {url}")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ProcessingError::invalid_request(format!("unsupported scheme: {url}")))?;
    Ok(format!("{}://{}:{}", url.scheme(), host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;
    use std::time::Duration;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_authority_key_uses_default_port() {
        assert_eq!(
            authority_key(&url("https://example.com/a")).unwrap(),
            "https://example.com:443"
        );
        assert_eq!(
            authority_key(&url("http://example.com:8080/")).unwrap(),
            "http://example.com:8080"
        );
        let err = authority_key(&url("mailto:someone@example.com")).unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_unbounded_gate_hands_out_nothing() {
        let gate = ConnectionGate::new(None);
        assert!(gate.acquire(&url("http://a/")).await.unwrap().is_none());
        assert_eq!(gate.available(&url("http://a/")), None);
    }

    #[tokio::test]
    async fn test_exhausted_gate_suspends_until_release() {
        let gate = Arc::new(ConnectionGate::new(Some(1)));
        let target = url("http://localhost:1/");
        let first = gate.acquire(&target).await.unwrap();
        assert_eq!(gate.available(&target), Some(0));

        let waiter = {
            let gate = Arc::clone(&gate);
            let target = target.clone();
            tokio::spawn(async move { gate.acquire(&target).await.map(|p| p.is_some()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert!(waiter.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_hosts_are_independent() {
        let gate = ConnectionGate::new(Some(1));
        let _a = gate.acquire(&url("http://a/")).await.unwrap();
        let b = tokio::time::timeout(Duration::from_millis(100), gate.acquire(&url("http://b/")))
            .await
            .unwrap()
            .unwrap();
        assert!(b.is_some());
    }
}

//! # Core Logic - Endpoint Pool
//!
//! Ordered list of interchangeable backend endpoints with one active session.
//! Callers classify their own failures and call [`EndpointPool::rotate`];
//! the pool never rotates on its own.

use crate::error::ConfigError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Failures before an endpoint is reported unhealthy.
const UNHEALTHY_AFTER: u64 = 3;

/// Endpoint bookkeeping
#[derive(Debug)]
pub struct Endpoint {
    pub url: String,
    pub failure_count: AtomicU64,
    pub healthy: AtomicBool,
}

impl Endpoint {
    fn new(url: String) -> Self {
        Self {
            url,
            failure_count: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.failure_count.load(Ordering::SeqCst)
    }
}

/// Health status of an endpoint
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub url: String,
    pub active: bool,
    pub healthy: bool,
    pub failure_count: u64,
}

struct Active<C> {
    index: usize,
    session: Arc<C>,
}

type Connector<C> = Box<dyn Fn(&str) -> C + Send + Sync>;

/// Pool of endpoints with a swappable live session of type `C`.
pub struct EndpointPool<C> {
    endpoints: Vec<Endpoint>,
    active: RwLock<Active<C>>,
    connector: Connector<C>,
    settle_delay: Duration,
    rotations: AtomicU64,
}

impl<C> std::fmt::Debug for EndpointPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPool")
            .field("endpoints", &self.endpoints)
            .field("active_index", &self.active_index())
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}

impl<C> EndpointPool<C> {
    /// Build a pool starting at the first URL.
    ///
    /// Every URL is parsed up front so a rotation can never land on garbage.
    pub fn new<F>(urls: &[String], settle_delay: Duration, connector: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> C + Send + Sync + 'static,
    {
        if urls.is_empty() {
            return Err(ConfigError::MissingField {
                field: "endpoints".to_string(),
            });
        }

        for url in urls {
            Url::parse(url).map_err(|_| ConfigError::InvalidEndpointUrl { url: url.clone() })?;
        }

        let endpoints: Vec<Endpoint> = urls.iter().cloned().map(Endpoint::new).collect();
        let session = Arc::new(connector(&endpoints[0].url));

        Ok(Self {
            endpoints,
            active: RwLock::new(Active { index: 0, session }),
            connector: Box::new(connector),
            settle_delay,
            rotations: AtomicU64::new(0),
        })
    }

    /// Session bound to the active endpoint. Fetch it right before each use.
    pub fn current(&self) -> Arc<C> {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&active.session)
    }

    pub fn active_index(&self) -> usize {
        self.active.read().unwrap_or_else(|e| e.into_inner()).index
    }

    pub fn current_url(&self) -> &str {
        &self.endpoints[self.active_index()].url
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::SeqCst)
    }

    /// Advance exactly one position (wrapping), swap in a fresh session and
    /// wait the settle delay. Returns the new active index.
    pub async fn rotate(&self) -> usize {
        let (next, url) = {
            let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
            let next = (active.index + 1) % self.endpoints.len();
            let url = self.endpoints[next].url.clone();
            active.session = Arc::new((self.connector)(&url));
            active.index = next;
            (next, url)
        };

        self.rotations.fetch_add(1, Ordering::SeqCst);
        warn!(
            "Endpoint failure or limit reached. Rotating to [{}] {}",
            next, url
        );

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        next
    }

    /// Record a successful request for an endpoint
    pub fn record_success(&self, url: &str) {
        if let Some(endpoint) = self.find(url) {
            endpoint.failure_count.store(0, Ordering::SeqCst);
            endpoint.healthy.store(true, Ordering::SeqCst);
        }
    }

    /// Record a failed request for an endpoint
    pub fn record_failure(&self, url: &str) {
        if let Some(endpoint) = self.find(url) {
            let failures = endpoint.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
            if failures >= UNHEALTHY_AFTER && endpoint.healthy.swap(false, Ordering::SeqCst) {
                warn!(
                    "Marking endpoint {} as unhealthy after {} failures",
                    url, failures
                );
            }
        }
    }

    pub fn healthy_count(&self) -> usize {
        self.endpoints.iter().filter(|e| e.is_healthy()).count()
    }

    pub fn health_status(&self) -> Vec<EndpointHealth> {
        let active = self.active_index();
        self.endpoints
            .iter()
            .enumerate()
            .map(|(i, e)| EndpointHealth {
                url: e.url.clone(),
                active: i == active,
                healthy: e.is_healthy(),
                failure_count: e.failures(),
            })
            .collect()
    }

    fn find(&self, url: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.url == url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://rpc-{}.example.com", i)).collect()
    }

    #[test]
    fn test_rejects_empty_and_invalid() {
        let empty = EndpointPool::new(&[], Duration::ZERO, |u: &str| u.to_string());
        assert!(matches!(empty, Err(ConfigError::MissingField { .. })));

        let bad = EndpointPool::new(
            &["not a url".to_string()],
            Duration::ZERO,
            |u: &str| u.to_string(),
        );
        assert!(matches!(bad, Err(ConfigError::InvalidEndpointUrl { .. })));
    }

    #[test]
    fn test_health_bookkeeping() {
        let pool = EndpointPool::new(&urls(2), Duration::ZERO, |u: &str| u.to_string()).unwrap();
        let url = pool.current_url().to_string();

        for _ in 0..3 {
            pool.record_failure(&url);
        }
        assert_eq!(pool.healthy_count(), 1);

        pool.record_success(&url);
        assert_eq!(pool.healthy_count(), 2);
        assert!(pool.health_status()[0].active);
    }
}

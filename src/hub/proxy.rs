use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::config::HubConfig;
use crate::core::error::Result;
use crate::hub::limiter::TokenBucket;
use crate::hub::registry::ServiceHub;
use crate::hub::{service_prefix, CoordStore};

/// Caching, rate-limited front for the registry.
///
/// The first lookup of a service starts a watch task that re-lists on
/// every store change, so the cache trails the store by roughly one RTT
/// plus notification latency. When the token bucket runs dry, lookups
/// report no endpoints and the caller fails fast instead of hammering
/// the registry.
pub struct HubProxy<S: CoordStore> {
    hub: Arc<ServiceHub<S>>,
    cache: Arc<DashMap<String, Vec<String>>>,
    watched: DashMap<String, ()>,
    limiter: TokenBucket,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: CoordStore> HubProxy<S> {
    pub fn new(hub: Arc<ServiceHub<S>>, config: &HubConfig) -> Self {
        HubProxy {
            hub,
            cache: Arc::new(DashMap::new()),
            watched: DashMap::new(),
            limiter: TokenBucket::new(config.qps),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn hub(&self) -> &Arc<ServiceHub<S>> {
        &self.hub
    }

    /// Endpoints of `service`, from cache when warm. An exhausted rate
    /// limit yields an empty list.
    pub async fn list(&self, service: &str) -> Result<Vec<String>> {
        if !self.limiter.allow() {
            warn!(service, "registry lookup rate limited");
            return Ok(Vec::new());
        }

        self.ensure_watch(service);
        if let Some(cached) = self.cache.get(service) {
            return Ok(cached.clone());
        }

        let endpoints = self.hub.list(service).await?;
        if !endpoints.is_empty() {
            self.cache.insert(service.to_string(), endpoints.clone());
        }
        Ok(endpoints)
    }

    pub async fn pick(&self, service: &str) -> Result<Option<String>> {
        let endpoints = self.list(service).await?;
        Ok(self.hub.pick_from(&endpoints))
    }

    /// Start the watch loop for `service` exactly once.
    fn ensure_watch(&self, service: &str) {
        if self.watched.insert(service.to_string(), ()).is_some() {
            return;
        }
        let hub = Arc::clone(&self.hub);
        let cache = Arc::clone(&self.cache);
        let service = service.to_string();
        let handle = tokio::spawn(async move {
            let prefix = service_prefix(&service);
            let mut revision = 0u64;
            loop {
                revision = match hub.store().wait_change(prefix.clone(), revision).await {
                    Ok(rev) => rev,
                    Err(e) => {
                        warn!(service = %service, error = %e, "watch interrupted");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };
                match hub.list(&service).await {
                    Ok(endpoints) if endpoints.is_empty() => {
                        cache.remove(&service);
                    }
                    Ok(endpoints) => {
                        debug!(service = %service, ?endpoints, "endpoint cache refreshed");
                        cache.insert(service.clone(), endpoints);
                    }
                    Err(e) => warn!(service = %service, error = %e, "cache refresh failed"),
                }
            }
        });
        self.watchers.lock().push(handle);
    }

    /// Stop the watch tasks. The wrapped hub stays usable.
    pub fn close(&self) {
        for handle in self.watchers.lock().drain(..) {
            handle.abort();
        }
    }
}

impl<S: CoordStore> Drop for HubProxy<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{MemStore, INDEX_SERVICE};
    use std::time::Duration;

    fn proxy(qps: u32) -> (Arc<ServiceHub<MemStore>>, HubProxy<MemStore>) {
        let mut config = HubConfig::default();
        config.qps = qps;
        let hub = Arc::new(ServiceHub::new(Arc::new(MemStore::new()), &config));
        let proxy = HubProxy::new(Arc::clone(&hub), &config);
        (hub, proxy)
    }

    #[tokio::test]
    async fn list_caches_and_tracks_changes() {
        let (hub, proxy) = proxy(1000);
        hub.register(INDEX_SERVICE, "a:1", None).await.unwrap();

        assert_eq!(proxy.list(INDEX_SERVICE).await.unwrap(), vec!["a:1"]);

        hub.register(INDEX_SERVICE, "b:2", None).await.unwrap();
        // Give the watch task a beat to re-list.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let endpoints = proxy.list(INDEX_SERVICE).await.unwrap();
        assert_eq!(endpoints.len(), 2);

        hub.unregister(INDEX_SERVICE, "a:1").await.unwrap();
        hub.unregister(INDEX_SERVICE, "b:2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(proxy.list(INDEX_SERVICE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_fails_fast_with_empty_list() {
        let (hub, proxy) = proxy(2);
        hub.register(INDEX_SERVICE, "a:1", None).await.unwrap();

        let mut non_empty = 0;
        for _ in 0..10 {
            if !proxy.list(INDEX_SERVICE).await.unwrap().is_empty() {
                non_empty += 1;
            }
        }
        // Two tokens of burst, the rest rejected.
        assert!(non_empty <= 2);
        assert!(non_empty >= 1);
    }

    #[tokio::test]
    async fn pick_goes_through_the_cache() {
        let (hub, proxy) = proxy(1000);
        assert!(proxy.pick(INDEX_SERVICE).await.unwrap().is_none());
        hub.register(INDEX_SERVICE, "a:1", None).await.unwrap();
        assert_eq!(
            proxy.pick(INDEX_SERVICE).await.unwrap(),
            Some("a:1".to_string())
        );
    }
}

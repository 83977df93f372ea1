use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::core::config::HubConfig;
use crate::core::error::{Error, Result};
use crate::hub::balancer::{LoadBalancer, RoundRobin};
use crate::hub::{endpoint_of_key, service_key, service_prefix, CoordStore, LeaseId};

/// Registry client: lease-backed registration plus endpoint discovery.
/// One hub (and so one keepalive chain) per process; shared via `Arc`.
pub struct ServiceHub<S: CoordStore> {
    store: Arc<S>,
    heartbeat: Duration,
    balancer: Box<dyn LoadBalancer>,
}

impl<S: CoordStore> ServiceHub<S> {
    pub fn new(store: Arc<S>, config: &HubConfig) -> Self {
        ServiceHub {
            store,
            heartbeat: config.heartbeat,
            balancer: Box::new(RoundRobin::default()),
        }
    }

    pub fn with_balancer(mut self, balancer: Box<dyn LoadBalancer>) -> Self {
        self.balancer = balancer;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Register `endpoint` under `service`. With no lease a fresh one is
    /// granted and the key written; with a lease a single keepalive is
    /// issued, falling back to a fresh registration if the lease is gone.
    pub async fn register(
        &self,
        service: &str,
        endpoint: &str,
        lease: Option<LeaseId>,
    ) -> Result<LeaseId> {
        let mut lease = lease;
        loop {
            match lease {
                None => {
                    let granted = self.store.grant(self.heartbeat).await?;
                    self.store
                        .put(service_key(service, endpoint), granted)
                        .await?;
                    info!(service, endpoint, lease = granted.0, "registered");
                    return Ok(granted);
                }
                Some(id) => match self.store.keep_alive(id).await {
                    Ok(()) => return Ok(id),
                    Err(Error::LeaseLost(_)) => {
                        warn!(service, endpoint, lease = id.0, "lease lost, re-registering");
                        lease = None;
                    }
                    Err(e) => return Err(e),
                },
            }
        }
    }

    pub async fn unregister(&self, service: &str, endpoint: &str) -> Result<()> {
        self.store.delete(service_key(service, endpoint)).await?;
        info!(service, endpoint, "unregistered");
        Ok(())
    }

    /// Live endpoints of `service`.
    pub async fn list(&self, service: &str) -> Result<Vec<String>> {
        let keys = self.store.list_prefix(service_prefix(service)).await?;
        Ok(keys.iter().map(|k| endpoint_of_key(k)).collect())
    }

    /// One endpoint, chosen by the balancer; `None` when the service has
    /// no live workers.
    pub async fn pick(&self, service: &str) -> Result<Option<String>> {
        let endpoints = self.list(service).await?;
        Ok(self.balancer.take(&endpoints))
    }

    /// Balance over an externally obtained list (used by the proxy so its
    /// cache and this hub share one rotation).
    pub fn pick_from(&self, endpoints: &[String]) -> Option<String> {
        self.balancer.take(endpoints)
    }
}

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::Result;

pub mod balancer;
pub mod limiter;
pub mod memstore;
pub mod proxy;
pub mod registry;
pub mod remote;
pub mod server;

pub use balancer::{LoadBalancer, RandomPick, RoundRobin};
pub use memstore::MemStore;
pub use proxy::HubProxy;
pub use registry::ServiceHub;
pub use remote::RemoteStore;

/// Root of every registration key in the coordination store.
pub const SERVICE_ROOT_PATH: &str = "/radic/index";

/// Service name the shard fleet registers under.
pub const INDEX_SERVICE: &str = "index_service";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub u64);

/// A key changed (created, deleted, or expired) at this revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub key: String,
    pub revision: u64,
}

/// Client surface of the coordination store backing service discovery:
/// lease-scoped keys, prefix listing, and a revision-based change wait.
/// `MemStore` is the embedded single-node implementation; `RemoteStore`
/// talks to a hub daemon. A consensus-quorum store can slot in behind
/// the same trait.
pub trait CoordStore: Send + Sync + 'static {
    /// New lease that expires `ttl` after its last extension.
    fn grant(&self, ttl: Duration) -> impl Future<Output = Result<LeaseId>> + Send;

    /// Extend a lease; `Error::LeaseLost` once it expired.
    fn keep_alive(&self, lease: LeaseId) -> impl Future<Output = Result<()>> + Send;

    /// Bind `key` (empty value) to a live lease.
    fn put(&self, key: String, lease: LeaseId) -> impl Future<Output = Result<()>> + Send;

    fn delete(&self, key: String) -> impl Future<Output = Result<()>> + Send;

    /// All live keys under `prefix`, ascending.
    fn list_prefix(&self, prefix: String) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Park until the store's revision moves past `since` (wakeups may be
    /// spurious and the wait gives up after a poll window); returns the
    /// revision now current. Callers reconcile by re-listing.
    fn wait_change(
        &self,
        prefix: String,
        since: u64,
    ) -> impl Future<Output = Result<u64>> + Send;
}

/// `/radic/index/<service>/<endpoint>`
pub fn service_key(service: &str, endpoint: &str) -> String {
    format!("{}/{}/{}", SERVICE_ROOT_PATH.trim_end_matches('/'), service, endpoint)
}

/// `/radic/index/<service>/`
pub fn service_prefix(service: &str) -> String {
    format!("{}/{}/", SERVICE_ROOT_PATH.trim_end_matches('/'), service)
}

/// The endpoint is the last path segment of its registration key.
pub fn endpoint_of_key(key: &str) -> String {
    key.rsplit('/').next().unwrap_or_default().to_string()
}

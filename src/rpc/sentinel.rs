use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::core::error::{Error, Result};
use crate::core::types::Document;
use crate::hub::{CoordStore, HubProxy, INDEX_SERVICE};
use crate::index::IndexService;
use crate::query::TermQuery;
use crate::rpc::client::IndexClient;
use crate::rpc::wire::SearchRequest;

/// Capacity of the search fan-in channel.
const COLLECT_BUFFER: usize = 1000;

/// Client to the whole shard fleet: discovers workers through the proxy,
/// pools one client per endpoint, fans out, merges.
pub struct Sentinel<S: CoordStore> {
    hub: Arc<HubProxy<S>>,
    pool: DashMap<String, IndexClient>,
}

impl<S: CoordStore> Sentinel<S> {
    pub fn new(hub: Arc<HubProxy<S>>) -> Self {
        Sentinel {
            hub,
            pool: DashMap::new(),
        }
    }

    /// Pooled client for `endpoint`, dialing on first use. A client that
    /// failed an RPC is evicted by the caller, so the next lookup redials.
    fn get_conn(&self, endpoint: &str) -> Result<IndexClient> {
        if let Some(client) = self.pool.get(endpoint) {
            return Ok(client.clone());
        }
        let client = IndexClient::connect(endpoint)?;
        debug!(endpoint, "dialed index worker");
        self.pool.insert(endpoint.to_string(), client.clone());
        Ok(client)
    }

    fn drop_conn(&self, endpoint: &str) {
        self.pool.remove(endpoint);
    }

    async fn endpoints(&self) -> Result<Vec<String>> {
        self.hub.list(INDEX_SERVICE).await
    }

    /// Route one document to one shard, chosen by the load balancer.
    pub async fn add_doc(&self, doc: Document) -> Result<u32> {
        let endpoint = self
            .hub
            .pick(INDEX_SERVICE)
            .await?
            .ok_or_else(|| Error::NoEndpoints(INDEX_SERVICE.to_string()))?;
        let client = self.get_conn(&endpoint)?;
        match client.add_doc(&doc).await {
            Ok(count) => Ok(count),
            Err(e) => {
                self.drop_conn(&endpoint);
                Err(e)
            }
        }
    }

    /// Delete everywhere; the id's shard is whichever worker ingested it.
    /// Per-shard failures are logged and skipped, the rest still count.
    pub async fn delete_doc(&self, doc_id: &str) -> Result<u32> {
        let endpoints = self.endpoints().await?;
        if endpoints.is_empty() {
            return Ok(0);
        }
        let affected = Arc::new(AtomicU32::new(0));
        let mut tasks = JoinSet::new();
        for endpoint in endpoints {
            let client = match self.get_conn(&endpoint) {
                Ok(client) => client,
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "skipping unreachable worker");
                    continue;
                }
            };
            let affected = Arc::clone(&affected);
            let doc_id = doc_id.to_string();
            tasks.spawn(async move {
                match client.delete_doc(&doc_id).await {
                    Ok(count) => {
                        affected.fetch_add(count, Ordering::Relaxed);
                        None
                    }
                    Err(e) => {
                        warn!(endpoint = client.endpoint(), error = %e, "delete fan-out failed");
                        Some(client.endpoint().to_string())
                    }
                }
            });
        }
        while let Some(result) = tasks.join_next().await {
            if let Ok(Some(failed)) = result {
                self.drop_conn(&failed);
            }
        }
        Ok(affected.load(Ordering::Relaxed))
    }

    /// Fan the query out to every live shard and merge.
    ///
    /// Workers push documents into a bounded channel while a collector
    /// drains it. The channel closes only once every worker task has
    /// dropped its sender, and the collector is awaited after that, so
    /// nothing is produced after close and nothing is returned before the
    /// drain finishes. A failed shard contributes nothing; the rest
    /// still answer.
    pub async fn search(
        &self,
        query: TermQuery,
        on_flag: u64,
        off_flag: u64,
        or_flags: Vec<u64>,
    ) -> Result<Vec<Document>> {
        let endpoints = self.endpoints().await?;
        if endpoints.is_empty() {
            return Ok(Vec::new());
        }

        let request = SearchRequest {
            query,
            on_flag,
            off_flag,
            or_flags,
        };
        let (tx, mut rx) = mpsc::channel::<Document>(COLLECT_BUFFER);
        let collector = tokio::spawn(async move {
            let mut merged: HashMap<String, Document> = HashMap::new();
            while let Some(doc) = rx.recv().await {
                merged.insert(doc.id.clone(), doc);
            }
            merged.into_values().collect::<Vec<Document>>()
        });

        let mut tasks = JoinSet::new();
        for endpoint in endpoints {
            let client = match self.get_conn(&endpoint) {
                Ok(client) => client,
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "skipping unreachable worker");
                    continue;
                }
            };
            let request = request.clone();
            let tx = tx.clone();
            tasks.spawn(async move {
                match client.search(&request).await {
                    Ok(docs) => {
                        debug!(endpoint = client.endpoint(), hits = docs.len(), "shard answered");
                        for doc in docs {
                            if tx.send(doc).await.is_err() {
                                break;
                            }
                        }
                        None
                    }
                    Err(e) => {
                        warn!(endpoint = client.endpoint(), error = %e, "search fan-out failed");
                        Some(client.endpoint().to_string())
                    }
                }
            });
        }
        drop(tx);

        while let Some(result) = tasks.join_next().await {
            if let Ok(Some(failed)) = result {
                self.drop_conn(&failed);
            }
        }
        collector
            .await
            .map_err(|e| Error::rpc("collector", e))
    }

    /// Total documents across the fleet.
    pub async fn count(&self) -> Result<u64> {
        let endpoints = self.endpoints().await?;
        let total = Arc::new(AtomicU32::new(0));
        let mut tasks = JoinSet::new();
        for endpoint in endpoints {
            let client = match self.get_conn(&endpoint) {
                Ok(client) => client,
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "skipping unreachable worker");
                    continue;
                }
            };
            let total = Arc::clone(&total);
            tasks.spawn(async move {
                match client.count().await {
                    Ok(count) => {
                        total.fetch_add(count, Ordering::Relaxed);
                        None
                    }
                    Err(e) => {
                        warn!(endpoint = client.endpoint(), error = %e, "count fan-out failed");
                        Some(client.endpoint().to_string())
                    }
                }
            });
        }
        while let Some(result) = tasks.join_next().await {
            if let Ok(Some(failed)) = result {
                self.drop_conn(&failed);
            }
        }
        Ok(total.load(Ordering::Relaxed) as u64)
    }

    /// Drop every pooled connection and stop the discovery watchers.
    pub fn shutdown(&self) {
        self.pool.clear();
        self.hub.close();
    }
}

impl<S: CoordStore> IndexService for Sentinel<S> {
    async fn add_doc(&self, doc: Document) -> Result<u32> {
        Sentinel::add_doc(self, doc).await
    }

    async fn update_doc(&self, doc: Document) -> Result<u32> {
        Sentinel::delete_doc(self, &doc.id).await?;
        Sentinel::add_doc(self, doc).await
    }

    async fn delete_doc(&self, id: String) -> Result<u32> {
        Sentinel::delete_doc(self, &id).await
    }

    async fn search(
        &self,
        query: TermQuery,
        on_flag: u64,
        off_flag: u64,
        or_flags: Vec<u64>,
    ) -> Result<Vec<Document>> {
        Sentinel::search(self, query, on_flag, off_flag, or_flags).await
    }

    async fn count(&self) -> Result<u64> {
        Sentinel::count(self).await
    }

    async fn close(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{HubConfig, ShardConfig};
    use crate::hub::{MemStore, ServiceHub};
    use crate::index::builder::accepts;
    use crate::index::Indexer;
    use crate::rpc::server::IndexServer;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    async fn start_shard(dir: &TempDir, name: &str, hub: &Arc<ServiceHub<MemStore>>) -> IndexServer<MemStore> {
        let indexer = Arc::new(Indexer::open(&ShardConfig::new(dir.path().join(name))).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        IndexServer::serve(indexer, listener, Some(Arc::clone(hub)))
            .await
            .unwrap()
    }

    fn fleet() -> (Arc<ServiceHub<MemStore>>, Sentinel<MemStore>) {
        let config = HubConfig::default();
        let hub = Arc::new(ServiceHub::new(Arc::new(MemStore::new()), &config));
        let proxy = Arc::new(HubProxy::new(Arc::clone(&hub), &config));
        (hub, Sentinel::new(proxy))
    }

    fn doc(id: &str, words: &[&str]) -> Document {
        let mut d = Document::new(id);
        for w in words {
            d = d.with_keyword("content", w);
        }
        d
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_workers_surfaces_as_empty_not_panic() {
        let (_hub, sentinel) = fleet();
        let hits = sentinel
            .search(TermQuery::Must(vec![]), 0, 0, vec![])
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(sentinel.count().await.unwrap(), 0);
        assert!(matches!(
            sentinel.add_doc(doc("p", &["w"])).await,
            Err(Error::NoEndpoints(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fan_out_merges_and_counts_across_shards() {
        let dir = TempDir::new().unwrap();
        let (hub, sentinel) = fleet();
        let s0 = start_shard(&dir, "s0", &hub).await;
        let s1 = start_shard(&dir, "s1", &hub).await;

        // Spread documents over both workers through the balancer.
        for i in 0..6 {
            sentinel
                .add_doc(doc(&format!("p{i}"), &["cable", "usb"]))
                .await
                .unwrap();
        }

        let per_shard0 = s0.indexer().count().unwrap();
        let per_shard1 = s1.indexer().count().unwrap();
        assert_eq!(per_shard0 + per_shard1, 6);
        assert_eq!(sentinel.count().await.unwrap(), 6);

        let hits = sentinel
            .search(TermQuery::keyword("content", "cable"), 0, 0, vec![])
            .await
            .unwrap();
        assert_eq!(hits.len(), 6);
        let mut ids: Vec<String> = hits.iter().map(|d| d.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 6);

        let removed = sentinel.delete_doc("p3").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(sentinel.count().await.unwrap(), 5);

        s0.close().await.unwrap();
        s1.close().await.unwrap();
        sentinel.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dead_shard_contributes_nothing() {
        let dir = TempDir::new().unwrap();
        let (hub, sentinel) = fleet();
        let s0 = start_shard(&dir, "s0", &hub).await;
        let s1 = start_shard(&dir, "s1", &hub).await;

        s0.indexer().add_doc(doc("a", &["cable"])).unwrap();
        s1.indexer().add_doc(doc("b", &["cable"])).unwrap();

        let hits = sentinel
            .search(TermQuery::keyword("content", "cable"), 0, 0, vec![])
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        s1.close().await.unwrap();
        // The unregister is immediate; give the proxy watch a beat.
        tokio::time::sleep(Duration::from_millis(150)).await;

        let hits = sentinel
            .search(TermQuery::keyword("content", "cable"), 0, 0, vec![])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        s0.close().await.unwrap();
        sentinel.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn deterministic_sharding_partitions_the_build() {
        // Four fixed ids, two workers: each id lands on exactly one shard
        // and the union covers all four, run after run.
        let ids: Vec<String> = (0..4)
            .map(|i| format!("c9a1f6de-0000-4000-8000-00000000000{i}"))
            .collect();
        for _ in 0..3 {
            let shard0: Vec<&String> = ids.iter().filter(|id| accepts(id, 2, 0)).collect();
            let shard1: Vec<&String> = ids.iter().filter(|id| accepts(id, 2, 1)).collect();
            assert_eq!(shard0.len() + shard1.len(), 4);
            for id in &shard0 {
                assert!(!shard1.contains(id));
            }
        }
    }
}

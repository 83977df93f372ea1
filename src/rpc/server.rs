use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::error::{Error, Result};
use crate::core::types::Document;
use crate::hub::{CoordStore, ServiceHub, INDEX_SERVICE};
use crate::index::Indexer;
use crate::netutil;
use crate::rpc::wire::{
    self, AffectedCount, DocId, Envelope, SearchRequest, SearchResult,
};

/// Heartbeats fire this much before the lease would lapse.
const HEARTBEAT_SLACK: Duration = Duration::from_millis(100);

/// RPC surface over one shard indexer, with self-registration.
///
/// `close` is the coordinated shutdown: it stops the heartbeat, removes
/// the registration, drains the HTTP server, and closes the store.
pub struct IndexServer<S: CoordStore> {
    indexer: Arc<Indexer>,
    hub: Option<Arc<ServiceHub<S>>>,
    self_addr: String,
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

type ShardState = State<Arc<Indexer>>;

/// Run one indexer call off the async runtime, folded into the reply
/// envelope. Request handling never panics the server; even a poisoned
/// task lands as an error string.
async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T> + Send + 'static,
) -> Envelope<T> {
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("indexer task failed: {e}")),
    }
}

fn reply<T: serde::Serialize>(envelope: &Envelope<T>) -> Vec<u8> {
    wire::encode(envelope).unwrap_or_else(|e| {
        error!(error = %e, "reply encode failed");
        Vec::new()
    })
}

async fn add_doc(State(indexer): ShardState, body: Bytes) -> Vec<u8> {
    let envelope = match wire::decode::<Document>(&body) {
        Ok(doc) => {
            run_blocking(move || indexer.add_doc(doc).map(|count| AffectedCount { count })).await
        }
        Err(e) => Err(e.to_string()),
    };
    reply(&envelope)
}

async fn delete_doc(State(indexer): ShardState, body: Bytes) -> Vec<u8> {
    let envelope = match wire::decode::<DocId>(&body) {
        Ok(req) => {
            run_blocking(move || {
                indexer
                    .delete_doc(&req.doc_id)
                    .map(|count| AffectedCount { count })
            })
            .await
        }
        Err(e) => Err(e.to_string()),
    };
    reply(&envelope)
}

async fn search(State(indexer): ShardState, body: Bytes) -> Vec<u8> {
    let envelope = match wire::decode::<SearchRequest>(&body) {
        Ok(req) => {
            run_blocking(move || {
                indexer
                    .search(&req.query, req.on_flag, req.off_flag, &req.or_flags)
                    .map(|results| SearchResult { results })
            })
            .await
        }
        Err(e) => Err(e.to_string()),
    };
    reply(&envelope)
}

async fn count(State(indexer): ShardState, _body: Bytes) -> Vec<u8> {
    let envelope = run_blocking(move || {
        indexer.count().map(|count| AffectedCount {
            count: count as u32,
        })
    })
    .await;
    reply(&envelope)
}

pub fn router(indexer: Arc<Indexer>) -> Router {
    Router::new()
        .route(wire::ADD_DOC_PATH, post(add_doc))
        .route(wire::DELETE_DOC_PATH, post(delete_doc))
        .route(wire::SEARCH_PATH, post(search))
        .route(wire::COUNT_PATH, post(count))
        .with_state(indexer)
}

impl<S: CoordStore> IndexServer<S> {
    /// Bind `port` on all interfaces and serve. Ports at or below 1024
    /// are refused.
    pub async fn start(
        indexer: Arc<Indexer>,
        port: u16,
        hub: Option<Arc<ServiceHub<S>>>,
    ) -> Result<Self> {
        if port <= 1024 {
            return Err(Error::InvalidPort(port));
        }
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Self::serve(indexer, listener, hub).await
    }

    /// Serve on an already bound listener (tests bind port 0 here).
    pub async fn serve(
        indexer: Arc<Indexer>,
        listener: TcpListener,
        hub: Option<Arc<ServiceHub<S>>>,
    ) -> Result<Self> {
        let addr = listener.local_addr()?;
        let advertised_ip = if addr.ip().is_loopback() {
            "127.0.0.1".to_string()
        } else {
            netutil::local_ipv4()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string())
        };
        let self_addr = format!("{advertised_ip}:{}", addr.port());

        let (shutdown, server_rx) = watch::channel(false);
        let app = router(Arc::clone(&indexer));
        let mut tasks = Vec::new();
        {
            let mut rx = server_rx.clone();
            tasks.push(tokio::spawn(async move {
                let served = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = rx.changed().await;
                });
                if let Err(e) = served.await {
                    error!(error = %e, "index server stopped");
                }
            }));
        }

        if let Some(hub) = &hub {
            let mut lease = hub.register(INDEX_SERVICE, &self_addr, None).await?;
            let hub = Arc::clone(hub);
            let endpoint = self_addr.clone();
            let mut rx = server_rx.clone();
            let interval = hub
                .heartbeat()
                .saturating_sub(HEARTBEAT_SLACK)
                .max(Duration::from_millis(50));
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = rx.changed() => break,
                        _ = tokio::time::sleep(interval) => {
                            match hub.register(INDEX_SERVICE, &endpoint, Some(lease)).await {
                                Ok(renewed) => lease = renewed,
                                Err(e) => warn!(endpoint = %endpoint, error = %e, "heartbeat failed"),
                            }
                        }
                    }
                }
            }));
        }

        info!(%addr, self_addr = %self_addr, "index server listening");
        Ok(IndexServer {
            indexer,
            hub,
            self_addr,
            addr,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The `ip:port` this shard registered under.
    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    pub async fn close(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        // Heartbeat first: a keepalive racing the unregister below could
        // otherwise resurrect the key.
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        if let Some(hub) = &self.hub {
            hub.unregister(INDEX_SERVICE, &self.self_addr).await?;
        }
        self.indexer.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{HubConfig, ShardConfig};
    use crate::hub::MemStore;
    use crate::query::TermQuery;
    use crate::rpc::client::IndexClient;
    use tempfile::TempDir;

    async fn shard_server(
        dir: &TempDir,
        name: &str,
        hub: Option<Arc<ServiceHub<MemStore>>>,
    ) -> IndexServer<MemStore> {
        let indexer = Arc::new(Indexer::open(&ShardConfig::new(dir.path().join(name))).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        IndexServer::serve(indexer, listener, hub).await.unwrap()
    }

    #[tokio::test]
    async fn low_ports_are_refused() {
        let dir = TempDir::new().unwrap();
        let indexer = Arc::new(Indexer::open(&ShardConfig::new(dir.path().join("s"))).unwrap());
        let err = IndexServer::<MemStore>::start(indexer, 1024, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidPort(1024)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rpc_surface_roundtrip() {
        let dir = TempDir::new().unwrap();
        let server = shard_server(&dir, "s", None).await;
        let client = IndexClient::connect(server.self_addr()).unwrap();

        let doc = Document::new("p1")
            .with_keyword("content", "wireless")
            .with_keyword("content", "mouse");
        assert_eq!(client.add_doc(&doc).await.unwrap(), 1);
        assert_eq!(client.count().await.unwrap(), 1);

        let hits = client
            .search(&SearchRequest {
                query: TermQuery::all_of("content", &["wireless", "mouse"]),
                on_flag: 0,
                off_flag: 0,
                or_flags: vec![],
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "p1");

        assert_eq!(client.delete_doc("p1").await.unwrap(), 1);
        assert_eq!(client.delete_doc("p1").await.unwrap(), 0);
        assert_eq!(client.count().await.unwrap(), 0);

        server.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_request_is_an_envelope_error_not_a_crash() {
        let dir = TempDir::new().unwrap();
        let server = shard_server(&dir, "s", None).await;

        let url = format!("http://{}{}", server.self_addr(), wire::SEARCH_PATH);
        let raw = reqwest::Client::new()
            .post(&url)
            .body(vec![0xde, 0xad, 0xbe, 0xef])
            .send()
            .await
            .unwrap();
        assert!(raw.status().is_success());
        let bytes = raw.bytes().await.unwrap();
        let envelope: Envelope<SearchResult> = wire::decode(&bytes).unwrap();
        assert!(envelope.is_err());

        // The server still answers well-formed requests.
        let client = IndexClient::connect(server.self_addr()).unwrap();
        assert_eq!(client.count().await.unwrap(), 0);
        server.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn registers_heartbeats_and_unregisters() {
        let dir = TempDir::new().unwrap();
        let mut config = HubConfig::default();
        config.heartbeat = Duration::from_millis(300);
        let hub = Arc::new(ServiceHub::new(Arc::new(MemStore::new()), &config));

        let server = shard_server(&dir, "s", Some(Arc::clone(&hub))).await;
        let listed = hub.list(INDEX_SERVICE).await.unwrap();
        assert_eq!(listed, vec![server.self_addr().to_string()]);

        // Three lease TTLs pass; the heartbeat keeps the key alive.
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(hub.list(INDEX_SERVICE).await.unwrap().len(), 1);

        server.close().await.unwrap();
        assert!(hub.list(INDEX_SERVICE).await.unwrap().is_empty());
    }
}

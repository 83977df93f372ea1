use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::core::error::{Error, Result};
use crate::hub::{CoordStore, LeaseId, MemStore};

/// Wire bodies shared by the daemon and `RemoteStore`.
pub mod api {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct GrantRequest {
        pub ttl_ms: u64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct GrantResponse {
        pub lease: u64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct KeepAliveRequest {
        pub lease: u64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct PutRequest {
        pub key: String,
        pub lease: u64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct DeleteRequest {
        pub key: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct PrefixQuery {
        pub prefix: String,
        #[serde(default)]
        pub since: u64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ListResponse {
        pub keys: Vec<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct WatchResponse {
        pub revision: u64,
    }
}

/// Single-node coordination daemon: the embedded store behind a small
/// HTTP API so shards and coordinators in other processes can share it.
pub struct HubServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

type HubState = State<Arc<MemStore>>;
type Reply<T> = std::result::Result<Json<T>, (StatusCode, String)>;

fn fail(e: Error) -> (StatusCode, String) {
    match e {
        Error::LeaseLost(_) => (StatusCode::NOT_FOUND, e.to_string()),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

async fn grant(State(store): HubState, Json(req): Json<api::GrantRequest>) -> Reply<api::GrantResponse> {
    let lease = store
        .grant(Duration::from_millis(req.ttl_ms))
        .await
        .map_err(fail)?;
    Ok(Json(api::GrantResponse { lease: lease.0 }))
}

async fn keep_alive(
    State(store): HubState,
    Json(req): Json<api::KeepAliveRequest>,
) -> Reply<api::WatchResponse> {
    store.keep_alive(LeaseId(req.lease)).await.map_err(fail)?;
    Ok(Json(api::WatchResponse {
        revision: store.revision(),
    }))
}

async fn put(State(store): HubState, Json(req): Json<api::PutRequest>) -> Reply<api::WatchResponse> {
    store.put(req.key, LeaseId(req.lease)).await.map_err(fail)?;
    Ok(Json(api::WatchResponse {
        revision: store.revision(),
    }))
}

async fn delete(
    State(store): HubState,
    Json(req): Json<api::DeleteRequest>,
) -> Reply<api::WatchResponse> {
    store.delete(req.key).await.map_err(fail)?;
    Ok(Json(api::WatchResponse {
        revision: store.revision(),
    }))
}

async fn list(State(store): HubState, Query(q): Query<api::PrefixQuery>) -> Reply<api::ListResponse> {
    let keys = store.list_prefix(q.prefix).await.map_err(fail)?;
    Ok(Json(api::ListResponse { keys }))
}

/// Long-poll: answers once the revision moves past `since` or the store's
/// watch window lapses.
async fn watch(State(store): HubState, Query(q): Query<api::PrefixQuery>) -> Reply<api::WatchResponse> {
    let revision = store.wait_change(q.prefix, q.since).await.map_err(fail)?;
    Ok(Json(api::WatchResponse { revision }))
}

pub fn router(store: Arc<MemStore>) -> Router {
    Router::new()
        .route("/grant", post(grant))
        .route("/keepalive", post(keep_alive))
        .route("/put", post(put))
        .route("/delete", post(delete))
        .route("/list", get(list))
        .route("/watch", get(watch))
        .with_state(store)
}

impl HubServer {
    pub async fn start(store: Arc<MemStore>, port: u16) -> Result<Self> {
        if port <= 1024 {
            return Err(Error::InvalidPort(port));
        }
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Self::serve(store, listener).await
    }

    pub async fn serve(store: Arc<MemStore>, listener: TcpListener) -> Result<Self> {
        let addr = listener.local_addr()?;
        let (shutdown, mut rx) = watch::channel(false);
        let app = router(store);
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = rx.changed().await;
            });
            if let Err(e) = served.await {
                tracing::error!(error = %e, "hub server stopped");
            }
        });
        info!(%addr, "hub server listening");
        Ok(HubServer {
            addr,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

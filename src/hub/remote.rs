use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::error::{Error, Result};
use crate::hub::server::api;
use crate::hub::{CoordStore, LeaseId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Above the daemon's watch window so long-polls return, not time out.
const WATCH_TIMEOUT: Duration = Duration::from_secs(40);

/// `CoordStore` over a hub daemon's HTTP API. Endpoints are tried in
/// order per call, so a cluster can list a fallback daemon.
pub struct RemoteStore {
    endpoints: Vec<String>,
    http: reqwest::Client,
}

impl RemoteStore {
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::NoEndpoints("coordination store".to_string()));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::rpc("hub", e))?;
        Ok(RemoteStore { endpoints, http })
    }

    fn urls<'a>(&'a self, path: &'a str) -> impl Iterator<Item = String> + 'a {
        self.endpoints
            .iter()
            .map(move |ep| format!("http://{}{}", ep.trim_end_matches('/'), path))
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let mut last = Error::NoEndpoints("coordination store".to_string());
        for url in self.urls(path) {
            match self.http.post(&url).json(body).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    // The daemon reports a dead lease this way.
                    return Err(Error::LeaseLost(0));
                }
                Ok(resp) if resp.status().is_success() => {
                    return resp.json().await.map_err(|e| Error::rpc(&url, e));
                }
                Ok(resp) => last = Error::rpc(&url, format!("status {}", resp.status())),
                Err(e) => last = Error::rpc(&url, e),
            }
        }
        Err(last)
    }

    async fn get<Resp: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Resp> {
        let mut last = Error::NoEndpoints("coordination store".to_string());
        for url in self.urls(path) {
            let sent = self
                .http
                .get(&url)
                .query(query)
                .timeout(timeout)
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json().await.map_err(|e| Error::rpc(&url, e));
                }
                Ok(resp) => last = Error::rpc(&url, format!("status {}", resp.status())),
                Err(e) => last = Error::rpc(&url, e),
            }
        }
        Err(last)
    }
}

impl CoordStore for RemoteStore {
    async fn grant(&self, ttl: Duration) -> Result<LeaseId> {
        let resp: api::GrantResponse = self
            .post(
                "/grant",
                &api::GrantRequest {
                    ttl_ms: ttl.as_millis() as u64,
                },
            )
            .await?;
        Ok(LeaseId(resp.lease))
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<()> {
        match self
            .post::<_, api::WatchResponse>("/keepalive", &api::KeepAliveRequest { lease: lease.0 })
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::LeaseLost(_)) => Err(Error::LeaseLost(lease.0)),
            Err(e) => Err(e),
        }
    }

    async fn put(&self, key: String, lease: LeaseId) -> Result<()> {
        match self
            .post::<_, api::WatchResponse>(
                "/put",
                &api::PutRequest {
                    key,
                    lease: lease.0,
                },
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::LeaseLost(_)) => Err(Error::LeaseLost(lease.0)),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: String) -> Result<()> {
        self.post::<_, api::WatchResponse>("/delete", &api::DeleteRequest { key })
            .await?;
        Ok(())
    }

    async fn list_prefix(&self, prefix: String) -> Result<Vec<String>> {
        let resp: api::ListResponse = self
            .get("/list", &[("prefix", prefix)], REQUEST_TIMEOUT)
            .await?;
        Ok(resp.keys)
    }

    async fn wait_change(&self, prefix: String, since: u64) -> Result<u64> {
        let resp: api::WatchResponse = self
            .get(
                "/watch",
                &[("prefix", prefix), ("since", since.to_string())],
                WATCH_TIMEOUT,
            )
            .await?;
        Ok(resp.revision)
    }
}

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::error::{Error, Result};
use crate::core::types::Document;
use crate::rpc::wire::{
    self, AffectedCount, CountRequest, DocId, Envelope, SearchRequest, SearchResult,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one shard's RPC surface. Cheap to clone; the underlying
/// connection pool is shared between clones.
#[derive(Clone)]
pub struct IndexClient {
    endpoint: String,
    http: reqwest::Client,
}

impl IndexClient {
    pub fn connect(endpoint: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::rpc(endpoint, e))?;
        Ok(IndexClient {
            endpoint: endpoint.to_string(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp> {
        let url = format!("http://{}{}", self.endpoint, path);
        let body = wire::encode(request)?;
        let response = self
            .http
            .post(&url)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::rpc(&self.endpoint, e))?;
        if !response.status().is_success() {
            return Err(Error::rpc(
                &self.endpoint,
                format!("status {}", response.status()),
            ));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::rpc(&self.endpoint, e))?;
        let envelope: Envelope<Resp> = wire::decode(&bytes)?;
        envelope.map_err(|message| Error::rpc(&self.endpoint, message))
    }

    pub async fn add_doc(&self, doc: &Document) -> Result<u32> {
        let affected: AffectedCount = self.call(wire::ADD_DOC_PATH, doc).await?;
        Ok(affected.count)
    }

    pub async fn delete_doc(&self, doc_id: &str) -> Result<u32> {
        let affected: AffectedCount = self
            .call(
                wire::DELETE_DOC_PATH,
                &DocId {
                    doc_id: doc_id.to_string(),
                },
            )
            .await?;
        Ok(affected.count)
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<Document>> {
        let result: SearchResult = self.call(wire::SEARCH_PATH, request).await?;
        Ok(result.results)
    }

    pub async fn count(&self) -> Result<u32> {
        let affected: AffectedCount = self.call(wire::COUNT_PATH, &CountRequest {}).await?;
        Ok(affected.count)
    }
}

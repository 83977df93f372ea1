use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::types::Document;
use crate::query::TermQuery;

pub const ADD_DOC_PATH: &str = "/add_doc";
pub const DELETE_DOC_PATH: &str = "/delete_doc";
pub const SEARCH_PATH: &str = "/search";
pub const COUNT_PATH: &str = "/count";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocId {
    pub doc_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AffectedCount {
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: TermQuery,
    pub on_flag: u64,
    pub off_flag: u64,
    pub or_flags: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub results: Vec<Document>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CountRequest {}

/// Every RPC answers with its payload or an error message; transport
/// errors aside, a shard never fails a request without this envelope.
pub type Envelope<T> = std::result::Result<T, String>;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Encode(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Decode(e.to_string()))
}

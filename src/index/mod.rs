use std::future::Future;

use crate::core::error::Result;
use crate::core::types::Document;
use crate::query::TermQuery;

pub mod builder;
pub mod forward;
pub mod indexer;
pub mod inverted;
pub mod posting;

pub use indexer::Indexer;
pub use inverted::{filter_by_bits, InvertedIndex};

/// The indexing surface the search facade talks to, implemented by the
/// local shard indexer and by the distributed Sentinel.
pub trait IndexService: Send + Sync {
    fn add_doc(&self, doc: Document) -> impl Future<Output = Result<u32>> + Send;
    fn update_doc(&self, doc: Document) -> impl Future<Output = Result<u32>> + Send;
    fn delete_doc(&self, id: String) -> impl Future<Output = Result<u32>> + Send;
    fn search(
        &self,
        query: TermQuery,
        on_flag: u64,
        off_flag: u64,
        or_flags: Vec<u64>,
    ) -> impl Future<Output = Result<Vec<Document>>> + Send;
    fn count(&self) -> impl Future<Output = Result<u64>> + Send;
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

impl IndexService for Indexer {
    async fn add_doc(&self, doc: Document) -> Result<u32> {
        Indexer::add_doc(self, doc)
    }

    async fn update_doc(&self, doc: Document) -> Result<u32> {
        Indexer::update_doc(self, doc)
    }

    async fn delete_doc(&self, id: String) -> Result<u32> {
        Indexer::delete_doc(self, &id)
    }

    async fn search(
        &self,
        query: TermQuery,
        on_flag: u64,
        off_flag: u64,
        or_flags: Vec<u64>,
    ) -> Result<Vec<Document>> {
        Indexer::search(self, &query, on_flag, off_flag, &or_flags)
    }

    async fn count(&self) -> Result<u64> {
        Indexer::count(self)
    }

    async fn close(&self) -> Result<()> {
        Indexer::close(self)
    }
}

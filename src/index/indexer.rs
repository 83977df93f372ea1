use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use crate::core::config::ShardConfig;
use crate::core::error::Result;
use crate::core::types::Document;
use crate::index::forward::ForwardIndex;
use crate::index::inverted::InvertedIndex;
use crate::kv;
use crate::query::TermQuery;

/// One shard: forward + inverted index plus the ordinal counter that
/// orders every insertion within it.
pub struct Indexer {
    forward: ForwardIndex,
    inverted: InvertedIndex,
    max_ordinal: AtomicU64,
}

impl Indexer {
    pub fn open(config: &ShardConfig) -> Result<Self> {
        let db = kv::open(config.kv_kind, &config.shard_path())?;
        Ok(Indexer {
            forward: ForwardIndex::new(db),
            inverted: InvertedIndex::new(config.doc_estimate),
            max_ordinal: AtomicU64::new(0),
        })
    }

    /// Index a new document. Returns the number of affected documents:
    /// 1, or 0 for a blank id.
    pub fn add_doc(&self, mut doc: Document) -> Result<u32> {
        doc.id = doc.id.trim().to_string();
        if doc.id.is_empty() {
            return Ok(0);
        }
        doc.ordinal = self.max_ordinal.fetch_add(1, Ordering::SeqCst) + 1;
        self.forward.store(&doc)?;
        self.inverted.add(&doc);
        Ok(1)
    }

    /// Remove a document and all its postings. Returns 1 if a forward
    /// entry existed, 0 otherwise; a second delete of the same id is a
    /// no-op.
    pub fn delete_doc(&self, id: &str) -> Result<u32> {
        let Some(doc) = self.forward.load(id)? else {
            return Ok(0);
        };
        for keyword in &doc.keywords {
            self.inverted.delete(doc.ordinal, keyword);
        }
        self.forward.remove(id)?;
        Ok(1)
    }

    /// Delete-then-add under a fresh ordinal.
    pub fn update_doc(&self, doc: Document) -> Result<u32> {
        self.delete_doc(doc.id.trim())?;
        self.add_doc(doc)
    }

    /// Boolean search with bit filtering; documents come back in the
    /// ordinal order of the posting merge. Rows that fail to decode are
    /// dropped.
    pub fn search(
        &self,
        query: &TermQuery,
        on_flag: u64,
        off_flag: u64,
        or_flags: &[u64],
    ) -> Result<Vec<Document>> {
        let ids = self.inverted.search(query, on_flag, off_flag, or_flags);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.forward.load_many(&ids)?;
        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            if row.is_empty() {
                continue;
            }
            match bincode::deserialize::<Document>(&row) {
                Ok(doc) => docs.push(doc),
                Err(e) => debug!(error = %e, "dropping undecodable search hit"),
            }
        }
        Ok(docs)
    }

    pub fn count(&self) -> Result<u64> {
        self.forward.count()
    }

    /// Rebuild the inverted index from the durable forward index and
    /// restore the ordinal high-water mark.
    pub fn load_from_disk(&self) -> Result<u64> {
        let loaded = self.forward.scan(&mut |doc| {
            self.max_ordinal.fetch_max(doc.ordinal, Ordering::SeqCst);
            self.inverted.add(&doc);
        })?;
        info!(loaded, path = %self.forward.path().display(), "rebuilt inverted index from disk");
        Ok(loaded)
    }

    pub fn close(&self) -> Result<()> {
        self.forward.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bits::{ACCESSORIES, MENS_SHOES, STORES};
    use crate::kv::KvKind;
    use tempfile::TempDir;

    fn shard(dir: &TempDir, kind: KvKind) -> Indexer {
        let mut cfg = ShardConfig::new(dir.path().join("shard"));
        cfg.kv_kind = kind;
        cfg.doc_estimate = 64;
        Indexer::open(&cfg).unwrap()
    }

    fn product(id: &str, bits: u64, words: &[&str]) -> Document {
        let mut doc = Document::new(id).with_bits(bits);
        for w in words {
            doc = doc.with_keyword("content", w);
        }
        doc.with_payload(id.as_bytes().to_vec())
    }

    #[test]
    fn add_then_search_with_or_flags() {
        let dir = TempDir::new().unwrap();
        let shard = shard(&dir, KvKind::Tree);
        shard
            .add_doc(product("p1", ACCESSORIES, &["wireless", "mouse"]))
            .unwrap();

        let query = TermQuery::all_of("content", &["wireless", "mouse"]);
        let hits = shard.search(&query, 0, 0, &[ACCESSORIES]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "p1");
        assert_eq!(hits[0].payload, b"p1");

        let miss = TermQuery::all_of("content", &["wireless", "keyboard"]);
        assert!(shard.search(&miss, 0, 0, &[]).unwrap().is_empty());
    }

    #[test]
    fn blank_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let shard = shard(&dir, KvKind::Tree);
        assert_eq!(shard.add_doc(Document::new("   ")).unwrap(), 0);
        assert_eq!(shard.count().unwrap(), 0);
    }

    #[test]
    fn delete_is_idempotent_and_hides_the_doc() {
        let dir = TempDir::new().unwrap();
        let shard = shard(&dir, KvKind::Log);
        shard.add_doc(product("p1", 0, &["cable"])).unwrap();

        assert_eq!(shard.delete_doc("p1").unwrap(), 1);
        assert_eq!(shard.delete_doc("p1").unwrap(), 0);
        let hits = shard
            .search(&TermQuery::keyword("content", "cable"), 0, 0, &[])
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(shard.count().unwrap(), 0);
    }

    #[test]
    fn update_assigns_a_fresh_ordinal() {
        let dir = TempDir::new().unwrap();
        let shard = shard(&dir, KvKind::Tree);
        shard.add_doc(product("p1", 0, &["mouse"])).unwrap();
        let before = shard
            .search(&TermQuery::keyword("content", "mouse"), 0, 0, &[])
            .unwrap()[0]
            .ordinal;

        shard
            .update_doc(product("p1", 0, &["trackball"]))
            .unwrap();
        let after = shard
            .search(&TermQuery::keyword("content", "trackball"), 0, 0, &[])
            .unwrap()[0]
            .ordinal;
        assert!(after > before);

        // No posting survives under the old keyword.
        let old = shard
            .search(&TermQuery::keyword("content", "mouse"), 0, 0, &[])
            .unwrap();
        assert!(old.is_empty());
    }

    #[test]
    fn off_flag_rejects_on_flag_accepts() {
        let dir = TempDir::new().unwrap();
        let shard = shard(&dir, KvKind::Tree);
        shard
            .add_doc(product("p1", MENS_SHOES | STORES, &["boots"]))
            .unwrap();
        let q = TermQuery::keyword("content", "boots");

        assert!(shard.search(&q, 0, STORES, &[]).unwrap().is_empty());
        assert_eq!(shard.search(&q, MENS_SHOES, 0, &[]).unwrap().len(), 1);
    }

    #[test]
    fn load_from_disk_restores_postings_and_ordinals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shard");
        {
            let mut cfg = ShardConfig::new(&path);
            cfg.kv_kind = KvKind::Log;
            let shard = Indexer::open(&cfg).unwrap();
            shard.add_doc(product("p1", 0, &["alpha"])).unwrap();
            shard.add_doc(product("p2", 0, &["alpha", "beta"])).unwrap();
            shard.close().unwrap();
        }

        let mut cfg = ShardConfig::new(&path);
        cfg.kv_kind = KvKind::Log;
        let shard = Indexer::open(&cfg).unwrap();
        assert_eq!(shard.load_from_disk().unwrap(), 2);

        let hits = shard
            .search(&TermQuery::keyword("content", "alpha"), 0, 0, &[])
            .unwrap();
        assert_eq!(hits.len(), 2);

        // New inserts continue above the recovered high-water mark.
        shard.add_doc(product("p3", 0, &["gamma"])).unwrap();
        let p3 = shard
            .search(&TermQuery::keyword("content", "gamma"), 0, 0, &[])
            .unwrap()[0]
            .ordinal;
        assert!(p3 > hits[1].ordinal);
    }
}

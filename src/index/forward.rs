use tracing::warn;

use crate::core::error::Result;
use crate::core::types::Document;
use crate::kv::KvStore;

/// Document id -> encoded document, over whichever embedded store the
/// shard was opened with.
pub struct ForwardIndex {
    db: Box<dyn KvStore>,
}

impl ForwardIndex {
    pub fn new(db: Box<dyn KvStore>) -> Self {
        ForwardIndex { db }
    }

    pub fn store(&self, doc: &Document) -> Result<()> {
        let bytes = bincode::serialize(doc)
            .map_err(|e| crate::core::error::Error::Encode(e.to_string()))?;
        self.db.set(doc.id.as_bytes(), &bytes)
    }

    /// `None` when the id has no entry.
    pub fn load(&self, id: &str) -> Result<Option<Document>> {
        let bytes = self.db.get(id.as_bytes())?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bincode::deserialize(&bytes)?))
    }

    /// Raw payloads for many ids at once, empty bytes for misses, in the
    /// order requested.
    pub fn load_many(&self, ids: &[String]) -> Result<Vec<Vec<u8>>> {
        let keys: Vec<Vec<u8>> = ids.iter().map(|id| id.as_bytes().to_vec()).collect();
        self.db.batch_get(&keys)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        self.db.delete(id.as_bytes())
    }

    pub fn has(&self, id: &str) -> Result<bool> {
        self.db.has(id.as_bytes())
    }

    /// Stream every stored document. Entries that no longer decode are
    /// skipped with a warning; startup recovery should not die on one
    /// bad row.
    pub fn scan(&self, visit: &mut dyn FnMut(Document)) -> Result<u64> {
        self.db.iter_all(&mut |key, value| {
            match bincode::deserialize::<Document>(value) {
                Ok(doc) => {
                    visit(doc);
                    Ok(())
                }
                Err(e) => {
                    warn!(
                        key = %String::from_utf8_lossy(key),
                        error = %e,
                        "skipping undecodable forward entry"
                    );
                    Err(e.into())
                }
            }
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.db.iter_keys(&mut |_| Ok(()))
    }

    pub fn path(&self) -> &std::path::Path {
        self.db.path()
    }

    pub fn close(&self) -> Result<()> {
        self.db.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{self, KvKind};
    use tempfile::TempDir;

    fn forward(dir: &TempDir, kind: KvKind) -> ForwardIndex {
        ForwardIndex::new(kv::open(kind, &dir.path().join("fwd")).unwrap())
    }

    #[test]
    fn store_load_remove() {
        let dir = TempDir::new().unwrap();
        let fwd = forward(&dir, KvKind::Tree);
        let mut doc = Document::new("p1").with_keyword("content", "mouse");
        doc.ordinal = 42;
        fwd.store(&doc).unwrap();

        let back = fwd.load("p1").unwrap().unwrap();
        assert_eq!(back.ordinal, 42);
        assert!(fwd.load("p2").unwrap().is_none());

        fwd.remove("p1").unwrap();
        assert!(fwd.load("p1").unwrap().is_none());
    }

    #[test]
    fn scan_visits_everything_and_skips_junk() {
        let dir = TempDir::new().unwrap();
        let db = kv::open(KvKind::Log, &dir.path().join("fwd")).unwrap();
        db.set(b"junk", b"\xff\xff\xfe").unwrap();
        let fwd = ForwardIndex::new(db);
        for i in 0..5 {
            let mut doc = Document::new(format!("doc{i}"));
            doc.ordinal = i;
            fwd.store(&doc).unwrap();
        }

        let mut seen = Vec::new();
        let visited = fwd.scan(&mut |doc| seen.push(doc.id)).unwrap();
        assert_eq!(seen.len(), 5);
        assert_eq!(visited, 5);
        // The junk row is counted by the raw key iteration only.
        assert_eq!(fwd.count().unwrap(), 6);
    }
}

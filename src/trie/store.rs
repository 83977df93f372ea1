use std::path::Path;

use tracing::info;

use crate::core::error::{Error, Result};
use crate::kv::{self, KvKind, KvStore};
use crate::trie::Trie;

const TRIE_BUCKET: &str = "trie";
const TRIE_KEY: &[u8] = b"trie";

/// Persists the whole trie as one JSON blob under bucket `trie`,
/// key `trie`. The tree is written once at the end of an index build and
/// rehydrated top-down, so a single entry is enough.
pub struct TrieStore {
    db: Box<dyn KvStore>,
}

impl TrieStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = kv::open(KvKind::Tree, path)?;
        db.set_bucket(TRIE_BUCKET)?;
        Ok(TrieStore { db })
    }

    /// Use an already opened store (tests, shared files).
    pub fn with_store(db: Box<dyn KvStore>) -> Result<Self> {
        db.set_bucket(TRIE_BUCKET)?;
        Ok(TrieStore { db })
    }

    pub fn store(&self, trie: &Trie) -> Result<()> {
        let blob = serde_json::to_vec(trie)
            .map_err(|e| Error::Encode(format!("trie encode failed: {e}")))?;
        self.db.set(TRIE_KEY, &blob)?;
        info!(bytes = blob.len(), "persisted autocomplete trie");
        Ok(())
    }

    /// `None` when nothing was ever stored.
    pub fn load(&self) -> Result<Option<Trie>> {
        let blob = self.db.get(TRIE_KEY)?;
        if blob.is_empty() {
            return Ok(None);
        }
        let trie = serde_json::from_slice(&blob)
            .map_err(|e| Error::Decode(format!("trie decode failed: {e}")))?;
        Ok(Some(trie))
    }

    /// Completion lookup straight off the persisted tree.
    pub fn suggest(&self, prefix: &str) -> Result<Vec<String>> {
        match self.load()? {
            Some(trie) => Ok(trie.find_all_by_prefix(prefix)),
            None => Ok(Vec::new()),
        }
    }

    pub fn close(&self) -> Result<()> {
        self.db.close()
    }
}

use std::path::PathBuf;
use std::time::Duration;

use crate::kv::KvKind;

/// Per-shard indexer configuration.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Forward-index store location. Distributed shards append `_part<i>`.
    pub db_path: PathBuf,
    pub kv_kind: KvKind,
    /// Rough document count, used to size the keyword table segments.
    pub doc_estimate: usize,
    pub total_workers: u32,
    pub worker_index: u32,
}

impl ShardConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        ShardConfig {
            db_path: db_path.into(),
            kv_kind: KvKind::Tree,
            doc_estimate: 50_000,
            total_workers: 0,
            worker_index: 0,
        }
    }

    /// The store path owned by this worker.
    pub fn shard_path(&self) -> PathBuf {
        if self.total_workers > 0 {
            let mut name = self.db_path.as_os_str().to_os_string();
            name.push(format!("_part{}", self.worker_index));
            PathBuf::from(name)
        } else {
            self.db_path.clone()
        }
    }
}

/// Registry client configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Lease TTL; the shard heartbeat re-extends every `heartbeat - 100ms`.
    pub heartbeat: Duration,
    /// Registry lookups allowed per second through the proxy.
    pub qps: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            heartbeat: Duration::from_secs(3),
            qps: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_path_gets_part_suffix_only_when_distributed() {
        let mut cfg = ShardConfig::new("/tmp/products");
        assert_eq!(cfg.shard_path(), PathBuf::from("/tmp/products"));

        cfg.total_workers = 2;
        cfg.worker_index = 1;
        assert_eq!(cfg.shard_path(), PathBuf::from("/tmp/products_part1"));
    }
}

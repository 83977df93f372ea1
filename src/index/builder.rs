use rayon::prelude::*;
use tracing::info;

use crate::core::bits::class_bits;
use crate::core::error::Result;
use crate::core::types::{Document, Product};
use crate::index::indexer::Indexer;
use crate::trie::Trie;

/// Stable shard assignment: which worker owns `id`. crc32 keeps the
/// mapping identical across processes and reruns.
pub fn shard_of(id: &str, total_workers: u32) -> u32 {
    crc32fast::hash(id.as_bytes()) % total_workers
}

/// Whether this worker ingests `id`. With no sharding configured every
/// worker takes everything.
pub fn accepts(id: &str, total_workers: u32, worker_index: u32) -> bool {
    total_workers == 0 || shard_of(id, total_workers) == worker_index
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub indexed: u64,
    pub skipped: u64,
}

/// Turn a product record into its indexable document: the payload is the
/// encoded record, keywords come from the injected tokenizer, and the
/// bits summarize the category (plus any keyword that names a category).
pub fn product_to_doc(
    product: &Product,
    tokenize: &(impl Fn(&str) -> Vec<String> + Sync),
) -> Result<Document> {
    let payload = bincode::serialize(product)
        .map_err(|e| crate::core::error::Error::Encode(e.to_string()))?;
    let mut doc = Document::new(product.id.clone()).with_payload(payload);
    let words: Vec<String> = tokenize(&product.name)
        .into_iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    for word in &words {
        doc = doc.with_keyword("content", word);
    }
    doc.bits_feature =
        class_bits(std::slice::from_ref(&product.category)) | class_bits(&words);
    Ok(doc)
}

/// Bulk-build one shard from a record stream. Records hashed to other
/// workers are skipped, accepted titles feed the autocomplete trie, and
/// the documents are indexed in parallel. Deterministic for a fixed
/// record stream and worker count.
pub fn build_index(
    products: impl IntoIterator<Item = Product>,
    tokenize: &(impl Fn(&str) -> Vec<String> + Sync),
    indexer: &Indexer,
    total_workers: u32,
    worker_index: u32,
    trie: &mut Trie,
) -> Result<BuildStats> {
    let mut stats = BuildStats::default();
    let mut accepted = Vec::new();
    for product in products {
        if !accepts(&product.id, total_workers, worker_index) {
            stats.skipped += 1;
            continue;
        }
        trie.insert(&product.name);
        accepted.push(product);
    }

    let affected: u32 = accepted
        .par_iter()
        .map(|product| {
            let doc = product_to_doc(product, tokenize)?;
            indexer.add_doc(doc)
        })
        .try_reduce(|| 0, |a, b| Ok(a + b))?;
    stats.indexed = affected as u64;

    info!(
        indexed = stats.indexed,
        skipped = stats.skipped,
        worker_index,
        total_workers,
        "bulk build finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ShardConfig;
    use crate::query::TermQuery;
    use tempfile::TempDir;

    fn tokenize(text: &str) -> Vec<String> {
        text.split_whitespace().map(|w| w.to_string()).collect()
    }

    fn products() -> Vec<Product> {
        (0..4)
            .map(|i| Product {
                id: format!("00000000-0000-0000-0000-00000000000{i}"),
                name: format!("Wireless Mouse {i}"),
                category: "Accessories".to_string(),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn sharding_is_a_disjoint_partition() {
        let ids: Vec<String> = products().into_iter().map(|p| p.id).collect();
        let shard0: Vec<&String> = ids.iter().filter(|id| accepts(id, 2, 0)).collect();
        let shard1: Vec<&String> = ids.iter().filter(|id| accepts(id, 2, 1)).collect();
        assert_eq!(shard0.len() + shard1.len(), ids.len());
        for id in &shard0 {
            assert!(!shard1.contains(id));
        }
        // Re-hashing produces the same split.
        let again: Vec<&String> = ids.iter().filter(|id| accepts(id, 2, 0)).collect();
        assert_eq!(shard0, again);
    }

    #[test]
    fn build_indexes_only_this_workers_share() {
        let dir = TempDir::new().unwrap();
        let indexer = Indexer::open(&ShardConfig::new(dir.path().join("s0"))).unwrap();
        let mut trie = Trie::new();
        let stats =
            build_index(products(), &tokenize, &indexer, 2, 0, &mut trie).unwrap();

        let own: u64 = products()
            .iter()
            .filter(|p| accepts(&p.id, 2, 0))
            .count() as u64;
        assert_eq!(stats.indexed, own);
        assert_eq!(stats.skipped, 4 - own);
        assert_eq!(indexer.count().unwrap(), own);
    }

    #[test]
    fn built_documents_are_searchable_with_class_bits() {
        let dir = TempDir::new().unwrap();
        let indexer = Indexer::open(&ShardConfig::new(dir.path().join("s"))).unwrap();
        let mut trie = Trie::new();
        build_index(products(), &tokenize, &indexer, 0, 0, &mut trie).unwrap();

        let hits = indexer
            .search(
                &TermQuery::all_of("content", &["wireless", "mouse"]),
                0,
                0,
                &[crate::core::bits::ACCESSORIES],
            )
            .unwrap();
        assert_eq!(hits.len(), 4);
        assert!(!trie.find_all_by_prefix("wireless").is_empty());
    }
}

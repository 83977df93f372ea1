use std::sync::Arc;

use parking_lot::RwLock;

use crate::concurrent::map::SegmentedMap;
use crate::core::types::{Document, Keyword};
use crate::index::posting::{PostingEntry, PostingList};
use crate::query::TermQuery;

/// Per-document bitmask filter: every `on` bit required, every `off` bit
/// forbidden, and for each non-zero mask in `or_flags` at least one bit
/// present.
pub fn filter_by_bits(bits: u64, on_flag: u64, off_flag: u64, or_flags: &[u64]) -> bool {
    if bits & on_flag != on_flag {
        return false;
    }
    if bits & off_flag != 0 {
        return false;
    }
    for &or_flag in or_flags {
        if or_flag != 0 && bits & or_flag == 0 {
            return false;
        }
    }
    true
}

/// Keyword -> posting list table with boolean search.
///
/// The table is segmented so growth only stalls one segment; each posting
/// list carries its own R/W lock so mutations of the same keyword
/// serialize against each other and against readers, wherever the list
/// happens to be stored.
pub struct InvertedIndex {
    table: SegmentedMap<Arc<RwLock<PostingList>>>,
}

impl InvertedIndex {
    pub fn new(doc_estimate: usize) -> Self {
        InvertedIndex {
            table: SegmentedMap::with_parallelism(doc_estimate),
        }
    }

    /// Insert one posting per keyword of `doc`. The document must already
    /// carry its ordinal.
    pub fn add(&self, doc: &Document) {
        for keyword in &doc.keywords {
            let list = self
                .table
                .get_or_insert_with(&keyword.to_key(), || {
                    Arc::new(RwLock::new(PostingList::new()))
                });
            list.write().insert(
                doc.ordinal,
                PostingEntry {
                    id: doc.id.clone(),
                    bits_feature: doc.bits_feature,
                },
            );
        }
    }

    /// Drop the posting `ordinal` under `keyword`. Lists are kept once
    /// created even when they empty out; vocabulary bounds their count.
    pub fn delete(&self, ordinal: u64, keyword: &Keyword) {
        if let Some(list) = self.table.get(&keyword.to_key()) {
            list.write().remove(ordinal);
        }
    }

    /// Distinct keywords currently known to the table.
    pub fn keyword_count(&self) -> usize {
        self.table.len()
    }

    /// Evaluate `query`, returning matching document ids in ascending
    /// ordinal order.
    pub fn search(
        &self,
        query: &TermQuery,
        on_flag: u64,
        off_flag: u64,
        or_flags: &[u64],
    ) -> Vec<String> {
        self.eval(query, on_flag, off_flag, or_flags).ids()
    }

    fn eval(
        &self,
        query: &TermQuery,
        on_flag: u64,
        off_flag: u64,
        or_flags: &[u64],
    ) -> PostingList {
        match query {
            TermQuery::Keyword(keyword) => {
                let mut result = PostingList::new();
                if let Some(list) = self.table.get(&keyword.to_key()) {
                    let guard = list.read();
                    for (ordinal, entry) in guard.iter() {
                        if filter_by_bits(entry.bits_feature, on_flag, off_flag, or_flags) {
                            result.insert(ordinal, entry.clone());
                        }
                    }
                }
                result
            }
            TermQuery::Must(children) => {
                if children.is_empty() {
                    return PostingList::new();
                }
                let lists = children
                    .iter()
                    .map(|c| self.eval(c, on_flag, off_flag, or_flags))
                    .collect();
                PostingList::intersect(lists)
            }
            TermQuery::Should(children) => {
                if children.is_empty() {
                    return PostingList::new();
                }
                let lists = children
                    .iter()
                    .map(|c| self.eval(c, on_flag, off_flag, or_flags))
                    .collect();
                PostingList::union(lists)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bits::{ACCESSORIES, MENS_SHOES, STORES};

    fn doc(id: &str, ordinal: u64, bits: u64, words: &[&str]) -> Document {
        let mut d = Document::new(id).with_bits(bits);
        d.ordinal = ordinal;
        for w in words {
            d = d.with_keyword("content", w);
        }
        d
    }

    fn index_with_fixtures() -> InvertedIndex {
        let index = InvertedIndex::new(16);
        index.add(&doc("d1", 1, ACCESSORIES, &["wireless", "mouse"]));
        index.add(&doc("d2", 2, ACCESSORIES, &["wireless", "keyboard"]));
        index.add(&doc("d3", 3, STORES, &["usb", "cable"]));
        index.add(&doc("d4", 4, STORES, &["hdmi", "cable"]));
        index
    }

    #[test]
    fn filter_by_bits_laws() {
        let bits = MENS_SHOES | STORES;
        assert!(filter_by_bits(bits, MENS_SHOES, 0, &[]));
        assert!(!filter_by_bits(bits, ACCESSORIES, 0, &[]));
        assert!(!filter_by_bits(bits, 0, STORES, &[]));
        assert!(filter_by_bits(bits, 0, ACCESSORIES, &[]));
        assert!(filter_by_bits(bits, 0, 0, &[STORES | ACCESSORIES]));
        assert!(!filter_by_bits(bits, 0, 0, &[ACCESSORIES]));
        // Zero masks in or_flags are skipped, not required.
        assert!(filter_by_bits(bits, 0, 0, &[0, MENS_SHOES]));
    }

    #[test]
    fn must_is_boolean_and() {
        let index = index_with_fixtures();
        let hits = index.search(
            &TermQuery::all_of("content", &["wireless", "mouse"]),
            0,
            0,
            &[],
        );
        assert_eq!(hits, vec!["d1".to_string()]);

        let none = index.search(
            &TermQuery::all_of("content", &["wireless", "cable"]),
            0,
            0,
            &[],
        );
        assert!(none.is_empty());
    }

    #[test]
    fn should_is_boolean_or() {
        let index = index_with_fixtures();
        let mut hits = index.search(
            &TermQuery::any_of("content", &["cable", "absent-term"]),
            0,
            0,
            &[],
        );
        hits.sort();
        assert_eq!(hits, vec!["d3".to_string(), "d4".to_string()]);
    }

    #[test]
    fn results_come_back_in_ordinal_order() {
        let index = index_with_fixtures();
        let hits = index.search(&TermQuery::keyword("content", "cable"), 0, 0, &[]);
        assert_eq!(hits, vec!["d3".to_string(), "d4".to_string()]);
    }

    #[test]
    fn bit_filter_applies_at_the_leaves() {
        let index = index_with_fixtures();
        let hits = index.search(
            &TermQuery::keyword("content", "wireless"),
            0,
            0,
            &[ACCESSORIES],
        );
        assert_eq!(hits.len(), 2);

        let none = index.search(
            &TermQuery::keyword("content", "wireless"),
            0,
            ACCESSORIES,
            &[],
        );
        assert!(none.is_empty());
    }

    #[test]
    fn empty_and_illformed_queries_return_nothing() {
        let index = index_with_fixtures();
        assert!(index.search(&TermQuery::Must(vec![]), 0, 0, &[]).is_empty());
        assert!(index.search(&TermQuery::Should(vec![]), 0, 0, &[]).is_empty());

        // A child with no postings empties the whole MUST.
        let q = TermQuery::keyword("content", "wireless")
            .and(TermQuery::keyword("content", "no-such-word"));
        assert!(index.search(&q, 0, 0, &[]).is_empty());
    }

    #[test]
    fn delete_removes_the_posting() {
        let index = index_with_fixtures();
        index.delete(1, &Keyword::new("content", "mouse"));
        let hits = index.search(&TermQuery::keyword("content", "mouse"), 0, 0, &[]);
        assert!(hits.is_empty());
        // Sibling keyword untouched.
        let hits = index.search(&TermQuery::keyword("content", "wireless"), 0, 0, &[]);
        assert_eq!(hits.len(), 2);
    }
}

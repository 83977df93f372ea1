use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What a keyword knows about one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingEntry {
    pub id: String,
    pub bits_feature: u64,
}

/// Ordered set of postings for one keyword, keyed by shard ordinal.
///
/// Iteration is strictly ascending by ordinal; that contract is what the
/// boolean merges below rely on. Backed by a B-tree, which gives the same
/// ordered-insert/delete/walk surface as the skip list it replaces.
#[derive(Debug, Clone, Default)]
pub struct PostingList {
    entries: BTreeMap<u64, PostingEntry>,
}

impl PostingList {
    pub fn new() -> Self {
        PostingList::default()
    }

    pub fn insert(&mut self, ordinal: u64, entry: PostingEntry) {
        self.entries.insert(ordinal, entry);
    }

    pub fn remove(&mut self, ordinal: u64) -> Option<PostingEntry> {
        self.entries.remove(&ordinal)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ascending walk over `(ordinal, entry)`.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &PostingEntry)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.values().map(|e| e.id.clone()).collect()
    }

    /// N-way merge intersection. Each cursor chases the maximum ordinal
    /// currently in view; an ordinal is emitted only when every list sits
    /// on it. Any exhausted cursor ends the merge.
    pub fn intersect(lists: Vec<PostingList>) -> PostingList {
        if lists.is_empty() {
            return PostingList::new();
        }
        if lists.len() == 1 {
            return lists.into_iter().next().unwrap_or_default();
        }
        if lists.iter().any(|l| l.is_empty()) {
            return PostingList::new();
        }

        let mut result = PostingList::new();
        let mut cursors: Vec<_> = lists.iter().map(|l| l.entries.iter().peekable()).collect();
        loop {
            let mut max_ordinal = 0u64;
            for cursor in cursors.iter_mut() {
                match cursor.peek() {
                    Some((ordinal, _)) => max_ordinal = max_ordinal.max(**ordinal),
                    None => return result,
                }
            }

            let aligned = cursors
                .iter_mut()
                .all(|c| matches!(c.peek(), Some((o, _)) if **o == max_ordinal));
            if aligned {
                if let Some((ordinal, entry)) = cursors[0].next() {
                    result.insert(*ordinal, entry.clone());
                }
                for cursor in cursors.iter_mut().skip(1) {
                    cursor.next();
                }
            } else {
                for cursor in cursors.iter_mut() {
                    if matches!(cursor.peek(), Some((o, _)) if **o < max_ordinal) {
                        cursor.next();
                    }
                }
            }
        }
    }

    /// Union by concatenation; for an ordinal present in several lists the
    /// later entry wins, which is fine because entries for the same
    /// ordinal are identical across lists.
    pub fn union(lists: Vec<PostingList>) -> PostingList {
        let mut result = PostingList::new();
        for list in lists {
            for (ordinal, entry) in list.entries {
                result.entries.insert(ordinal, entry);
            }
        }
        result
    }
}

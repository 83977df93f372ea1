use std::collections::HashMap;

use parking_lot::RwLock;

/// Hash map sharded into independently locked segments.
///
/// Readers of one segment never contend with writers of another, which is
/// what the keyword table needs: table growth takes one segment's write
/// lock, lookups elsewhere keep flowing.
pub struct SegmentedMap<V> {
    segments: Vec<RwLock<HashMap<String, V>>>,
}

impl<V: Clone> SegmentedMap<V> {
    pub fn new(segments: usize, capacity: usize) -> Self {
        let segments = segments.max(1);
        let per_segment = capacity / segments;
        SegmentedMap {
            segments: (0..segments)
                .map(|_| RwLock::new(HashMap::with_capacity(per_segment)))
                .collect(),
        }
    }

    /// One segment per logical CPU.
    pub fn with_parallelism(capacity: usize) -> Self {
        Self::new(num_cpus::get(), capacity)
    }

    fn segment_of(&self, key: &str) -> usize {
        crc32fast::hash(key.as_bytes()) as usize % self.segments.len()
    }

    pub fn insert(&self, key: String, value: V) {
        let seg = self.segment_of(&key);
        self.segments[seg].write().insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let seg = self.segment_of(key);
        self.segments[seg].read().get(key).cloned()
    }

    /// Existing value for `key`, or the one produced by `make`, inserted
    /// under the segment's write lock so racing creators agree on a winner.
    pub fn get_or_insert_with(&self, key: &str, make: impl FnOnce() -> V) -> V {
        if let Some(v) = self.get(key) {
            return v;
        }
        let seg = self.segment_of(key);
        let mut guard = self.segments[seg].write();
        guard.entry(key.to_string()).or_insert_with(make).clone()
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let seg = self.segment_of(key);
        self.segments[seg].write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every entry, one segment at a time. Entries inserted while a
    /// later segment is being visited may or may not be seen.
    pub fn for_each(&self, mut f: impl FnMut(&str, &V)) {
        for segment in &self.segments {
            let guard = segment.read();
            for (k, v) in guard.iter() {
                f(k, v);
            }
        }
    }
}

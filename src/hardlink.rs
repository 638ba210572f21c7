//! `(job_id, file_index) -> node` lookup with chain-head semantics.
//!
//! A hash map in memory (built-once, read-many, lock-free); a
//! key-sorted flat array on disk.

use rustc_hash::FxHashMap;

use crate::node::NodeIndex;

#[inline]
pub fn key(job_id: u32, file_index: i32) -> u64 {
    ((job_id as u64) << 32) | (file_index as u32 as u64)
}

#[derive(Debug, Default)]
pub struct HardlinkIndex {
    map: FxHashMap<u64, NodeIndex>,
}

impl HardlinkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new chain-head entry. First-writer-wins: if an entry for
    /// this key already exists we leave it alone.
    pub fn insert_head(&mut self, job_id: u32, file_index: i32, node: NodeIndex) {
        self.map.entry(key(job_id, file_index)).or_insert(node);
    }

    /// Point a member of a chain at its head node.
    pub fn insert_member(&mut self, job_id: u32, file_index: i32, head: NodeIndex) {
        self.map.entry(key(job_id, file_index)).or_insert(head);
    }

    /// Insert using an already-computed key (e.g. translating a builder's
    /// in-progress `(key, BuildRef)` map into the final, node-index-keyed
    /// index after flattening).
    pub fn insert_raw(&mut self, key: u64, node: NodeIndex) {
        self.map.entry(key).or_insert(node);
    }

    pub fn lookup(&self, job_id: u32, file_index: i32) -> Option<NodeIndex> {
        self.map.get(&key(job_id, file_index)).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Flatten to a key-sorted array for serialization.
    pub fn to_sorted_vec(&self) -> Vec<(u64, NodeIndex)> {
        let mut v: Vec<(u64, NodeIndex)> = self.map.iter().map(|(k, n)| (*k, *n)).collect();
        v.sort_unstable_by_key(|(k, _)| *k);
        v
    }

    /// Rebuild from a sorted array, dropping any entries whose node index
    /// is out of range.
    pub fn from_sorted_vec(entries: Vec<(u64, NodeIndex)>, node_count: usize) -> Self {
        let mut map = FxHashMap::default();
        for (k, n) in entries {
            if n.get() < node_count {
                map.insert(k, n);
            } else {
                tracing::warn!(key = k, node = n.get(), "dropping dangling hardlink entry");
            }
        }
        Self { map }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_writer_wins() {
        let mut idx = HardlinkIndex::new();
        idx.insert_head(7, 10, NodeIndex(3));
        idx.insert_member(7, 11, NodeIndex(3));
        assert_eq!(idx.lookup(7, 10), Some(NodeIndex(3)));
        assert_eq!(idx.lookup(7, 11), Some(NodeIndex(3)));
        assert_eq!(idx.lookup(7, 12), None);
    }

    #[test]
    fn sorted_round_trip() {
        let mut idx = HardlinkIndex::new();
        idx.insert_head(1, 5, NodeIndex(2));
        idx.insert_head(3, 1, NodeIndex(9));
        let sorted = idx.to_sorted_vec();
        assert!(sorted.windows(2).all(|w| w[0].0 <= w[1].0));
        let restored = HardlinkIndex::from_sorted_vec(sorted, 10);
        assert_eq!(restored.lookup(1, 5), Some(NodeIndex(2)));
        assert_eq!(restored.lookup(3, 1), Some(NodeIndex(9)));
    }
}

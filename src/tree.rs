//! The built directory tree: the arena of [`Node`]s plus the read and
//! marking operations over it.
//!
//! Read operations (`children`, `subtree`, `find`, `path_to`,
//! `hardlink_lookup`) are safe to call from any number of readers once
//! building has finished; `mark_*` needs single-writer discipline, so we
//! implement it with a plain `&mut self` -- callers that need concurrent
//! marking sessions are expected to serialize through a
//! `RwLock<BuiltTree>`, the same way callers share any other
//! mutable cache behind a narrow, already-built read surface.

use crate::cancel::CancellationFlag;
use crate::counters::{self, Op};
use crate::delta::{DeltaEntry, DeltaPool};
use crate::error::{Error, Result};
use crate::hardlink::HardlinkIndex;
use crate::intern::Interner;
use crate::node::{Node, NodeFlags, NodeIndex, NodeKind};

/// The fully-built tree: a contiguous, pre-order arena of nodes plus its
/// supporting string/delta/hardlink tables.
#[derive(Debug)]
pub struct BuiltTree {
    nodes: Vec<Node>,
    interner: Interner,
    delta_pool: DeltaPool,
    hardlinks: HardlinkIndex,
    count: usize,
}

impl BuiltTree {
    pub(crate) fn from_parts(
        nodes: Vec<Node>,
        interner: Interner,
        delta_pool: DeltaPool,
        hardlinks: HardlinkIndex,
        count: usize,
    ) -> Self {
        Self {
            nodes,
            interner,
            delta_pool,
            hardlinks,
            count,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_raw_parts(
        nodes: Vec<Node>,
        interner: Interner,
        delta_pool: DeltaPool,
        hardlinks: HardlinkIndex,
        count: usize,
    ) -> Self {
        Self::from_parts(nodes, interner, delta_pool, hardlinks, count)
    }

    #[inline]
    pub fn root(&self) -> NodeIndex {
        NodeIndex::ROOT
    }

    #[inline]
    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx.get()]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total number of nodes in the arena.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn name(&self, idx: NodeIndex) -> &[u8] {
        self.interner.get(self.node(idx).name)
    }

    pub fn name_str(&self, idx: NodeIndex) -> &str {
        self.interner.get_str(self.node(idx).name)
    }

    pub fn delta_entries_oldest_first(&self, idx: NodeIndex) -> Vec<DeltaEntry> {
        match self.node(idx).delta_list {
            Some(r) => self.delta_pool.oldest_first(r),
            None => Vec::new(),
        }
    }

    pub fn hardlink_lookup(&self, job_id: u32, file_index: i32) -> Option<NodeIndex> {
        self.hardlinks.lookup(job_id, file_index)
    }

    pub(crate) fn hardlinks(&self) -> &HardlinkIndex {
        &self.hardlinks
    }

    pub(crate) fn interner(&self) -> &Interner {
        &self.interner
    }

    pub(crate) fn delta_pool(&self) -> &DeltaPool {
        &self.delta_pool
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Parent of `idx`, found by walking backward to the nearest
    /// preceding node whose subtree still contains `idx` (root has no
    /// parent and maps to itself). This mirrors the original's
    /// memory-lean design: no per-node parent pointer is kept, since the
    /// on-disk format doesn't reserve room for one either.
    pub fn parent(&self, idx: NodeIndex) -> NodeIndex {
        if idx == NodeIndex::ROOT {
            return NodeIndex::ROOT;
        }
        let mut i = idx.0;
        while i > 0 {
            i -= 1;
            if self.nodes[i as usize].subtree_end.0 > idx.0 {
                return NodeIndex(i);
            }
        }
        NodeIndex::ROOT
    }

    /// Children of `idx`, in insertion order.
    pub fn children(&self, idx: NodeIndex) -> ChildrenIter<'_> {
        let node = self.node(idx);
        ChildrenIter {
            tree: self,
            current: node.first_child,
            end: node.subtree_end,
        }
    }

    pub fn has_children(&self, idx: NodeIndex) -> bool {
        self.node(idx).first_child.is_some()
    }

    /// Pre-order, inclusive subtree of `idx`. O(1) per step:
    /// the arena is already laid out contiguously in pre-order.
    pub fn subtree(&self, idx: NodeIndex) -> SubtreeIter<'_> {
        SubtreeIter {
            _tree: std::marker::PhantomData,
            current: idx.0,
            end: self.node(idx).subtree_end.0,
        }
    }

    /// Resolve `path` relative to `from`. `.`, `..`, and absolute
    /// (leading-separator) paths are honored; a trailing separator
    /// doesn't change the result.
    pub fn find(&self, path: &str, from: NodeIndex, case_sensitive: bool) -> Option<NodeIndex> {
        let starts_absolute = path.starts_with('/') || path.starts_with('\\');
        let mut current = if starts_absolute { self.root() } else { from };

        for seg in path.split(|c| c == '/' || c == '\\') {
            if seg.is_empty() || seg == "." {
                continue;
            }
            if seg == ".." {
                current = self.parent(current);
                continue;
            }
            let found = self.children(current).find(|&c| {
                names_match(self.name_str(c), seg, case_sensitive)
            })?;
            current = found;
        }
        Some(current)
    }

    /// Reconstruct the fully-qualified path to `node` by walking to root.
    /// The root itself contributes no segment.
    pub fn path_to(&self, node: NodeIndex) -> String {
        let mut segments: Vec<&str> = Vec::new();
        let mut current = node;
        while current != NodeIndex::ROOT {
            segments.push(self.name_str(current));
            current = self.parent(current);
        }
        segments.reverse();
        if segments.is_empty() {
            return std::path::MAIN_SEPARATOR.to_string();
        }
        let mut out = String::new();
        for seg in segments {
            out.push(std::path::MAIN_SEPARATOR);
            out.push_str(seg);
        }
        out
    }

    /// `mark_node(n)`: set `extract`; also set `extract_dir`
    /// if `n` is a directory.
    pub fn mark_node(&mut self, idx: NodeIndex) {
        let n = &mut self.nodes[idx.get()];
        n.flags.insert(NodeFlags::EXTRACT);
        if n.kind.is_directory_like() {
            n.flags.insert(NodeFlags::EXTRACT_DIR);
        }
    }

    pub fn unmark_node(&mut self, idx: NodeIndex) {
        let n = &mut self.nodes[idx.get()];
        n.flags.remove(NodeFlags::EXTRACT);
        n.flags.remove(NodeFlags::EXTRACT_DIR);
    }

    /// `mark_subtree(n)`: `mark_node(n)` plus `mark_node` on
    /// every descendant. O(|subtree|), cancellable between nodes.
    pub fn mark_subtree(&mut self, idx: NodeIndex, cancel: &CancellationFlag) -> Result<()> {
        let end = self.node(idx).subtree_end.0;
        for i in idx.0..end {
            if cancel.is_set() {
                counters::bump(Op::CancellationsObserved);
                return Err(Error::Cancelled);
            }
            self.mark_node(NodeIndex(i));
        }
        Ok(())
    }

    pub fn unmark_subtree(&mut self, idx: NodeIndex, cancel: &CancellationFlag) -> Result<()> {
        let end = self.node(idx).subtree_end.0;
        for i in idx.0..end {
            if cancel.is_set() {
                counters::bump(Op::CancellationsObserved);
                return Err(Error::Cancelled);
            }
            self.unmark_node(NodeIndex(i));
        }
        Ok(())
    }
}

fn names_match(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

#[derive(Debug)]
pub struct ChildrenIter<'a> {
    tree: &'a BuiltTree,
    current: Option<NodeIndex>,
    end: NodeIndex,
}

impl Iterator for ChildrenIter<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        let item = self.current?;
        let item_end = self.tree.node(item).subtree_end;
        self.current = if item_end.0 < self.end.0 {
            Some(item_end)
        } else {
            None
        };
        Some(item)
    }
}

#[derive(Debug)]
pub struct SubtreeIter<'a> {
    _tree: std::marker::PhantomData<&'a BuiltTree>,
    current: u32,
    end: u32,
}

impl Iterator for SubtreeIter<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        if self.current >= self.end {
            return None;
        }
        let idx = NodeIndex(self.current);
        self.current += 1;
        Some(idx)
    }
}

//! Ingests catalog rows and assembles the directory tree.
//!
//! Building happens in two phases. While rows stream in, we keep a
//! conventional parent/children tree of [`BuildEntry`]s so we can look up
//! (or create) "path so far" in O(depth) per row. Once ingestion finishes,
//! [`TreeBuilder::build`] flattens that structure into the arena the rest
//! of the crate (navigation, marking, serialization, BSR synthesis) uses:
//! a single `Vec<Node>` in pre-order with `subtree_end` filled in so a
//! subtree is always a contiguous index range.

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::config::Configuration;
use crate::counters::{self, Op};
use crate::delta::{DeltaEntry, DeltaPool};
use crate::error::{Error, Result};
use crate::hardlink::HardlinkIndex;
use crate::intern::Interner;
use crate::lstat;
use crate::node::{Node, NodeFlags, NodeIndex, NodeKind};
use crate::tree::BuiltTree;

/// One textual catalog row. `path` carries a trailing
/// separator; `filename` is empty for pure directory rows.
#[derive(Debug, Clone)]
pub struct CatalogRow<'a> {
    pub path: &'a str,
    pub filename: &'a str,
    pub file_index: i32,
    pub job_id: u32,
    pub lstat: &'a str,
    pub delta_seq: i32,
    pub fhinfo: u64,
    pub fhnode: u64,
}

/// A reference to an in-progress node, valid only until [`TreeBuilder::build`]
/// is called. Not to be confused with [`NodeIndex`], which only exists
/// after the arena has been flattened.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BuildRef(usize);

const ROOT_ENTRY: usize = 0;

#[derive(Debug)]
struct BuildEntry {
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    child_lookup: FxHashMap<String, usize>,

    kind: NodeKind,
    file_index: i32,
    job_id: u32,
    delta_seq: i32,
    fhinfo: u64,
    fhnode: u64,
    flags: NodeFlags,
    /// Prior (job_id, file_index) pairs, newest-first as they're displaced.
    delta_chain: Vec<DeltaEntry>,
}

impl BuildEntry {
    fn new(name: String, parent: Option<usize>, kind: NodeKind) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            child_lookup: FxHashMap::default(),
            kind,
            file_index: 0,
            job_id: 0,
            delta_seq: 0,
            fhinfo: 0,
            fhnode: 0,
            flags: NodeFlags::empty(),
            delta_chain: Vec::new(),
        }
    }
}

/// Builds a [`BuiltTree`] from a stream of catalog rows.
pub struct TreeBuilder {
    entries: Vec<BuildEntry>,
    hardlinks: FxHashMap<u64, BuildRef>,
    count: usize,
    // Small cache of the last directory path we resolved, since
    // consecutive catalog rows overwhelmingly share a parent directory.
    cached_path: String,
    cached_entry: usize,
    arena_byte_budget: usize,
}

impl TreeBuilder {
    pub fn new(config: &Configuration) -> Self {
        let mut entries = Vec::with_capacity(config.arena_size_guess);
        entries.push(BuildEntry::new(String::new(), None, NodeKind::Root));
        Self {
            entries,
            hardlinks: FxHashMap::default(),
            count: 0,
            cached_path: String::from("/"),
            cached_entry: ROOT_ENTRY,
            arena_byte_budget: config.arena_byte_budget,
        }
    }

    pub fn node_count(&self) -> usize {
        self.count
    }

    /// Split a directory path into segments. A Windows drive letter
    /// (`C:`) is treated as a single synthetic segment. Paths that don't
    /// start with a separator are flagged `DirNoLeadingSlash` by the
    /// caller (we just report whether one was present).
    fn segment_path(path: &str) -> (bool, Vec<&str>) {
        let has_leading_slash = path.starts_with('/') || path.starts_with('\\');
        let mut segments: Vec<&str> = Vec::new();

        let mut rest = path;
        // Windows drive letter: "C:/foo/" -> segment "C:" then the rest.
        if rest.len() >= 2 {
            let bytes = rest.as_bytes();
            if bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
                segments.push(&rest[0..2]);
                rest = &rest[2..];
            }
        }

        for seg in rest.split(|c| c == '/' || c == '\\') {
            if !seg.is_empty() {
                segments.push(seg);
            }
        }

        (has_leading_slash, segments)
    }

    /// Public contract: `insert_tree_node(path, filename, type) -> node_ref`,
    /// creating all missing ancestors as `NewDir` nodes.
    pub fn insert_tree_node(
        &mut self,
        path: &str,
        filename: &str,
        kind: NodeKind,
    ) -> (BuildRef, bool) {
        let (has_leading_slash, segments) = Self::segment_path(path);
        let dir_kind = if has_leading_slash {
            NodeKind::NewDir
        } else {
            NodeKind::DirNoLeadingSlash
        };

        let mut current = ROOT_ENTRY;
        // Walk/create each directory segment as NewDir (or DirNoLeadingSlash
        // for a path missing its leading separator), then the final
        // filename segment (or, for bare directory rows, the last path
        // segment itself carries `kind`).
        for (i, seg) in segments.iter().enumerate() {
            let is_last_segment = i + 1 == segments.len() && filename.is_empty();
            let want_kind = if is_last_segment { kind } else { dir_kind };
            current = self.get_or_create_child(current, seg, want_kind);
        }

        if filename.is_empty() {
            let newly_inserted = !self.entries[current].flags.contains(NodeFlags::INSERTED);
            return (BuildRef(current), newly_inserted);
        }

        let target = self.get_or_create_child(current, filename, kind);
        let newly_inserted = !self.entries[target].flags.contains(NodeFlags::INSERTED);
        (BuildRef(target), newly_inserted)
    }

    fn get_or_create_child(&mut self, parent: usize, name: &str, kind: NodeKind) -> usize {
        if let Some(&existing) = self.entries[parent].child_lookup.get(name) {
            return existing;
        }
        let idx = self.entries.len();
        self.entries
            .push(BuildEntry::new(name.to_owned(), Some(parent), kind));
        self.entries[parent].child_lookup.insert(name.to_owned(), idx);
        self.entries[parent].children.push(idx);
        idx
    }

    /// Ingest one catalog row.
    ///
    /// `mark_on_create` mirrors the "mark-on-create" flag: when set, a
    /// freshly-inserted node is marked for extraction immediately.
    pub fn handle_row(&mut self, row: &CatalogRow, mark_on_create: bool) -> Result<BuildRef> {
        let kind = if row.filename.is_empty() {
            // segment_path tells us leading-slash-ness; reuse it here too.
            if Self::segment_path(row.path).0 {
                NodeKind::Dir
            } else {
                NodeKind::DirNoLeadingSlash
            }
        } else {
            NodeKind::File
        };

        let (node_ref, newly_inserted) = self.insert_tree_node(row.path, row.filename, kind);

        let decoded = lstat::decode(row.lstat)
            .map_err(|e| Error::MalformedRow(format!("row fi={} job={}: {e:#}", row.file_index, row.job_id)))?;

        let overwrite = newly_inserted || self.should_overwrite(node_ref, row, decoded.link_fi);

        if overwrite {
            self.apply_overwrite(node_ref, row, &decoded, newly_inserted);

            if decoded.nlink > 1 && !self.entries[node_ref.0].kind.is_directory_like() {
                self.register_hardlink(node_ref, row.job_id, row.file_index, decoded.link_fi);
            }
        }

        if newly_inserted {
            self.count += 1;
            counters::bump(Op::NodesInserted);
            let entry = &mut self.entries[node_ref.0];
            entry.flags.insert(NodeFlags::INSERTED);
            if mark_on_create {
                entry.flags.insert(NodeFlags::EXTRACT);
                if entry.kind.is_directory_like() {
                    entry.flags.insert(NodeFlags::EXTRACT_DIR);
                }
            }
            if entry.kind == NodeKind::NewDir {
                counters::bump(Op::NodesSynthesizedAsNewDir);
            }
        }

        Ok(node_ref)
    }

    /// `should_overwrite(existing, incoming)`. Assumes
    /// the node already exists (newly-inserted nodes always overwrite and
    /// are handled by the caller before this is reached).
    fn should_overwrite(&self, node_ref: BuildRef, row: &CatalogRow, link_fi: i64) -> bool {
        let entry = &self.entries[node_ref.0];
        if row.job_id != entry.job_id {
            return true;
        }
        // Same job: hardlink members keep the smallest (oldest) file_index,
        // everything else keeps the largest (newest).
        if link_fi != 0 {
            row.file_index < entry.file_index
        } else {
            row.file_index > entry.file_index
        }
    }

    fn apply_overwrite(
        &mut self,
        node_ref: BuildRef,
        row: &CatalogRow,
        decoded: &lstat::DecodedLstat,
        newly_inserted: bool,
    ) {
        let entry = &mut self.entries[node_ref.0];

        // A job change displaces a previous (job_id, file_index) recording
        // of this path into the delta chain when the incoming row is part
        // of a delta backup (non-zero delta_seq): prior deltas must be
        // replayed in order before the newest one.
        if !newly_inserted && entry.job_id != row.job_id && row.delta_seq > 0 {
            entry.delta_chain.insert(
                0,
                DeltaEntry {
                    job_id: entry.job_id,
                    file_index: entry.file_index,
                },
            );
        }

        entry.file_index = row.file_index;
        entry.job_id = row.job_id;
        entry.delta_seq = row.delta_seq;
        entry.fhinfo = row.fhinfo;
        entry.fhnode = row.fhnode;
        entry.flags.set(NodeFlags::SOFT_LINK, decoded.is_symlink());
        entry.flags.set(NodeFlags::HARD_LINK, decoded.link_fi != 0);
    }

    fn register_hardlink(&mut self, node_ref: BuildRef, job_id: u32, file_index: i32, link_fi: i64) {
        if link_fi == 0 {
            // We're the chain head.
            self.hardlinks
                .entry(crate::hardlink::key(job_id, file_index))
                .or_insert_with(|| {
                    counters::bump(Op::HardlinkChainHeads);
                    node_ref
                });
            self.entries[node_ref.0].flags.insert(NodeFlags::HARD_LINK);
        } else if let Some(&head) = self
            .hardlinks
            .get(&crate::hardlink::key(job_id, link_fi as i32))
        {
            self.hardlinks
                .entry(crate::hardlink::key(job_id, file_index))
                .or_insert_with(|| {
                    counters::bump(Op::HardlinkChainMembers);
                    head
                });
            self.entries[node_ref.0].flags.insert(NodeFlags::HARD_LINK);
        }
        // If the head hasn't been seen yet, the row arrived out of order;
        // nothing to link to until it shows up (matches the original's
        // best-effort behavior -- a later row completing the chain will
        // still find this member via job_id/file_index on its own).
    }

    /// Flatten the in-progress entry tree into the arena [`BuiltTree`]
    /// expects: pre-order, with `subtree_end` filled by a single pass.
    /// Implemented iteratively (no recursion) since trees can be
    /// arbitrarily deep/wide.
    pub fn build(self) -> BuiltTree {
        let TreeBuilder {
            entries,
            hardlinks,
            count,
            arena_byte_budget,
            ..
        } = self;

        let n = entries.len();
        let mut order: Vec<usize> = Vec::with_capacity(n);
        let mut entry_to_pos: Vec<u32> = vec![0; n];
        let mut stack: Vec<usize> = vec![ROOT_ENTRY];

        while let Some(e) = stack.pop() {
            entry_to_pos[e] = order.len() as u32;
            order.push(e);
            for &child in entries[e].children.iter().rev() {
                stack.push(child);
            }
        }

        let mut sizes: Vec<u32> = vec![1; order.len()];
        for pos in (0..order.len()).rev() {
            let e = order[pos];
            let mut total = 1u32;
            for &child in &entries[e].children {
                total += sizes[entry_to_pos[child] as usize];
            }
            sizes[pos] = total;
        }

        let arena_bytes = if arena_byte_budget > 0 { arena_byte_budget } else { n * 12 };
        let mut interner = Interner::with_capacity(arena_bytes);
        let mut delta_pool = DeltaPool::new();
        let mut nodes: Vec<Node> = Vec::with_capacity(order.len());

        for (pos, &e) in order.iter().enumerate() {
            let entry = &entries[e];
            let name = interner.intern(entry.name.as_bytes());
            let delta_list = if entry.delta_chain.is_empty() {
                None
            } else {
                Some(delta_pool.push_chain(&entry.delta_chain))
            };
            let first_child = if sizes[pos] > 1 {
                Some(NodeIndex((pos + 1) as u32))
            } else {
                None
            };
            nodes.push(Node {
                name,
                kind: entry.kind,
                file_index: entry.file_index,
                job_id: entry.job_id,
                delta_seq: entry.delta_seq,
                fhinfo: entry.fhinfo,
                fhnode: entry.fhnode,
                delta_list,
                flags: entry.flags,
                first_child,
                subtree_end: NodeIndex((pos as u32) + sizes[pos]),
            });
        }

        let mut hl_index = HardlinkIndex::new();
        for (key, build_ref) in hardlinks {
            let pos = entry_to_pos[build_ref.0];
            hl_index.insert_raw(key, NodeIndex(pos));
        }

        trace!(nodes = nodes.len(), "tree build finished");

        BuiltTree::from_parts(nodes, interner, delta_pool, hl_index, count)
    }
}

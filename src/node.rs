//! The tree's basic unit: one path component recorded in one or more backup jobs.

use bitflags::bitflags;

/// Index of a node within [`crate::builder::BuiltTree`]'s arena.
///
/// Nodes are stored contiguously in pre-order, so a node's subtree is the
/// (exclusive) range `[index(n) + 1, subtree_end(n))`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    pub const ROOT: NodeIndex = NodeIndex(0);

    #[inline]
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

/// A reference into the tree's interned-string arena: `(offset, length)`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct StrRef {
    pub offset: u32,
    pub length: u32,
}

impl StrRef {
    pub const EMPTY: StrRef = StrRef {
        offset: 0,
        length: 0,
    };
}

/// A reference into the delta-list pool: `(start, count)`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DeltaRef {
    pub start: u32,
    pub count: u32,
}

/// What a node represents.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum NodeKind {
    /// The single root of the tree. Has no name.
    Root = 0,
    /// A directory synthesized to fill in a missing ancestor.
    NewDir = 1,
    /// A directory recorded directly by a catalog row.
    Dir = 2,
    /// A Win32 directory path with no leading slash.
    DirNoLeadingSlash = 3,
    /// A plain file.
    File = 4,
}

impl NodeKind {
    #[inline]
    pub fn is_directory_like(self) -> bool {
        matches!(
            self,
            NodeKind::Root | NodeKind::NewDir | NodeKind::Dir | NodeKind::DirNoLeadingSlash
        )
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => NodeKind::Root,
            1 => NodeKind::NewDir,
            2 => NodeKind::Dir,
            3 => NodeKind::DirNoLeadingSlash,
            4 => NodeKind::File,
            _ => return None,
        })
    }
}

bitflags! {
    /// Per-node bits, packed into a single byte.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
    pub struct NodeFlags: u8 {
        /// Set the first time `insert_tree_node` creates the entry.
        const INSERTED    = 0b0000_0001;
        /// Part of a hardlink chain (head or member).
        const HARD_LINK   = 0b0000_0010;
        /// `S_ISLNK` at last overwrite.
        const SOFT_LINK   = 0b0000_0100;
        /// The file's data should be restored.
        const EXTRACT     = 0b0000_1000;
        /// The directory's own metadata should be restored.
        const EXTRACT_DIR = 0b0001_0000;
    }
}

/// One path component: a name, its kind and flags, the catalog metadata
/// that last overwrote it, and its place in the tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: StrRef,
    pub kind: NodeKind,
    pub file_index: i32,
    pub job_id: u32,
    pub delta_seq: i32,
    pub fhinfo: u64,
    pub fhnode: u64,
    pub delta_list: Option<DeltaRef>,
    pub flags: NodeFlags,
    pub first_child: Option<NodeIndex>,
    /// Exclusive end of this node's contiguous subtree in arena order.
    /// Finalized by `build()`; until then it is a placeholder.
    pub subtree_end: NodeIndex,
}

impl Node {
    pub(crate) fn new_root() -> Self {
        Node {
            name: StrRef::EMPTY,
            kind: NodeKind::Root,
            file_index: 0,
            job_id: 0,
            delta_seq: 0,
            fhinfo: 0,
            fhnode: 0,
            delta_list: None,
            flags: NodeFlags::empty(),
            first_child: None,
            subtree_end: NodeIndex::ROOT,
        }
    }

    #[inline]
    pub fn inserted(&self) -> bool {
        self.flags.contains(NodeFlags::INSERTED)
    }

    #[inline]
    pub fn is_hard_link(&self) -> bool {
        self.flags.contains(NodeFlags::HARD_LINK)
    }

    #[inline]
    pub fn is_soft_link(&self) -> bool {
        self.flags.contains(NodeFlags::SOFT_LINK)
    }

    #[inline]
    pub fn extract(&self) -> bool {
        self.flags.contains(NodeFlags::EXTRACT)
    }

    #[inline]
    pub fn extract_dir(&self) -> bool {
        self.flags.contains(NodeFlags::EXTRACT_DIR)
    }

    #[inline]
    pub fn marked(&self) -> bool {
        self.extract() || self.extract_dir()
    }

    #[inline]
    pub fn is_directory(&self) -> bool {
        self.kind.is_directory_like()
    }
}

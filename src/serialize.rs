//! Binary tree snapshot: save/load a fully-built [`BuiltTree`] to a local
//! file so a browsing session can be checkpointed or resumed.
//!
//! Framing follows a magic-bytes-plus-version header and a CRC-32
//! trailer, written through a temp-file-then-persist pattern
//! (`tempfile::NamedTempFile` + `.persist()`) so a reader never sees a
//! half-written file. The layout is hand-rolled rather than a generic
//! serialization format so every record has an exact, fixed byte shape.

use std::io::Write;
use std::path::Path;

use crc32fast::Hasher;

use crate::delta::DeltaPool;
use crate::error::{Error, Result};
use crate::hardlink::HardlinkIndex;
use crate::intern::Interner;
use crate::node::{DeltaRef, Node, NodeFlags, NodeIndex, NodeKind, StrRef};
use crate::tree::BuiltTree;

const MAGIC: &[u8; 8] = b"BRTREE\0\0";
const VERSION: u32 = 1;
const NO_CHILD: u32 = u32::MAX;

/// Save `tree` to `path`, replacing any existing file atomically: the
/// whole snapshot is written to a temporary file in the same directory
/// and renamed into place, so a reader never observes a partial file.
pub fn save_tree(tree: &BuiltTree, path: &Path) -> Result<()> {
    let buf = encode(tree);

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new()?,
    };
    tmp.write_all(&buf)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Load a tree previously written by [`save_tree`]. `mark_on_load` ORs
/// `extract`/`extract_dir` across every node; otherwise bits
/// are restored exactly as saved.
pub fn load_tree(path: &Path, mark_on_load: bool) -> Result<BuiltTree> {
    let bytes = std::fs::read(path)?;
    decode(&bytes, mark_on_load)
}

fn encode(tree: &BuiltTree) -> Vec<u8> {
    let nodes = tree.nodes();
    let interner = tree.interner();
    let delta_pool = tree.delta_pool();
    let hardlinks = tree.hardlinks().to_sorted_vec();

    let mut out = Vec::with_capacity(nodes.len() * 40 + interner.len() + 64);
    out.extend_from_slice(MAGIC);
    write_u32(&mut out, VERSION);
    write_u32(&mut out, nodes.len() as u32);
    write_u32(&mut out, interner.len() as u32);
    write_u32(&mut out, hardlinks.len() as u32);

    for (pos, n) in nodes.iter().enumerate() {
        write_node_record(&mut out, pos as u32, n);
    }

    out.extend_from_slice(interner.raw_bytes());

    for (key, idx) in &hardlinks {
        write_u64(&mut out, *key);
        write_u32(&mut out, idx.0);
    }

    let delta_raw = delta_pool.raw();
    write_u32(&mut out, delta_raw.len() as u32);
    for entry in delta_raw {
        write_u32(&mut out, entry.job_id);
        write_i32(&mut out, entry.file_index);
    }

    write_mark_bitmap(&mut out, nodes);

    let crc = crc32(&out);
    write_u32(&mut out, crc);
    out
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn write_node_record(out: &mut Vec<u8>, pos: u32, n: &Node) {
    write_u32(out, n.name.offset);
    write_u32(out, n.name.length);
    out.push(n.kind as u8);
    out.push(n.flags.bits());
    write_i32(out, n.file_index);
    write_u32(out, n.job_id);
    write_i32(out, n.delta_seq);
    write_u64(out, n.fhinfo);
    write_u64(out, n.fhnode);
    write_u32(out, n.subtree_end.0 - pos);
    match n.first_child {
        Some(c) => write_u32(out, c.0 - pos),
        None => write_u32(out, NO_CHILD),
    }
    match n.delta_list {
        Some(r) => {
            write_u32(out, r.start);
            write_u32(out, r.count);
        }
        None => {
            write_u32(out, 0);
            write_u32(out, 0);
        }
    }
}

/// Two bits per node (extract, extract_dir), packed LSB-first. This
/// duplicates bits already present in each node's `flags` byte; on load the bitmap wins,
/// which is what makes "mark on load" a simple OR over one compact
/// region instead of a full node-table rewrite.
fn write_mark_bitmap(out: &mut Vec<u8>, nodes: &[Node]) {
    let nbits = nodes.len() * 2;
    let nbytes = (nbits + 7) / 8;
    let mut bitmap = vec![0u8; nbytes];
    for (i, n) in nodes.iter().enumerate() {
        if n.extract() {
            set_bit(&mut bitmap, i * 2);
        }
        if n.extract_dir() {
            set_bit(&mut bitmap, i * 2 + 1);
        }
    }
    out.extend_from_slice(&bitmap);
}

fn set_bit(bitmap: &mut [u8], bit: usize) {
    bitmap[bit / 8] |= 1 << (bit % 8);
}

fn get_bit(bitmap: &[u8], bit: usize) -> bool {
    bitmap[bit / 8] & (1 << (bit % 8)) != 0
}

fn decode(bytes: &[u8], mark_on_load: bool) -> Result<BuiltTree> {
    let mut r = Reader::new(bytes);

    if r.take(8)? != MAGIC.as_slice() {
        return Err(Error::Corrupt("bad magic".into()));
    }
    let version = r.u32()?;
    if version != VERSION {
        return Err(Error::Corrupt(format!("unsupported version {version}")));
    }

    let node_count = r.u32()? as usize;
    let string_bytes = r.u32()? as usize;
    let hardlink_count = r.u32()? as usize;

    struct RawNode {
        name: StrRef,
        kind: u8,
        flags: u8,
        file_index: i32,
        job_id: u32,
        delta_seq: i32,
        fhinfo: u64,
        fhnode: u64,
        subtree_end_delta: u32,
        first_child_delta: u32,
        delta_start: u32,
        delta_count: u32,
    }

    let mut raw_nodes = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        raw_nodes.push(RawNode {
            name: StrRef {
                offset: r.u32()?,
                length: r.u32()?,
            },
            kind: r.u8()?,
            flags: r.u8()?,
            file_index: r.i32()?,
            job_id: r.u32()?,
            delta_seq: r.i32()?,
            fhinfo: r.u64()?,
            fhnode: r.u64()?,
            subtree_end_delta: r.u32()?,
            first_child_delta: r.u32()?,
            delta_start: r.u32()?,
            delta_count: r.u32()?,
        });
    }

    let string_pool = r.take(string_bytes)?.to_vec();
    let interner = Interner::from_raw_bytes(string_pool);

    let mut hl_entries = Vec::with_capacity(hardlink_count);
    for _ in 0..hardlink_count {
        let key = r.u64()?;
        let idx = r.u32()?;
        hl_entries.push((key, NodeIndex(idx)));
    }

    let delta_entry_count = r.u32()? as usize;
    let mut delta_entries = Vec::with_capacity(delta_entry_count);
    for _ in 0..delta_entry_count {
        let job_id = r.u32()?;
        let file_index = r.i32()?;
        delta_entries.push(crate::delta::DeltaEntry { job_id, file_index });
    }
    let delta_pool = DeltaPool::from_raw(delta_entries);

    let bitmap_bytes = (node_count * 2 + 7) / 8;
    let bitmap = r.take(bitmap_bytes)?.to_vec();

    let consumed = r.position();
    let crc_expected = r.u32()?;
    let crc_actual = crc32(&bytes[..consumed]);
    if crc_actual != crc_expected {
        return Err(Error::Corrupt("CRC-32 mismatch".into()));
    }

    let mut nodes = Vec::with_capacity(node_count);
    for (pos, raw) in raw_nodes.into_iter().enumerate() {
        let pos = pos as u32;
        let kind = NodeKind::from_u8(raw.kind)
            .ok_or_else(|| Error::Corrupt(format!("bad node kind {} at {pos}", raw.kind)))?;
        let mut flags = NodeFlags::from_bits_truncate(raw.flags);
        flags.remove(NodeFlags::EXTRACT | NodeFlags::EXTRACT_DIR);
        if get_bit(&bitmap, pos as usize * 2) || mark_on_load {
            flags.insert(NodeFlags::EXTRACT);
        }
        if get_bit(&bitmap, pos as usize * 2 + 1) || (mark_on_load && kind.is_directory_like()) {
            flags.insert(NodeFlags::EXTRACT_DIR);
        }

        let first_child = if raw.first_child_delta == NO_CHILD {
            None
        } else {
            Some(NodeIndex(pos + raw.first_child_delta))
        };
        let delta_list = if raw.delta_count == 0 {
            None
        } else {
            Some(DeltaRef {
                start: raw.delta_start,
                count: raw.delta_count,
            })
        };

        nodes.push(Node {
            name: raw.name,
            kind,
            file_index: raw.file_index,
            job_id: raw.job_id,
            delta_seq: raw.delta_seq,
            fhinfo: raw.fhinfo,
            fhnode: raw.fhnode,
            delta_list,
            flags,
            first_child,
            subtree_end: NodeIndex(pos + raw.subtree_end_delta),
        });
    }

    for (i, n) in nodes.iter().enumerate() {
        if n.subtree_end.get() <= i {
            return Err(Error::Corrupt(format!(
                "node {i}: subtree_end {} doesn't exceed its own index",
                n.subtree_end.get()
            )));
        }
    }

    let hardlinks = HardlinkIndex::from_sorted_vec(hl_entries, nodes.len());
    let count = nodes.iter().filter(|n| n.inserted()).count();

    Ok(BuiltTree::from_parts(nodes, interner, delta_pool, hardlinks, count))
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::Corrupt("unexpected end of snapshot".into()));
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::{CatalogRow, TreeBuilder};
    use crate::cancel::CancellationFlag;
    use crate::config::Configuration;
    use crate::lstat::{self, DecodedLstat};

    fn sample_tree() -> BuiltTree {
        let cfg = Configuration::default();
        let mut b = TreeBuilder::new(&cfg);
        let dir_stat = lstat::encode(DecodedLstat {
            mode: 0o040755,
            nlink: 2,
            link_fi: 0,
        });
        let file_stat_a = lstat::encode(DecodedLstat {
            mode: 0o100644,
            nlink: 2,
            link_fi: 0,
        });
        let file_stat_b = lstat::encode(DecodedLstat {
            mode: 0o100644,
            nlink: 2,
            link_fi: 10,
        });
        b.handle_row(
            &CatalogRow {
                path: "/",
                filename: "",
                file_index: 0,
                job_id: 1,
                lstat: &dir_stat,
                delta_seq: 0,
                fhinfo: 0,
                fhnode: 0,
            },
            false,
        )
        .unwrap();
        b.handle_row(
            &CatalogRow {
                path: "/a/",
                filename: "f",
                file_index: 10,
                job_id: 7,
                lstat: &file_stat_a,
                delta_seq: 0,
                fhinfo: 0,
                fhnode: 0,
            },
            false,
        )
        .unwrap();
        b.handle_row(
            &CatalogRow {
                path: "/b/",
                filename: "g",
                file_index: 11,
                job_id: 7,
                lstat: &file_stat_b,
                delta_seq: 0,
                fhinfo: 0,
                fhnode: 0,
            },
            false,
        )
        .unwrap();
        let mut tree = b.build();
        let cancel = CancellationFlag::new();
        let hosts = tree.find("/a/f", tree.root(), true).unwrap();
        tree.mark_node(hosts);
        let _ = cancel;
        tree
    }

    #[test]
    fn round_trip_preserves_structure_and_marks() {
        let tree = sample_tree();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.brtree");
        save_tree(&tree, &path).unwrap();
        let loaded = load_tree(&path, false).unwrap();

        assert_eq!(loaded.len(), tree.len());
        for i in 0..tree.len() as u32 {
            let idx = NodeIndex(i);
            assert_eq!(loaded.name(idx), tree.name(idx));
            assert_eq!(loaded.node(idx).flags, tree.node(idx).flags);
            assert_eq!(loaded.node(idx).subtree_end, tree.node(idx).subtree_end);
        }
        assert_eq!(
            loaded.hardlink_lookup(7, 10),
            tree.hardlink_lookup(7, 10)
        );
        assert_eq!(
            loaded.hardlink_lookup(7, 11),
            tree.hardlink_lookup(7, 11)
        );
    }

    #[test]
    fn mark_on_load_ors_extract_everywhere() {
        let tree = sample_tree();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.brtree");
        save_tree(&tree, &path).unwrap();
        let loaded = load_tree(&path, true).unwrap();
        for i in 0..loaded.len() as u32 {
            let n = loaded.node(NodeIndex(i));
            assert!(n.extract(), "node {i} should be marked by mark-on-load");
        }
    }

    #[test]
    fn truncated_file_is_corrupt_not_a_panic() {
        let tree = sample_tree();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.brtree");
        save_tree(&tree, &path).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() / 2);
        std::fs::write(&path, &bytes).unwrap();
        let err = load_tree(&path, false).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn crc32_matches_known_check_value() {
        // The standard CRC-32/IEEE check value: crc32("123456789") == 0xCBF43926.
        let expected = hex_literal::hex!("cbf43926");
        assert_eq!(crc32(b"123456789").to_be_bytes(), expected);
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let tree = sample_tree();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.brtree");
        save_tree(&tree, &path).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        let err = load_tree(&path, false).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }
}

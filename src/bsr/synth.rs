//! Walks a marked tree and emits a Bootstrap Record.
//!
//! The SQL catalog is kept out of scope behind a narrow trait
//! ([`VolumeCatalog`]), and a long walk can be cancelled cooperatively
//! through a shared atomic flag checked between nodes.

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::bsr::model::{BsrEntry, JobIdRange, Range, Volume, VolSessionTime};
use crate::cancel::CancellationFlag;
use crate::counters::{self, Op};
use crate::error::{Error, Result};
use crate::node::NodeKind;
use crate::tree::BuiltTree;

/// One volume's placement of a job, as the out-of-scope SQL catalog
/// would return it.
#[derive(Debug, Clone)]
pub struct VolumeRecord {
    pub volume_name: String,
    pub media_type: String,
    pub device: String,
    pub slot: Option<u32>,
    pub vol_session_id: u32,
    pub vol_session_time: u32,
    pub first_vol_file: u32,
    pub last_vol_file: u32,
    pub first_vol_block: u32,
    pub last_vol_block: u32,
}

/// The catalog's only in-scope surface: given a job, its ordered volume
/// placements. A `Err` return is a recoverable per-job failure.
pub trait VolumeCatalog {
    fn volumes_for_job(&self, job_id: u32) -> Result<Vec<VolumeRecord>>;
}

#[derive(Debug, Clone)]
pub struct SynthesisReport {
    pub text: String,
    /// Nodes with `extract && type != NewDir`.
    pub selected_files: usize,
}

/// Synthesize a BSR from every marked node in `tree`.
///
/// Entries are grouped one-per-job-id (the job whose `(job_id,
/// file_index)` a line carries), in the order each job is first
/// encountered during the pre-order walk -- this keeps each entry's
/// volume/session hints meaningful, since those describe a single job's
/// placement on tape and two unrelated jobs rarely share a volume.
pub fn synthesize(
    tree: &BuiltTree,
    catalog: &dyn VolumeCatalog,
    cancel: &CancellationFlag,
) -> Result<SynthesisReport> {
    let mut order: Vec<u32> = Vec::new();
    let mut entries: FxHashMap<u32, BsrEntry> = FxHashMap::default();
    let mut selected_files = 0usize;

    for idx in tree.subtree(tree.root()) {
        if cancel.is_set() {
            counters::bump(Op::CancellationsObserved);
            return Err(Error::Cancelled);
        }
        let node = tree.node(idx);
        if !node.marked() {
            continue;
        }

        for d in tree.delta_entries_oldest_first(idx) {
            push_findex(&mut order, &mut entries, d.job_id, d.file_index);
        }
        push_findex(&mut order, &mut entries, node.job_id, node.file_index);

        if node.extract() && node.kind != NodeKind::NewDir {
            selected_files += 1;
        }
    }

    if order.is_empty() {
        return Err(Error::NoFilesSelected);
    }

    let mut any_enriched = false;
    for job_id in &order {
        let entry = entries.get_mut(job_id).expect("job present in order");
        match catalog.volumes_for_job(*job_id) {
            Ok(vols) if !vols.is_empty() => {
                any_enriched = true;
                for v in vols {
                    entry.volumes.push(Volume {
                        name: v.volume_name,
                        media_type: v.media_type,
                        device: v.device,
                        slot: v.slot,
                    });
                    entry.vol_session_ids.push(Range::single(v.vol_session_id));
                    entry.vol_session_times.push(VolSessionTime(v.vol_session_time));
                    entry.vol_files.push(Range {
                        start: v.first_vol_file,
                        end: v.last_vol_file,
                    });
                    entry.vol_blocks.push(Range {
                        start: v.first_vol_block,
                        end: v.last_vol_block,
                    });
                }
            }
            Ok(_) => {
                warn!(job_id, "catalog returned no volumes for job");
                counters::bump(Op::CatalogEnrichmentFailures);
            }
            Err(e) => {
                warn!(job_id, error = %e, "catalog enrichment failed, emitting entry without positioning hints");
                counters::bump(Op::CatalogEnrichmentFailures);
            }
        }
    }

    if !any_enriched {
        return Err(Error::NoVolumes);
    }

    let mut text = String::new();
    for (i, job_id) in order.iter().enumerate() {
        if i > 0 {
            text.push('\n');
        }
        let entry = &entries[job_id];
        render_entry(&mut text, entry);
    }

    Ok(SynthesisReport { text, selected_files })
}

fn push_findex(order: &mut Vec<u32>, entries: &mut FxHashMap<u32, BsrEntry>, job_id: u32, fi: i32) {
    entries.entry(job_id).or_insert_with(|| {
        order.push(job_id);
        let mut e = BsrEntry::new();
        e.job_ids.push(JobIdRange::single(job_id));
        e
    });
    entries.get_mut(&job_id).unwrap().add_findex(job_id, fi);
}

/// Render one entry's lines, in a fixed field order.
fn render_entry(out: &mut String, e: &BsrEntry) {
    if !e.volumes.is_empty() {
        line(out, "Volume", &e.volumes.iter().map(|v| v.name.clone()).collect::<Vec<_>>().join("|"));
        let media: Vec<&str> = dedup_in_order(e.volumes.iter().map(|v| v.media_type.as_str()));
        if !media.is_empty() {
            line(out, "MediaType", &media.join("|"));
        }
        let devices: Vec<&str> = dedup_in_order(e.volumes.iter().map(|v| v.device.as_str()));
        if !devices.is_empty() {
            line(out, "Device", &devices.join("|"));
        }
        let slots: Vec<String> = e.volumes.iter().filter_map(|v| v.slot).map(|s| s.to_string()).collect();
        if !slots.is_empty() {
            line(out, "Slot", &slots.join("|"));
        }
    }
    for c in &e.clients {
        line(out, "Client", &c.0);
    }
    for j in &e.jobs {
        line(out, "Job", &j.0);
    }
    for r in &e.vol_session_ids {
        line(out, "VolSessionId", &range_str(r));
    }
    for t in &e.vol_session_times {
        line(out, "VolSessionTime", &t.0.to_string());
    }
    for r in &e.vol_files {
        line(out, "VolFile", &range_str(r));
    }
    for r in &e.vol_blocks {
        line(out, "VolBlock", &range_str(r));
    }
    for r in &e.vol_addrs {
        line(out, "VolAddr", &range_str(r));
    }
    for f in &e.findex {
        if f.all {
            line(out, "FileIndex", &format!("0-{}", i32::MAX));
        } else {
            line(out, "FileIndex", &range_str(&f.range));
        }
    }
    for r in &e.job_ids {
        line(out, "JobId", &range_str(r));
    }
    if let Some(count) = e.count {
        line(out, "Count", &count.to_string());
    }
    if let Some(jt) = &e.job_type {
        line(out, "JobType", jt);
    }
    if let Some(jl) = &e.job_level {
        line(out, "JobLevel", jl);
    }
    for s in &e.streams {
        line(out, "Stream", stream_name(*s));
    }
    if let Some(re) = &e.file_regex {
        line(out, "FileRegex", re);
    }
    if !e.include {
        line(out, "Exclude", "yes");
    }
    for (k, v) in &e.unknown {
        line(out, k, v);
    }
}

fn dedup_in_order<'a>(it: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = Vec::new();
    for s in it {
        if !seen.contains(&s) {
            seen.push(s);
        }
    }
    seen
}

fn range_str<T: std::fmt::Display + PartialEq>(r: &Range<T>) -> String {
    if r.start == r.end {
        format!("{}", r.start)
    } else {
        format!("{}-{}", r.start, r.end)
    }
}

fn stream_name(s: crate::bsr::model::Stream) -> &'static str {
    use crate::bsr::model::Stream::*;
    match s {
        Data => "Data",
        Attributes => "Attributes",
        Resource => "Resource",
        Acl => "Acl",
        Xattr => "Xattr",
    }
}

fn line(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push('=');
    out.push_str(value);
    out.push('\n');
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::{CatalogRow, TreeBuilder};
    use crate::config::Configuration;
    use crate::lstat::{self, DecodedLstat};

    struct FakeCatalog {
        volumes: FxHashMap<u32, Vec<VolumeRecord>>,
        fail: Vec<u32>,
    }

    impl VolumeCatalog for FakeCatalog {
        fn volumes_for_job(&self, job_id: u32) -> Result<Vec<VolumeRecord>> {
            if self.fail.contains(&job_id) {
                return Err(Error::CatalogError(format!("no catalog entry for job {job_id}")));
            }
            Ok(self.volumes.get(&job_id).cloned().unwrap_or_default())
        }
    }

    fn mklstat(is_dir: bool, nlink: u32, link_fi: i64) -> String {
        lstat::encode(DecodedLstat {
            mode: if is_dir { 0o040755 } else { 0o100644 },
            nlink,
            link_fi,
        })
    }

    fn sample_tree() -> BuiltTree {
        let cfg = Configuration::default();
        let mut b = TreeBuilder::new(&cfg);
        let dir_stat = mklstat(true, 2, 0);
        let file_stat = mklstat(false, 1, 0);
        b.handle_row(
            &CatalogRow { path: "/", filename: "", file_index: 0, job_id: 1, lstat: &dir_stat, delta_seq: 0, fhinfo: 0, fhnode: 0 },
            false,
        ).unwrap();
        b.handle_row(
            &CatalogRow { path: "/etc/", filename: "hosts", file_index: 3, job_id: 1, lstat: &file_stat, delta_seq: 0, fhinfo: 0, fhnode: 0 },
            false,
        ).unwrap();
        b.handle_row(
            &CatalogRow { path: "/etc/", filename: "motd", file_index: 4, job_id: 1, lstat: &file_stat, delta_seq: 0, fhinfo: 0, fhnode: 0 },
            false,
        ).unwrap();
        b.build()
    }

    fn key_line<'a>(text: &'a str, key: &str) -> Option<&'a str> {
        text.lines().find(|l| l.starts_with(&format!("{key}="))).map(|l| &l[key.len() + 1..])
    }

    fn key_pos(lines: &[&str], key: &str) -> usize {
        lines.iter().position(|l| l.starts_with(&format!("{key}="))).unwrap()
    }

    #[test]
    fn minimal_tree_and_bsr() {
        let mut tree = sample_tree();
        let cancel = CancellationFlag::new();
        let hosts = tree.find("/etc/hosts", tree.root(), true).unwrap();
        let motd = tree.find("/etc/motd", tree.root(), true).unwrap();
        tree.mark_node(hosts);
        tree.mark_node(motd);

        let mut volumes = FxHashMap::default();
        volumes.insert(
            1,
            vec![VolumeRecord {
                volume_name: "Vol-0001".into(),
                media_type: "LTO8".into(),
                device: "Drive-0".into(),
                slot: None,
                vol_session_id: 42,
                vol_session_time: 1_700_000_000,
                first_vol_file: 0,
                last_vol_file: 0,
                first_vol_block: 0,
                last_vol_block: 1000,
            }],
        );
        let catalog = FakeCatalog { volumes, fail: vec![] };
        let report = synthesize(&tree, &catalog, &cancel).unwrap();

        assert_eq!(key_line(&report.text, "Volume"), Some("Vol-0001"));
        assert_eq!(key_line(&report.text, "VolSessionId"), Some("42"));
        assert_eq!(key_line(&report.text, "VolSessionTime"), Some("1700000000"));
        assert_eq!(key_line(&report.text, "FileIndex"), Some("3-4"));
        assert_eq!(key_line(&report.text, "JobId"), Some("1"));
        assert_eq!(report.selected_files, 2);

        let lines: Vec<&str> = report.text.lines().collect();
        assert!(key_pos(&lines, "Volume") < key_pos(&lines, "VolSessionId"));
        assert!(key_pos(&lines, "VolSessionId") < key_pos(&lines, "VolSessionTime"));
        assert!(key_pos(&lines, "VolSessionTime") < key_pos(&lines, "FileIndex"));
        assert!(key_pos(&lines, "FileIndex") < key_pos(&lines, "JobId"));
    }

    #[test]
    fn delta_chain_emission_order() {
        let cfg = Configuration::default();
        let mut b = TreeBuilder::new(&cfg);
        let dir_stat = mklstat(true, 2, 0);
        let file_stat = mklstat(false, 1, 0);
        b.handle_row(
            &CatalogRow { path: "/", filename: "", file_index: 0, job_id: 4, lstat: &dir_stat, delta_seq: 0, fhinfo: 0, fhnode: 0 },
            false,
        ).unwrap();
        b.handle_row(
            &CatalogRow { path: "/db/", filename: "data", file_index: 2, job_id: 4, lstat: &file_stat, delta_seq: 0, fhinfo: 0, fhnode: 0 },
            false,
        ).unwrap();
        b.handle_row(
            &CatalogRow { path: "/db/", filename: "data", file_index: 9, job_id: 5, lstat: &file_stat, delta_seq: 1, fhinfo: 0, fhnode: 0 },
            false,
        ).unwrap();
        b.handle_row(
            &CatalogRow { path: "/db/", filename: "data", file_index: 17, job_id: 6, lstat: &file_stat, delta_seq: 2, fhinfo: 0, fhnode: 0 },
            false,
        ).unwrap();
        let mut tree = b.build();
        let data = tree.find("/db/data", tree.root(), true).unwrap();
        tree.mark_node(data);

        let mut volumes = FxHashMap::default();
        for (job, sess) in [(4u32, 1u32), (5, 2), (6, 3)] {
            volumes.insert(
                job,
                vec![VolumeRecord {
                    volume_name: format!("Vol-{job}"),
                    media_type: "LTO8".into(),
                    device: "Drive-0".into(),
                    slot: None,
                    vol_session_id: sess,
                    vol_session_time: 1_700_000_000,
                    first_vol_file: 0,
                    last_vol_file: 0,
                    first_vol_block: 0,
                    last_vol_block: 10,
                }],
            );
        }
        let catalog = FakeCatalog { volumes, fail: vec![] };
        let cancel = CancellationFlag::new();
        let report = synthesize(&tree, &catalog, &cancel).unwrap();

        let job_lines: Vec<&str> = report
            .text
            .lines()
            .filter(|l| l.starts_with("JobId="))
            .collect();
        assert_eq!(job_lines, vec!["JobId=4", "JobId=5", "JobId=6"]);
    }

    #[test]
    fn no_marks_yields_no_files_selected() {
        let tree = sample_tree();
        let cancel = CancellationFlag::new();
        let catalog = FakeCatalog { volumes: FxHashMap::default(), fail: vec![] };
        let err = synthesize(&tree, &catalog, &cancel).unwrap_err();
        assert!(matches!(err, Error::NoFilesSelected));
    }

    #[test]
    fn catalog_failure_on_every_job_yields_no_volumes() {
        let mut tree = sample_tree();
        let hosts = tree.find("/etc/hosts", tree.root(), true).unwrap();
        tree.mark_node(hosts);
        let catalog = FakeCatalog { volumes: FxHashMap::default(), fail: vec![1] };
        let cancel = CancellationFlag::new();
        let err = synthesize(&tree, &catalog, &cancel).unwrap_err();
        assert!(matches!(err, Error::NoVolumes));
    }

    #[test]
    fn partial_catalog_failure_still_emits() {
        let cfg = Configuration::default();
        let mut b = TreeBuilder::new(&cfg);
        let dir_stat = mklstat(true, 2, 0);
        let file_stat = mklstat(false, 1, 0);
        b.handle_row(
            &CatalogRow { path: "/", filename: "", file_index: 0, job_id: 1, lstat: &dir_stat, delta_seq: 0, fhinfo: 0, fhnode: 0 },
            false,
        ).unwrap();
        b.handle_row(
            &CatalogRow { path: "/a/", filename: "x", file_index: 1, job_id: 1, lstat: &file_stat, delta_seq: 0, fhinfo: 0, fhnode: 0 },
            false,
        ).unwrap();
        b.handle_row(
            &CatalogRow { path: "/b/", filename: "y", file_index: 1, job_id: 2, lstat: &file_stat, delta_seq: 0, fhinfo: 0, fhnode: 0 },
            false,
        ).unwrap();
        let mut tree = b.build();
        let x = tree.find("/a/x", tree.root(), true).unwrap();
        let y = tree.find("/b/y", tree.root(), true).unwrap();
        tree.mark_node(x);
        tree.mark_node(y);

        let mut volumes = FxHashMap::default();
        volumes.insert(
            2,
            vec![VolumeRecord {
                volume_name: "Vol-0002".into(),
                media_type: "LTO8".into(),
                device: "Drive-0".into(),
                slot: None,
                vol_session_id: 7,
                vol_session_time: 1,
                first_vol_file: 0,
                last_vol_file: 0,
                first_vol_block: 0,
                last_vol_block: 10,
            }],
        );
        let catalog = FakeCatalog { volumes, fail: vec![1] };
        let cancel = CancellationFlag::new();
        let report = synthesize(&tree, &catalog, &cancel).unwrap();
        assert!(report.text.contains("JobId=1"));
        assert!(report.text.contains("JobId=2"));
        assert!(report.text.contains("Vol-0002"));
    }
}

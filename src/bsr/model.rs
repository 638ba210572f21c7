//! The Bootstrap Record (BSR) typed model.
//!
//! Each [`BsrEntry`] aggregates every constraint list that must hold for
//! a storage record to match: within a list, constraints are OR'd
//! together (e.g. any of several `Volume`s); across lists, AND applies.
//! File-index ranges are coalesced eagerly on insertion rather than left
//! for a later pass, doing the cheap bookkeeping work at the point of
//! insertion instead of batching it.

use crate::counters::{self, Op};

/// An inclusive `[start, end]` range. A single value is `start == end`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub struct Range<T> {
    pub start: T,
    pub end: T,
}

impl<T: Copy + Ord> Range<T> {
    pub fn single(v: T) -> Self {
        Range { start: v, end: v }
    }
}

pub type JobIdRange = Range<u32>;
pub type VolFileRange = Range<u32>;
pub type VolBlockRange = Range<u32>;
pub type VolAddrRange = Range<u64>;
pub type VolSessionIdRange = Range<u32>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VolSessionTime(pub u32);

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Volume {
    pub name: String,
    pub media_type: String,
    pub device: String,
    pub slot: Option<u32>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Client(pub String);

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Job(pub String);

/// A file_index range scoped to a single job: findex ranges are always
/// per-job, never shared across jobs in the same entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FindexRange {
    pub job_id: u32,
    pub range: Range<i32>,
    /// A range covering every file_index of the job (`add_findex_all`).
    pub all: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Stream {
    Data,
    Attributes,
    Resource,
    Acl,
    Xattr,
}

/// One BSR entry: every constraint that must jointly hold for a storage
/// record to be selected.
#[derive(Debug, Clone, Default)]
pub struct BsrEntry {
    pub volumes: Vec<Volume>,
    pub clients: Vec<Client>,
    pub jobs: Vec<Job>,
    pub job_ids: Vec<JobIdRange>,
    pub findex: Vec<FindexRange>,
    pub vol_session_ids: Vec<VolSessionIdRange>,
    pub vol_session_times: Vec<VolSessionTime>,
    pub vol_files: Vec<VolFileRange>,
    pub vol_blocks: Vec<VolBlockRange>,
    pub vol_addrs: Vec<VolAddrRange>,
    pub streams: Vec<Stream>,
    pub count: Option<u32>,
    pub job_type: Option<String>,
    pub job_level: Option<String>,
    pub file_regex: Option<String>,
    pub include: bool,
    /// Keys the parser didn't recognize, stored verbatim.
    pub unknown: Vec<(String, String)>,
}

impl BsrEntry {
    pub fn new() -> Self {
        Self {
            include: true,
            ..Default::default()
        }
    }

    /// Insert a `(job_id, file_index)` pair, coalescing with the
    /// immediately preceding range when `fi == last.end + 1`. Ranges for different jobs never merge.
    pub fn add_findex(&mut self, job_id: u32, fi: i32) {
        if let Some(last) = self
            .findex
            .iter_mut()
            .rev()
            .find(|f| f.job_id == job_id && !f.all)
        {
            if fi == last.range.end + 1 {
                last.range.end = fi;
                counters::bump(Op::FindexRangesCoalesced);
                return;
            }
            if fi == last.range.start - 1 {
                last.range.start = fi;
                counters::bump(Op::FindexRangesCoalesced);
                return;
            }
            if fi >= last.range.start && fi <= last.range.end {
                return;
            }
        }
        self.findex.push(FindexRange {
            job_id,
            range: Range::single(fi),
            all: false,
        });
    }

    /// Match every file_index belonging to `job_id`.
    pub fn add_findex_all(&mut self, job_id: u32) {
        if self.findex.iter().any(|f| f.job_id == job_id && f.all) {
            return;
        }
        self.findex.push(FindexRange {
            job_id,
            range: Range::single(0),
            all: true,
        });
    }

    /// `use_fast_rejection`: every session-id and session-time list is
    /// non-empty.
    pub fn supports_fast_rejection(&self) -> bool {
        !self.vol_session_ids.is_empty() && !self.vol_session_times.is_empty()
    }

    /// `use_positioning`: every volfile and volblock list is non-empty.
    pub fn supports_positioning(&self) -> bool {
        !self.vol_files.is_empty() && !self.vol_blocks.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn findex_coalesces_adjacent_ranges() {
        let mut e = BsrEntry::new();
        e.add_findex(1, 10);
        e.add_findex(1, 11);
        assert_eq!(e.findex.len(), 1);
        assert_eq!(e.findex[0].range, Range { start: 10, end: 11 });
    }

    #[test]
    fn findex_keeps_separate_jobs_separate() {
        let mut e = BsrEntry::new();
        e.add_findex(1, 10);
        e.add_findex(2, 11);
        assert_eq!(e.findex.len(), 2);
    }

    #[test]
    fn findex_non_adjacent_opens_new_range() {
        let mut e = BsrEntry::new();
        e.add_findex(1, 10);
        e.add_findex(1, 50);
        assert_eq!(e.findex.len(), 2);
    }

    #[test]
    fn findex_all_is_idempotent() {
        let mut e = BsrEntry::new();
        e.add_findex_all(3);
        e.add_findex_all(3);
        assert_eq!(e.findex.iter().filter(|f| f.job_id == 3 && f.all).count(), 1);
    }

    #[test]
    fn fast_rejection_requires_both_lists() {
        let mut e = BsrEntry::new();
        assert!(!e.supports_fast_rejection());
        e.vol_session_ids.push(Range::single(42));
        assert!(!e.supports_fast_rejection());
        e.vol_session_times.push(VolSessionTime(1_700_000_000));
        assert!(e.supports_fast_rejection());
    }
}

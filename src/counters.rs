//! Performance counters: Count how many times we do various important operations.

use std::sync::atomic::{fence, AtomicUsize, Ordering};

use enum_map::{Enum, EnumMap};
use lazy_static::lazy_static;
use tracing::debug;

#[derive(Debug, Copy, Clone, Enum)]
pub enum Op {
    NodesInserted,
    NodesSynthesizedAsNewDir,
    HardlinkChainHeads,
    HardlinkChainMembers,
    CancellationsObserved,
    CatalogEnrichmentFailures,
    FindexRangesCoalesced,
}

lazy_static! {
    static ref COUNTER_MAP: EnumMap<Op, AtomicUsize> = EnumMap::default();
}

#[inline]
pub fn bump(which: Op) {
    add(which, 1);
}

pub fn add(to: Op, amount: usize) {
    COUNTER_MAP[to].fetch_add(amount, Ordering::Relaxed);
}

pub fn get(which: Op) -> usize {
    COUNTER_MAP[which].load(Ordering::Relaxed)
}

pub fn log_counts() {
    // Probably not needed; but we're probably calling this once per session.
    fence(Ordering::SeqCst);

    let counts = COUNTER_MAP
        .iter()
        .map(|(k, v)| (k, v.load(Ordering::Relaxed)))
        .filter(|(_k, v)| *v > 0) // Ignore things we didn't do
        .collect::<Vec<_>>();

    if counts.is_empty() {
        return;
    }

    let opname = |op| match op {
        Op::NodesInserted => "nodes inserted",
        Op::NodesSynthesizedAsNewDir => "directories synthesized to fill a missing parent",
        Op::HardlinkChainHeads => "hardlink chain heads",
        Op::HardlinkChainMembers => "hardlink chain members",
        Op::CancellationsObserved => "cancellations observed",
        Op::CatalogEnrichmentFailures => "catalog enrichment failures",
        Op::FindexRangesCoalesced => "file-index ranges coalesced",
    };

    debug!("Counters:");
    for (op, count) in &counts {
        debug!("{:6} {}", count, opname(*op));
    }
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    for (_, v) in COUNTER_MAP.iter() {
        v.store(0, Ordering::Relaxed);
    }
}

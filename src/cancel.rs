//! Cooperative cancellation shared across long-running loops.
//!
//! Every long loop -- ingestion, `mark_subtree`, the BSR tree walk --
//! polls a [`CancellationFlag`] between records and bails out with
//! [`crate::error::Error::Cancelled`] on first observation. No partial
//! work is rolled back; the tree remains valid either way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

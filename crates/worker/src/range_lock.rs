//! Per-range refresh tokens.
//!
//! A refresh holds a token for its date range while it recomputes. Tokens
//! over overlapping ranges are mutually exclusive; disjoint ranges proceed
//! in parallel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use engine_core::DateRange;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct TokenTable {
    held: Mutex<BTreeMap<u64, DateRange>>,
    next_id: AtomicU64,
    released: Notify,
}

impl TokenTable {
    fn try_insert(&self, range: DateRange) -> Option<u64> {
        let mut held = self.held.lock();
        if held.values().any(|r| r.overlaps(&range)) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        held.insert(id, range);
        Some(id)
    }
}

/// Table of in-flight refresh ranges.
#[derive(Debug, Clone, Default)]
pub struct RangeTokens {
    table: Arc<TokenTable>,
}

impl RangeTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no held token overlaps `range`, then claims it.
    pub async fn acquire(&self, range: DateRange) -> RangeToken {
        loop {
            // Register for wakeups before checking, so a release between the
            // check and the await is not lost.
            let notified = self.table.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(token) = self.try_acquire(range) {
                return token;
            }
            debug!(range = %range, "Waiting for overlapping refresh");
            notified.await;
        }
    }

    /// Claims `range` only if nothing overlapping is held.
    pub fn try_acquire(&self, range: DateRange) -> Option<RangeToken> {
        self.table.try_insert(range).map(|id| RangeToken {
            id,
            range,
            table: self.table.clone(),
        })
    }

    /// Currently held ranges, in claim order.
    pub fn held(&self) -> Vec<DateRange> {
        self.table.held.lock().values().copied().collect()
    }
}

/// Claim on a date range; released on drop.
#[derive(Debug)]
pub struct RangeToken {
    id: u64,
    range: DateRange,
    table: Arc<TokenTable>,
}

impl RangeToken {
    pub fn range(&self) -> DateRange {
        self.range
    }
}

impl Drop for RangeToken {
    fn drop(&mut self) {
        self.table.held.lock().remove(&self.id);
        self.table.released.notify_waiters();
    }
}

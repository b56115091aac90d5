/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! The shared block cursor.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter over logical device blocks.
///
/// Shared by every worker; the single atomic fetch-and-add in [`claim`]
/// guarantees each index in `[0, block_count)` is handed out exactly once.
/// No ordering between workers is specified or required.
///
/// [`claim`]: BlockCursor::claim
#[derive(Debug)]
pub struct BlockCursor {
    next: AtomicU64,
    block_count: u64,
}

impl BlockCursor {
    pub fn new(block_count: u64) -> Self {
        Self {
            next: AtomicU64::new(0),
            block_count,
        }
    }

    /// Claim the next unread block index, or `None` once the device range is
    /// exhausted.
    pub fn claim(&self) -> Option<u64> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed);
        (idx < self.block_count).then_some(idx)
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }
}

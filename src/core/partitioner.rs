//! Batch partitioning
//!
//! Deterministically slices a validated entry list into consecutive batches
//! of at most `capacity` entries. Batch order matches entry order and every
//! entry lands in exactly one batch.

use crate::core::types::{Batch, Entry};

/// Per-call recipient limit enforced by the batch-transfer contract
pub const DEFAULT_BATCH_CAPACITY: usize = 200;

/// Split `entries` into ordered batches with ids `start_id, start_id+1, ..`.
///
/// The first batch is immediately eligible; every subsequent batch is marked
/// as awaiting its predecessor until the controller clears it. Pure function.
pub fn partition(entries: Vec<Entry>, capacity: usize, start_id: u64) -> Vec<Batch> {
    let capacity = capacity.max(1);
    let mut batches = Vec::with_capacity(entries.len().div_ceil(capacity));
    let mut remaining = entries;

    while !remaining.is_empty() {
        let take = remaining.len().min(capacity);
        let rest = remaining.split_off(take);
        let id = start_id + batches.len() as u64;
        let first = batches.is_empty();
        batches.push(Batch::new(id, remaining, !first));
        remaining = rest;
    }

    batches
}

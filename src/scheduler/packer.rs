//! Weight packer.
//!
//! Removes a set of pending calls from the ledger whose combined weight does
//! not exceed the batch capacity. Batch indices follow placement order.
//!
//! - `StrictFifo`: head-only greedy pass over a single queue. A heavy head
//!   that does not fit ends the pass, even if lighter calls wait behind it.
//! - `WeightClass`: buckets are visited heaviest class first, draining each
//!   while its head fits. Buckets whose class exceeds the remaining capacity
//!   are skipped by index. FIFO order holds within each class.

use super::batch::Batch;
use super::ledger::{Ledger, PackingStrategy};

/// Cut one batch of at most `capacity` weight from the ledger.
///
/// `capacity` is clamped to the ledger's own capacity. The result may be
/// empty when nothing fits (or the ledger is empty).
pub fn pack(ledger: &Ledger, capacity: u32) -> Batch {
    let mut batch = Batch::new(capacity.min(ledger.capacity()));
    match ledger.strategy() {
        PackingStrategy::StrictFifo => fill_from_bucket(ledger, 0, &mut batch),
        PackingStrategy::WeightClass => pack_weight_classes(ledger, &mut batch),
    }
    batch
}

fn pack_weight_classes(ledger: &Ledger, batch: &mut Batch) {
    let count = ledger.bucket_count();
    // Bucket `b` holds weight `capacity - b`, so the first bucket that can
    // fit `remaining` is `capacity - remaining`.
    let first_fitting = |batch: &Batch| (ledger.capacity() - batch.remaining()) as usize;

    let mut bucket = first_fitting(batch);
    while bucket < count && batch.remaining() > 0 {
        fill_from_bucket(ledger, bucket, batch);
        bucket = (bucket + 1).max(first_fitting(batch));
    }
}

fn fill_from_bucket(ledger: &Ledger, bucket: usize, batch: &mut Batch) {
    while batch.remaining() > 0 {
        let Some(request) = ledger.pop_front_fitting(bucket, batch.remaining()) else {
            break;
        };
        if request.is_abandoned() {
            tracing::debug!(id = request.id, method = %request.name, "dropping abandoned call");
            continue;
        }
        batch.push(request);
    }
}

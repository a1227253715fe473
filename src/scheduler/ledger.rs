//! Pending request ledger.
//!
//! Holds admitted calls until the packer removes them. Requests live in FIFO
//! buckets behind individual locks; pending weight and the last-admission
//! timestamp are atomics, so admission never waits on a packing pass.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::request::PendingRequest;

/// Ledger layout and the matching packing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackingStrategy {
    /// Single FIFO queue; packing stops at the first item that does not fit.
    StrictFifo,
    /// One FIFO bucket per weight class, packed heaviest class first.
    #[default]
    WeightClass,
}

impl PackingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrictFifo => "fifo",
            Self::WeightClass => "weight-class",
        }
    }
}

impl FromStr for PackingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" | "strict-fifo" => Ok(Self::StrictFifo),
            "weight-class" | "bucketed" => Ok(Self::WeightClass),
            other => Err(format!("unknown packing strategy: {other}")),
        }
    }
}

/// Point-in-time view of the ledger counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerStats {
    pub pending: usize,
    pub total_weight: u64,
}

/// Thread-safe holding area for admitted-but-not-yet-batched calls.
pub struct Ledger {
    buckets: Vec<Mutex<VecDeque<PendingRequest>>>,
    capacity: u32,
    strategy: PackingStrategy,
    total_weight: AtomicU64,
    len: AtomicUsize,
    epoch: Instant,
    /// Microseconds since `epoch` plus one; zero means nothing admitted yet.
    last_admitted: AtomicU64,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("capacity", &self.capacity)
            .field("strategy", &self.strategy)
            .field("pending", &self.len())
            .field("total_weight", &self.total_weight())
            .finish()
    }
}

impl Ledger {
    pub fn new(capacity: u32, strategy: PackingStrategy) -> Self {
        let capacity = capacity.max(1);
        let bucket_count = match strategy {
            PackingStrategy::StrictFifo => 1,
            PackingStrategy::WeightClass => capacity as usize,
        };
        Self {
            buckets: (0..bucket_count).map(|_| Mutex::new(VecDeque::new())).collect(),
            capacity,
            strategy,
            total_weight: AtomicU64::new(0),
            len: AtomicUsize::new(0),
            epoch: Instant::now(),
            last_admitted: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn strategy(&self) -> PackingStrategy {
        self.strategy
    }

    /// Allocate a call identifier.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Enqueue a freshly admitted call and record the admission time.
    pub fn admit(&self, request: PendingRequest) {
        self.push_back(request);
        self.touch(Instant::now());
    }

    /// Enqueue a retried call without touching the quiet-window timer.
    pub fn readmit(&self, request: PendingRequest) {
        self.push_back(request);
    }

    /// Return retried calls ahead of every younger call in their buckets.
    ///
    /// The calls keep their original admission time. Each bucket stays
    /// ordered by admission time, so its head is always its oldest call even
    /// when several retried batches come back out of order.
    pub fn requeue_front(&self, requests: Vec<PendingRequest>) {
        for request in requests.into_iter().rev() {
            self.reserve(request.weight);
            let idx = self.bucket_index(request.weight);
            let mut queue = self.buckets[idx].lock();
            let at = queue
                .iter()
                .position(|held| held.admitted_at >= request.admitted_at)
                .unwrap_or(queue.len());
            queue.insert(at, request);
        }
    }

    /// Restart the quiet window as if a call had just been admitted.
    pub fn advance_last_admitted(&self, at: Instant) {
        self.touch(at);
    }

    pub fn last_admitted_at(&self) -> Option<Instant> {
        match self.last_admitted.load(Ordering::Acquire) {
            0 => None,
            micros => Some(self.epoch + Duration::from_micros(micros - 1)),
        }
    }

    /// Admission time of the oldest call currently held.
    pub fn first_admitted_at(&self) -> Option<Instant> {
        self.buckets
            .iter()
            .filter_map(|bucket| bucket.lock().front().map(|r| r.admitted_at))
            .min()
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats { pending: self.len(), total_weight: self.total_weight() }
    }

    /// Remove every held call (shutdown path).
    pub fn drain_all(&self) -> Vec<PendingRequest> {
        let mut drained = Vec::with_capacity(self.len());
        for bucket in &self.buckets {
            let taken: Vec<PendingRequest> = bucket.lock().drain(..).collect();
            for request in &taken {
                self.release(request.weight);
            }
            drained.extend(taken);
        }
        drained
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Weight of the head of `bucket`, if any.
    pub(crate) fn head_weight(&self, bucket: usize) -> Option<u32> {
        self.buckets.get(bucket)?.lock().front().map(|r| r.weight)
    }

    /// Pop the head of `bucket` only if its weight fits within `remaining`.
    pub(crate) fn pop_front_fitting(&self, bucket: usize, remaining: u32) -> Option<PendingRequest> {
        let mut queue = self.buckets.get(bucket)?.lock();
        if queue.front()?.weight > remaining {
            return None;
        }
        let request = queue.pop_front()?;
        drop(queue);
        self.release(request.weight);
        Some(request)
    }

    fn bucket_index(&self, weight: u32) -> usize {
        match self.strategy {
            PackingStrategy::StrictFifo => 0,
            PackingStrategy::WeightClass => (self.capacity - weight.clamp(1, self.capacity)) as usize,
        }
    }

    fn push_back(&self, request: PendingRequest) {
        // Counters go up before the push so a concurrent pop never releases
        // weight that was not yet reserved.
        self.reserve(request.weight);
        let idx = self.bucket_index(request.weight);
        self.buckets[idx].lock().push_back(request);
    }

    fn reserve(&self, weight: u32) {
        self.total_weight.fetch_add(u64::from(weight), Ordering::AcqRel);
        self.len.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self, weight: u32) {
        self.total_weight.fetch_sub(u64::from(weight), Ordering::AcqRel);
        self.len.fetch_sub(1, Ordering::AcqRel);
    }

    fn touch(&self, at: Instant) {
        let micros = at.saturating_duration_since(self.epoch).as_micros() as u64 + 1;
        self.last_admitted.fetch_max(micros, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::request::{CallArgs, CallHandle};
    use std::sync::Arc;

    fn call(ledger: &Ledger, name: &str, weight: u32) -> (PendingRequest, CallHandle) {
        PendingRequest::new(ledger.next_id(), name.into(), CallArgs::new(), weight)
    }

    #[test]
    fn admit_tracks_weight_and_len() {
        let ledger = Ledger::new(10, PackingStrategy::WeightClass);
        let (a, _ha) = call(&ledger, "a", 3);
        let (b, _hb) = call(&ledger, "b", 4);
        ledger.admit(a);
        ledger.admit(b);
        assert_eq!(ledger.stats(), LedgerStats { pending: 2, total_weight: 7 });
        assert!(ledger.last_admitted_at().is_some());
    }

    #[test]
    fn weight_class_buckets_heaviest_first() {
        let ledger = Ledger::new(5, PackingStrategy::WeightClass);
        let (light, _h1) = call(&ledger, "light", 1);
        let (heavy, _h2) = call(&ledger, "heavy", 5);
        ledger.admit(light);
        ledger.admit(heavy);
        assert_eq!(ledger.bucket_count(), 5);
        assert_eq!(ledger.head_weight(0), Some(5));
        assert_eq!(ledger.head_weight(4), Some(1));
    }

    #[test]
    fn pop_front_fitting_leaves_oversized_head() {
        let ledger = Ledger::new(10, PackingStrategy::StrictFifo);
        let (req, _h) = call(&ledger, "a", 6);
        ledger.admit(req);
        assert!(ledger.pop_front_fitting(0, 5).is_none());
        assert_eq!(ledger.len(), 1);
        let popped = ledger.pop_front_fitting(0, 6).unwrap();
        assert_eq!(popped.weight, 6);
        assert_eq!(ledger.total_weight(), 0);
    }

    fn drain_names(ledger: &Ledger) -> Vec<String> {
        std::iter::from_fn(|| ledger.pop_front_fitting(0, ledger.capacity()))
            .map(|r| r.name)
            .collect()
    }

    #[test]
    fn requeue_front_preserves_order() {
        let ledger = Ledger::new(4, PackingStrategy::StrictFifo);
        let (a, _h1) = call(&ledger, "a", 1);
        let (b, _h2) = call(&ledger, "b", 1);
        let (late, _h0) = call(&ledger, "late", 1);
        ledger.admit(late);
        ledger.requeue_front(vec![a, b]);
        assert_eq!(drain_names(&ledger), vec!["a", "b", "late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_requeue_keeps_oldest_call_at_head() {
        let ledger = Ledger::new(4, PackingStrategy::StrictFifo);
        let (old_a, _h1) = call(&ledger, "old_a", 1);
        let (old_b, _h2) = call(&ledger, "old_b", 1);
        let old_at = old_a.admitted_at;
        tokio::time::advance(Duration::from_millis(10)).await;
        let (new_a, _h3) = call(&ledger, "new_a", 1);
        tokio::time::advance(Duration::from_millis(10)).await;
        let (fresh, _h4) = call(&ledger, "fresh", 1);
        ledger.admit(fresh);

        // The older batch comes back first; the newer one must not hide it.
        ledger.requeue_front(vec![old_a, old_b]);
        ledger.requeue_front(vec![new_a]);

        assert_eq!(ledger.first_admitted_at(), Some(old_at));
        assert_eq!(drain_names(&ledger), vec!["old_a", "old_b", "new_a", "fresh"]);
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_ties_keep_batch_order_ahead_of_queued_calls() {
        let ledger = Ledger::new(4, PackingStrategy::WeightClass);
        let (a, _h1) = call(&ledger, "a", 1);
        let (b, _h2) = call(&ledger, "b", 1);
        let (c, _h3) = call(&ledger, "c", 1);
        ledger.admit(c);
        ledger.requeue_front(vec![a, b]);
        let names: Vec<String> = std::iter::from_fn(|| ledger.pop_front_fitting(3, 4))
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn first_admitted_is_oldest_head() {
        let ledger = Ledger::new(4, PackingStrategy::WeightClass);
        assert!(ledger.first_admitted_at().is_none());
        let (old, _h1) = call(&ledger, "old", 1);
        let old_at = old.admitted_at;
        std::thread::sleep(Duration::from_millis(2));
        let (new, _h2) = call(&ledger, "new", 3);
        ledger.admit(new);
        ledger.admit(old);
        assert_eq!(ledger.first_admitted_at(), Some(old_at));
    }

    #[test]
    fn drain_all_empties_and_conserves_weight() {
        let ledger = Ledger::new(8, PackingStrategy::WeightClass);
        let mut handles = Vec::new();
        for w in 1..=4 {
            let (req, h) = call(&ledger, "m", w);
            ledger.admit(req);
            handles.push(h);
        }
        let drained = ledger.drain_all();
        assert_eq!(drained.len(), 4);
        assert_eq!(drained.iter().map(|r| r.weight).sum::<u32>(), 10);
        assert_eq!(ledger.stats(), LedgerStats { pending: 0, total_weight: 0 });
    }

    #[test]
    fn concurrent_admission_conserves_weight() {
        let ledger = Arc::new(Ledger::new(16, PackingStrategy::WeightClass));
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    let mut handles = Vec::new();
                    for i in 0..100u32 {
                        let weight = (t + i) % 16 + 1;
                        let (req, h) = call(&ledger, "m", weight);
                        ledger.admit(req);
                        handles.push(h);
                    }
                    handles
                })
            })
            .collect();
        let handles: Vec<CallHandle> = threads.into_iter().flat_map(|t| t.join().unwrap()).collect();

        let expected: u64 = (0..8u32)
            .flat_map(|t| (0..100u32).map(move |i| u64::from((t + i) % 16 + 1)))
            .sum();
        assert_eq!(handles.len(), 800);
        assert_eq!(ledger.total_weight(), expected);
        let drained: u64 = ledger.drain_all().iter().map(|r| u64::from(r.weight)).sum();
        assert_eq!(drained, expected);
    }

    #[test]
    fn packing_strategy_parses() {
        assert_eq!("fifo".parse::<PackingStrategy>(), Ok(PackingStrategy::StrictFifo));
        assert_eq!("Weight-Class".parse::<PackingStrategy>(), Ok(PackingStrategy::WeightClass));
        assert!("random".parse::<PackingStrategy>().is_err());
    }
}

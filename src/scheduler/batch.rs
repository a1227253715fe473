//! Batch snapshot removed from the ledger for a single dispatch.

use uuid::Uuid;

use super::request::PendingRequest;

/// A call placed into a batch at a fixed position.
#[derive(Debug)]
pub struct BatchMember {
    /// Dense zero-based position; the only key used to demultiplex results.
    pub index: usize,
    pub request: PendingRequest,
}

/// An ordered set of calls whose combined weight fits one dispatch.
#[derive(Debug)]
pub struct Batch {
    id: Uuid,
    members: Vec<BatchMember>,
    total_weight: u32,
    capacity: u32,
}

impl Batch {
    pub fn new(capacity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            members: Vec::new(),
            total_weight: 0,
            capacity,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn total_weight(&self) -> u32 {
        self.total_weight
    }

    /// Weight still available in this batch.
    pub fn remaining(&self) -> u32 {
        self.capacity - self.total_weight
    }

    /// Check if a request can be added without exceeding capacity.
    pub fn can_add(&self, request: &PendingRequest) -> bool {
        request.weight <= self.remaining()
    }

    /// Place a request at the next index. Returns the assigned index.
    ///
    /// Callers must check [`Batch::can_add`] first; the capacity invariant
    /// is asserted in debug builds.
    pub fn push(&mut self, request: PendingRequest) -> usize {
        debug_assert!(self.can_add(&request), "batch capacity exceeded");
        let index = self.members.len();
        self.total_weight += request.weight;
        self.members.push(BatchMember { index, request });
        index
    }

    pub fn members(&self) -> &[BatchMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Release the requests in index order.
    pub fn into_requests(self) -> Vec<PendingRequest> {
        self.members.into_iter().map(|m| m.request).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::request::CallArgs;

    fn request(id: u64, weight: u32) -> PendingRequest {
        PendingRequest::new(id, format!("m{id}"), CallArgs::new(), weight).0
    }

    #[test]
    fn push_assigns_dense_indices() {
        let mut batch = Batch::new(10);
        assert_eq!(batch.push(request(1, 2)), 0);
        assert_eq!(batch.push(request(2, 3)), 1);
        assert_eq!(batch.push(request(3, 1)), 2);
        let indices: Vec<usize> = batch.members().iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(batch.total_weight(), 6);
        assert_eq!(batch.remaining(), 4);
    }

    #[test]
    fn can_add_respects_capacity() {
        let mut batch = Batch::new(5);
        batch.push(request(1, 4));
        assert!(batch.can_add(&request(2, 1)));
        assert!(!batch.can_add(&request(3, 2)));
    }

    #[test]
    fn into_requests_keeps_index_order() {
        let mut batch = Batch::new(5);
        batch.push(request(7, 1));
        batch.push(request(3, 1));
        let ids: Vec<u64> = batch.into_requests().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![7, 3]);
    }
}

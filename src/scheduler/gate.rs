//! Admission gate: validates calls and routes them to the ledger or to a
//! direct executor call.

use std::sync::Arc;

use tokio::runtime::Handle;

use super::ledger::Ledger;
use super::request::{CallArgs, CallHandle, PendingRequest};
use crate::config::WeightPolicy;
use crate::error::{AdmissionError, CallError};
use crate::executor::ExecutorPool;
use crate::shutdown::ShutdownCoordinator;

pub struct AdmissionGate {
    ledger: Arc<Ledger>,
    weights: WeightPolicy,
    pool: Arc<ExecutorPool>,
    coordinator: Arc<ShutdownCoordinator>,
    runtime: Handle,
}

impl AdmissionGate {
    /// `runtime` runs direct calls, so `submit` also works from threads
    /// outside the runtime.
    pub fn new(
        ledger: Arc<Ledger>,
        weights: WeightPolicy,
        pool: Arc<ExecutorPool>,
        coordinator: Arc<ShutdownCoordinator>,
        runtime: Handle,
    ) -> Self {
        Self { ledger, weights, pool, coordinator, runtime }
    }

    pub fn weights(&self) -> &WeightPolicy {
        &self.weights
    }

    /// Admit one call.
    ///
    /// Weight resolution is explicit, then per-method, then default. Skipped
    /// methods go straight to an executor and never enter the ledger.
    pub fn submit(
        &self,
        name: impl Into<String>,
        arguments: CallArgs,
        explicit_weight: Option<u32>,
    ) -> Result<CallHandle, AdmissionError> {
        let name = name.into();
        if self.weights.is_skipped(&name) {
            return self.forward_direct(name, arguments);
        }

        let capacity = self.ledger.capacity();
        let weight = self.weights.resolve(&name, explicit_weight);
        if weight == 0 || weight > capacity {
            return Err(AdmissionError::InvalidWeight { weight, capacity });
        }

        // Held until the call is in the ledger, so shutdown cannot drain the
        // ledger between the state check and the push.
        let _admitting = self.coordinator.track().ok_or(AdmissionError::ShuttingDown)?;
        let (request, handle) = PendingRequest::new(self.ledger.next_id(), name, arguments, weight);
        tracing::trace!(id = request.id, method = %request.name, weight, "call admitted");
        self.ledger.admit(request);
        Ok(handle)
    }

    fn forward_direct(&self, name: String, arguments: CallArgs) -> Result<CallHandle, AdmissionError> {
        let guard = self.coordinator.track().ok_or(AdmissionError::ShuttingDown)?;
        let (tx, handle) = CallHandle::channel(self.ledger.next_id());
        let Some(executor) = self.pool.next() else {
            let _ = tx.send(Err(CallError::Failed("no executor available".into())));
            return Ok(handle);
        };

        tracing::debug!(method = %name, executor = executor.label(), "sending call directly");
        self.runtime.spawn(async move {
            let _guard = guard;
            let result = executor.call_direct(&name, &arguments).await;
            let _ = tx.send(result);
        });
        Ok(handle)
    }
}

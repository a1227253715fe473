//! Request coalescing: ledger, packing, dispatch and recovery.
//!
//! Calls enter through the [`AdmissionGate`], wait in the [`Ledger`], are cut
//! into weight-bounded batches by the scheduler loop, and are settled by the
//! [`RecoveryPolicy`] once their batch returns.

mod batch;
pub mod demux;
mod dispatcher;
mod gate;
mod ledger;
mod outcome;
mod packer;
pub mod recovery;
mod request;
mod worker;

pub use batch::{Batch, BatchMember};
pub use demux::{decode_response, DecodeError, DeliveryReport};
pub use dispatcher::Dispatcher;
pub use gate::AdmissionGate;
pub use ledger::{Ledger, LedgerStats, PackingStrategy};
pub use outcome::{BatchOutcome, Slot};
pub use packer::pack;
pub use recovery::{classify, RecoveryAction, RecoveryPolicy, Settlement};
pub use request::{CallArgs, CallHandle, CallResult, PendingRequest};
pub use worker::{flush_due, spawn_scheduler, FlushReason, SchedulerContext};

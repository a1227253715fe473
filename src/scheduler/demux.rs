//! Result demultiplexer.
//!
//! Maps an ordered batch response back onto the calls it was built from.
//! Position in the response is the only correlation key: entry `i` belongs
//! to the call placed at batch index `i`.
//!
//! In a partial failure, failure markers consume the ordered error list
//! left to right. If the remote ever reorders that list relative to the
//! markers, errors are silently misattributed.

use serde_json::Value;
use thiserror::Error;

use super::outcome::Slot;
use super::request::PendingRequest;
use crate::error::{CallError, RemoteError};

/// Counts of outcomes handed to callers by one delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl DeliveryReport {
    fn record(&mut self, ok: bool) {
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Resolve every call from a fully successful response.
///
/// Calls without a matching entry resolve as [`CallError::MalformedResponse`].
pub fn deliver_success(requests: Vec<PendingRequest>, results: Vec<Value>) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    let mut results = results.into_iter();
    for (index, request) in requests.into_iter().enumerate() {
        match results.next() {
            Some(value) => {
                request.succeed(value);
                report.record(true);
            }
            None => {
                request.fail(CallError::MalformedResponse { index });
                report.record(false);
            }
        }
    }
    report
}

/// Resolve every call from a partial-failure response.
///
/// Each [`Slot::Failed`] takes the next unused error. A marker with no error
/// left, or a call with no slot at all, resolves as
/// [`CallError::MalformedResponse`].
pub fn deliver_partial(
    requests: Vec<PendingRequest>,
    slots: Vec<Slot>,
    errors: Vec<RemoteError>,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    let mut slots = slots.into_iter();
    let mut errors = errors.into_iter();
    for (index, request) in requests.into_iter().enumerate() {
        match slots.next() {
            Some(Slot::Ok(value)) => {
                request.succeed(value);
                report.record(true);
            }
            Some(Slot::Failed) => {
                let error = errors
                    .next()
                    .map(CallError::Remote)
                    .unwrap_or(CallError::MalformedResponse { index });
                request.fail(error);
                report.record(false);
            }
            None => {
                request.fail(CallError::MalformedResponse { index });
                report.record(false);
            }
        }
    }
    report
}

/// Errors decoding a raw composite response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Response is not an array")]
    NotAnArray,

    #[error("Response entry {position} has no result")]
    MissingResult { position: usize },
}

/// Decode the raw response of a rendered script program.
///
/// The response is an array of `{"id": n, "res": value}` objects in index
/// order; a `res` of `false` marks a failed sub-call.
pub fn decode_response(raw: &Value) -> Result<Vec<Slot>, DecodeError> {
    let entries = raw.as_array().ok_or(DecodeError::NotAnArray)?;
    entries
        .iter()
        .enumerate()
        .map(|(position, entry)| match entry.get("res") {
            Some(Value::Bool(false)) => Ok(Slot::Failed),
            Some(value) => Ok(Slot::Ok(value.clone())),
            None => Err(DecodeError::MissingResult { position }),
        })
        .collect()
}

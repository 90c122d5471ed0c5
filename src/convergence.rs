//! Blocking convergence waits over a result stream.
//!
//! A convergence wait reads results until an observed field reaches one of
//! a set of accepted values, or a bounded number of results has been
//! examined. Settling (waiting out the pipeline depth without checking any
//! value) is the degenerate form.

use std::time::Duration;

use crate::stream::ResultStream;
use crate::traits::{CaptureDevice, CaptureResult, FieldValue, Result, SyncError};

/// A convergence goal: a field name, the accepted values, and the maximum
/// number of results to examine beyond the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceTarget {
    field: String,
    values: Vec<FieldValue>,
    max_results: usize,
}

impl ConvergenceTarget {
    /// Create a target. `values` order is irrelevant; an empty set is
    /// rejected at wait time, before any result is consumed.
    #[must_use]
    pub fn new(field: &str, values: Vec<FieldValue>, max_results: usize) -> Self {
        Self {
            field: field.to_owned(),
            values,
            max_results,
        }
    }

    /// The field examined in each result.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }
}

/// Polls a result stream until a target field value is observed.
///
/// Every individual read is bounded by the per-result timeout supplied at
/// construction; there are no hidden global timeouts.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceWaiter {
    result_timeout: Duration,
}

impl ConvergenceWaiter {
    /// Create a waiter whose individual reads time out after
    /// `result_timeout`.
    #[must_use]
    pub const fn new(result_timeout: Duration) -> Self {
        Self { result_timeout }
    }

    /// Block until a result's field matches any accepted value, reading at
    /// most `max_results + 1` results, and return the matching result.
    ///
    /// The check runs after every read and returns on the first match, so
    /// results past the match are left unread.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidArgument`] if the target's value set is empty
    /// (no result is consumed); [`SyncError::ConvergenceTimeout`] when the
    /// budget is exhausted, carrying the field, the number of results
    /// examined, the last value seen, and the accepted set.
    pub fn wait_for_any(
        &self,
        stream: &ResultStream,
        target: &ConvergenceTarget,
    ) -> Result<CaptureResult> {
        if target.values.is_empty() {
            return Err(SyncError::InvalidArgument(
                "target value set must not be empty".to_owned(),
            ));
        }

        let budget = target.max_results + 1;
        let mut last_seen = None;
        for examined in 1..=budget {
            let result = stream.read(self.result_timeout)?;
            match result.get(&target.field) {
                Some(value) if target.values.contains(value) => {
                    tracing::debug!(
                        field = %target.field,
                        value = %value,
                        examined,
                        "field converged"
                    );
                    return Ok(result);
                }
                Some(value) => {
                    tracing::trace!(field = %target.field, value = %value, "not converged yet");
                    last_seen = Some(value.clone());
                }
                None => {
                    tracing::trace!(field = %target.field, "field absent from result");
                }
            }
        }

        Err(SyncError::ConvergenceTimeout {
            field: target.field.clone(),
            targets: target.values.clone(),
            examined: budget,
            last_seen,
        })
    }

    /// Block until a result's field equals `value`. Single-value
    /// convenience over [`wait_for_any`](Self::wait_for_any).
    pub fn wait_for_value(
        &self,
        stream: &ResultStream,
        field: &str,
        value: FieldValue,
        max_results: usize,
    ) -> Result<CaptureResult> {
        self.wait_for_any(stream, &ConvergenceTarget::new(field, vec![value], max_results))
    }

    /// Read exactly `count` results unconditionally and return the last,
    /// or `None` when `count` is zero.
    ///
    /// Used to let submitted settings settle without checking any value.
    pub fn wait_for_count(
        &self,
        stream: &ResultStream,
        count: usize,
    ) -> Result<Option<CaptureResult>> {
        let mut last = None;
        for _ in 0..count {
            last = Some(stream.read(self.result_timeout)?);
        }
        Ok(last)
    }

    /// Wait out the pipeline depth so previously submitted settings have
    /// taken effect: reads `effective_latency(fallback_latency)` results.
    pub fn wait_for_settings_applied<D: CaptureDevice>(
        &self,
        device: &D,
        stream: &ResultStream,
        fallback_latency: u32,
    ) -> Result<Option<CaptureResult>> {
        let settle = device
            .reported_latency_depth()
            .effective_latency(fallback_latency);
        tracing::debug!(settle, "waiting for settings to apply");
        self.wait_for_count(stream, settle as usize)
    }

    /// Settle, then wait for the target field to converge.
    ///
    /// Devices that do not report the field at all are skipped up front:
    /// the capability check is an explicit precondition, and `Ok(None)` is
    /// returned without consuming any result.
    pub fn wait_for_converged<D: CaptureDevice>(
        &self,
        device: &D,
        stream: &ResultStream,
        target: &ConvergenceTarget,
        fallback_latency: u32,
    ) -> Result<Option<CaptureResult>> {
        if !device.capability_supported(target.field()) {
            tracing::debug!(
                field = target.field(),
                "field not reported by device, skipping convergence wait"
            );
            return Ok(None);
        }

        self.wait_for_settings_applied(device, stream, fallback_latency)?;
        self.wait_for_any(stream, target).map(Some)
    }
}

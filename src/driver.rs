//! Pipeline flushing: submit enough requests that stale results drain.

use crate::session::SessionLifecycle;
use crate::traits::{CaptureDevice, CaptureRequest, Result, SyncError};

/// Submits requests while guaranteeing the pipeline is fully flushed.
///
/// A pipeline of depth `d` may still produce up to `d` results under a
/// previous configuration after a new request is accepted. Padding each
/// burst with `d` extra submissions guarantees that, of the first `d + 1`
/// results read afterwards, at least one was produced entirely under the
/// new configuration.
#[derive(Debug)]
pub struct PipelineDriver<'a, D: CaptureDevice> {
    session: &'a mut SessionLifecycle<D>,
}

impl<'a, D: CaptureDevice> PipelineDriver<'a, D> {
    /// Drive the given session.
    pub fn new(session: &'a mut SessionLifecycle<D>) -> Self {
        Self { session }
    }

    /// Submit `request` `count` times plus enough extra submissions to
    /// flush the pipeline, and return the total number submitted.
    ///
    /// The pad is the device's reported latency depth, or
    /// `fallback_latency` when the device reports none. Submission is
    /// fire-and-forget; this never reads from the result stream.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidArgument`] if `count` is zero (nothing is
    /// submitted), [`SyncError::InvalidState`] if the session is not
    /// `Active`.
    pub fn submit_synchronized(
        &mut self,
        request: &CaptureRequest,
        count: u32,
        fallback_latency: u32,
    ) -> Result<u32> {
        if count < 1 {
            return Err(SyncError::InvalidArgument(
                "count must be at least 1".to_owned(),
            ));
        }

        let latency = self
            .session
            .device()
            .reported_latency_depth()
            .effective_latency(fallback_latency);
        let total = latency + count;

        tracing::debug!(count, latency, total, "submitting synchronized burst");
        for _ in 0..total {
            self.session.submit(request)?;
        }
        Ok(total)
    }

    /// Submit `request` once, padded for synchronization.
    pub fn submit_once(&mut self, request: &CaptureRequest, fallback_latency: u32) -> Result<u32> {
        self.submit_synchronized(request, 1, fallback_latency)
    }
}

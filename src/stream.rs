//! Ordered, single-consumer delivery of capture results with bounded reads.
//!
//! The dispatch context owns a [`ResultSink`] and enqueues results in
//! submission order; the test-driver thread reads them back through the
//! [`ResultStream`], each read bounded by an explicit timeout. The channel
//! is the only state shared between the two execution contexts.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use crate::traits::{CaptureResult, Result, SyncError};

/// Producer half of a result stream, handed to the dispatch context.
///
/// Sending never blocks; the queue is bounded only by producer pace.
#[derive(Debug, Clone)]
pub struct ResultSink {
    tx: Sender<CaptureResult>,
}

impl ResultSink {
    /// Enqueue one result for the consumer.
    ///
    /// Returns `false` if the consumer has dropped its stream, which the
    /// producer may treat as a request to stop.
    pub fn send(&self, result: CaptureResult) -> bool {
        self.tx.send(result).is_ok()
    }
}

/// Consumer half of a result stream.
///
/// Results are consumed destructively: each result is read exactly once,
/// in the exact order the producer enqueued them.
#[derive(Debug)]
pub struct ResultStream {
    rx: Receiver<CaptureResult>,
}

impl ResultStream {
    /// Block until the next result arrives or `timeout` elapses.
    ///
    /// A timeout does not corrupt the stream; a later `read` may still
    /// succeed. Fails with [`SyncError::StreamClosed`] once the producer
    /// is gone and no buffered results remain.
    pub fn read(&self, timeout: Duration) -> Result<CaptureResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => {
                tracing::trace!(sequence = result.sequence(), "capture result received");
                Ok(result)
            }
            Err(RecvTimeoutError::Timeout) => Err(SyncError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(SyncError::StreamClosed),
        }
    }

    /// Discard any buffered but unread results without blocking.
    ///
    /// Returns the number of results discarded. Used at teardown so a
    /// session can be closed with results still in flight.
    pub fn drain(&self) -> usize {
        let mut discarded = 0;
        loop {
            match self.rx.try_recv() {
                Ok(_) => discarded += 1,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if discarded > 0 {
            tracing::debug!(discarded, "drained unread capture results");
        }
        discarded
    }
}

/// Create a connected sink/stream pair for one pipeline session.
#[must_use]
pub fn result_channel() -> (ResultSink, ResultStream) {
    let (tx, rx) = mpsc::channel();
    (ResultSink { tx }, ResultStream { rx })
}

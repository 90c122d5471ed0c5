//! Capture-Sync: pipelined capture synchronization primitives
//!
//! This library drives an asynchronous, latency-bearing request/result
//! pipeline (the camera capture model) to a known, verifiable state before
//! assertions run: submit enough requests to flush stale configurations,
//! read results back in order with bounded blocking, and wait for observed
//! fields to converge, all gated by a session lifecycle state machine.

pub mod convergence;
pub mod driver;
pub mod harness;
pub mod session;
pub mod sim;
pub mod stream;
pub mod traits;

pub use convergence::{ConvergenceTarget, ConvergenceWaiter};
pub use driver::PipelineDriver;
pub use session::{SessionHandle, SessionLifecycle};
pub use sim::SimulatedPipeline;
pub use stream::{result_channel, ResultSink, ResultStream};
pub use traits::{
    CaptureDevice, CaptureRequest, CaptureResult, FieldValue, LatencyModel, OutputTarget,
    SessionState, SyncError,
};

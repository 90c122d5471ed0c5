//! End-to-end synchronization tests against the simulated pipeline.
//!
//! These exercise the full stack: lifecycle state machine, synchronized
//! submission, ordered result delivery from the dispatch thread, and
//! convergence waiting, with explicit timeouts everywhere.

use std::time::Duration;

use capture_sync::traits::fields::{
    AE_STATE, AE_STATE_CONVERGED, AE_STATE_FLASH_REQUIRED, AE_STATE_SEARCHING,
};
use capture_sync::{
    CaptureRequest, ConvergenceTarget, ConvergenceWaiter, FieldValue, LatencyModel, OutputTarget,
    PipelineDriver, ResultStream, SessionLifecycle, SessionState, SimulatedPipeline, SyncError,
};
use serial_test::serial;

const WAIT: Duration = Duration::from_secs(5);
const FALLBACK_LATENCY: u32 = 4;

/// Open and configure a session, returning it with its result stream.
fn activate(
    mut pipeline: SimulatedPipeline,
) -> (SessionLifecycle<SimulatedPipeline>, ResultStream) {
    let stream = pipeline.take_stream().expect("stream already taken");
    let mut session = SessionLifecycle::new(pipeline);
    session.open().expect("open failed");
    session
        .await_state(SessionState::Open, WAIT)
        .expect("session did not open");
    session
        .configure(&[OutputTarget::new(1280, 720)])
        .expect("configure failed");
    session
        .await_state(SessionState::Active, WAIT)
        .expect("session did not activate");
    (session, stream)
}

fn close(session: &mut SessionLifecycle<SimulatedPipeline>) {
    session.close().expect("close failed");
    session
        .await_state(SessionState::Closed, WAIT)
        .expect("session did not close");
}

#[test]
fn test_unknown_latency_flush_then_convergence() {
    // Device reports no latency; the fallback of 4 pads a single capture
    // to 5 submissions, and the 5th result reports convergence.
    let pipeline = SimulatedPipeline::new()
        .with_reported_latency(LatencyModel::Unknown)
        .with_scripted_field(0, AE_STATE, AE_STATE_SEARCHING)
        .with_scripted_field(1, AE_STATE, AE_STATE_SEARCHING)
        .with_scripted_field(2, AE_STATE, AE_STATE_SEARCHING)
        .with_scripted_field(3, AE_STATE, AE_STATE_SEARCHING)
        .with_scripted_field(4, AE_STATE, AE_STATE_CONVERGED);
    let (mut session, stream) = activate(pipeline);

    let total = PipelineDriver::new(&mut session)
        .submit_once(&CaptureRequest::new(), FALLBACK_LATENCY)
        .expect("submit_once failed");
    assert_eq!(total, 5);

    let waiter = ConvergenceWaiter::new(WAIT);
    let settled = waiter
        .wait_for_count(&stream, FALLBACK_LATENCY as usize)
        .expect("settle failed")
        .expect("four results were read");
    assert_eq!(settled.sequence(), 3);

    let target = ConvergenceTarget::new(
        AE_STATE,
        vec![AE_STATE_CONVERGED, AE_STATE_FLASH_REQUIRED],
        10,
    );
    let converged = waiter
        .wait_for_any(&stream, &target)
        .expect("wait_for_any failed");
    assert_eq!(converged.sequence(), 4);

    close(&mut session);
}

#[test]
fn test_convergence_timeout_when_pipeline_never_converges() {
    let mut pipeline = SimulatedPipeline::new().with_reported_latency(LatencyModel::Unknown);
    for sequence in 0..15 {
        pipeline = pipeline.with_scripted_field(sequence, AE_STATE, AE_STATE_SEARCHING);
    }
    let (mut session, stream) = activate(pipeline);

    let total = PipelineDriver::new(&mut session)
        .submit_synchronized(&CaptureRequest::new(), 11, FALLBACK_LATENCY)
        .expect("submit_synchronized failed");
    assert_eq!(total, 15);

    let waiter = ConvergenceWaiter::new(WAIT);
    waiter
        .wait_for_settings_applied(session.device(), &stream, FALLBACK_LATENCY)
        .expect("settle failed");

    let target = ConvergenceTarget::new(AE_STATE, vec![AE_STATE_CONVERGED], 10);
    let err = waiter
        .wait_for_any(&stream, &target)
        .expect_err("convergence should exhaust its budget");
    assert_eq!(
        err,
        SyncError::ConvergenceTimeout {
            field: AE_STATE.to_owned(),
            targets: vec![AE_STATE_CONVERGED],
            examined: 11,
            last_seen: Some(AE_STATE_SEARCHING),
        }
    );

    close(&mut session);
}

#[test]
fn test_unsupported_field_is_skipped_not_timed_out() {
    let pipeline = SimulatedPipeline::new().without_capability(AE_STATE);
    let (mut session, stream) = activate(pipeline);

    let waiter = ConvergenceWaiter::new(WAIT);
    let target = ConvergenceTarget::new(AE_STATE, vec![AE_STATE_CONVERGED], 10);
    let converged = waiter
        .wait_for_converged(session.device(), &stream, &target, FALLBACK_LATENCY)
        .expect("wait_for_converged failed");
    assert!(converged.is_none());

    close(&mut session);
}

#[test]
#[serial]
fn test_read_timeout_leaves_session_and_stream_usable() {
    let (mut session, stream) = activate(SimulatedPipeline::new());

    let err = stream
        .read(Duration::from_millis(20))
        .expect_err("nothing was submitted, read should time out");
    assert_eq!(err, SyncError::Timeout(Duration::from_millis(20)));

    // Both the stream and the session survive the abandoned wait.
    session
        .submit(&CaptureRequest::new())
        .expect("submit after timeout failed");
    let result = stream.read(WAIT).expect("read after timeout failed");
    assert_eq!(result.sequence(), 0);

    assert_eq!(stream.drain(), 0);
    close(&mut session);
}

#[test]
#[serial]
fn test_results_stay_ordered_under_load() {
    let (mut session, stream) = activate(SimulatedPipeline::new().with_pipeline_depth(3));

    let request = CaptureRequest::new().with_setting("control.mode", FieldValue::Int(7));
    for _ in 0..50 {
        session.submit(&request).expect("submit failed");
    }

    for expected in 0..50 {
        let result = stream.read(WAIT).expect("read failed");
        assert_eq!(result.sequence(), expected);
    }

    close(&mut session);
}

#[test]
fn test_teardown_with_results_still_in_flight() {
    let (mut session, stream) = activate(SimulatedPipeline::new());

    for _ in 0..8 {
        session.submit(&CaptureRequest::new()).expect("submit failed");
    }

    // Read a couple, abandon the rest, and tear down anyway.
    let waiter = ConvergenceWaiter::new(WAIT);
    waiter
        .wait_for_count(&stream, 2)
        .expect("wait_for_count failed");

    // Close is ordered after the submissions, so all eight results were
    // produced; six are still buffered.
    close(&mut session);
    assert_eq!(stream.drain(), 6);
}

#[test]
fn test_reconfiguration_replaces_active_session() {
    let (mut session, stream) = activate(SimulatedPipeline::new());

    session
        .configure(&[OutputTarget::new(640, 480)])
        .expect("reconfigure failed");
    session
        .await_state(SessionState::Active, WAIT)
        .expect("session did not reactivate");

    session.submit(&CaptureRequest::new()).expect("submit failed");
    let result = stream.read(WAIT).expect("read failed");
    assert_eq!(result.sequence(), 0);

    close(&mut session);
}

#[test]
fn test_submission_count_matches_known_latency() {
    let pipeline = SimulatedPipeline::new().with_reported_latency(LatencyModel::Known(3));
    let (mut session, stream) = activate(pipeline);

    let total = PipelineDriver::new(&mut session)
        .submit_synchronized(&CaptureRequest::new(), 2, 99)
        .expect("submit_synchronized failed");
    assert_eq!(total, 5);

    // One result per submission, no duplication, no drops.
    let waiter = ConvergenceWaiter::new(WAIT);
    let last = waiter
        .wait_for_count(&stream, 5)
        .expect("wait_for_count failed")
        .expect("five results were read");
    assert_eq!(last.sequence(), 4);

    let err = stream
        .read(Duration::from_millis(50))
        .expect_err("no sixth result should exist");
    assert_eq!(err, SyncError::Timeout(Duration::from_millis(50)));

    close(&mut session);
}

//! Demo runner: drives the registered synchronization scenarios against
//! the simulated pipeline and reports totals.

use std::time::Duration;

use capture_sync::harness::{run_scenarios, Outcome, RunStats, Scenario};
use capture_sync::traits::fields::{AE_STATE, AE_STATE_CONVERGED, AE_STATE_SEARCHING};
use capture_sync::traits::Result;
use capture_sync::{
    CaptureRequest, ConvergenceTarget, ConvergenceWaiter, FieldValue, LatencyModel, OutputTarget,
    PipelineDriver, ResultStream, SessionLifecycle, SessionState, SimulatedPipeline, SyncError,
};

const WAIT: Duration = Duration::from_secs(5);
const FALLBACK_LATENCY: u32 = 4;

const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "flush_unknown_latency",
        run: flush_unknown_latency,
    },
    Scenario {
        name: "ae_convergence",
        run: ae_convergence,
    },
    Scenario {
        name: "unsupported_field_skip",
        run: unsupported_field_skip,
    },
];

fn main() {
    tracing_subscriber::fmt::init();

    let mut stats = RunStats::new();
    run_scenarios(SCENARIOS, &mut stats);
    tracing::info!(
        passed = stats.passed(),
        failed = stats.failed(),
        skipped = stats.skipped(),
        "run complete"
    );

    if !stats.all_passed() {
        std::process::exit(1);
    }
}

fn report(result: Result<Outcome>) -> Outcome {
    match result {
        Ok(outcome) => outcome,
        Err(err) => Outcome::Failed(err.to_string()),
    }
}

fn activate(
    mut pipeline: SimulatedPipeline,
) -> Result<(SessionLifecycle<SimulatedPipeline>, ResultStream)> {
    let stream = pipeline
        .take_stream()
        .ok_or_else(|| SyncError::Session("result stream already taken".to_owned()))?;
    let mut session = SessionLifecycle::new(pipeline);
    session.open()?;
    session.await_state(SessionState::Open, WAIT)?;
    session.configure(&[OutputTarget::new(1280, 720)])?;
    session.await_state(SessionState::Active, WAIT)?;
    Ok((session, stream))
}

fn teardown(session: &mut SessionLifecycle<SimulatedPipeline>, stream: &ResultStream) -> Result<()> {
    stream.drain();
    session.close()?;
    session.await_state(SessionState::Closed, WAIT)?;
    Ok(())
}

fn flush_unknown_latency() -> Outcome {
    report(flush_unknown_latency_impl())
}

/// A device that reports no latency still settles within the fallback pad.
fn flush_unknown_latency_impl() -> Result<Outcome> {
    let pipeline = SimulatedPipeline::new()
        .with_pipeline_depth(2)
        .with_reported_latency(LatencyModel::Unknown);
    let (mut session, stream) = activate(pipeline)?;

    let request = CaptureRequest::new().with_setting("control.mode", FieldValue::Int(1));
    let total = PipelineDriver::new(&mut session).submit_once(&request, FALLBACK_LATENCY)?;
    if total != FALLBACK_LATENCY + 1 {
        return Ok(Outcome::Failed(format!(
            "expected {} submissions, saw {total}",
            FALLBACK_LATENCY + 1
        )));
    }

    let waiter = ConvergenceWaiter::new(WAIT);
    waiter.wait_for_settings_applied(session.device(), &stream, FALLBACK_LATENCY)?;
    let settled = stream.read(WAIT)?;
    if settled.get("control.mode") != Some(&FieldValue::Int(1)) {
        return Ok(Outcome::Failed(format!(
            "settings not applied after settling: {settled:?}"
        )));
    }

    teardown(&mut session, &stream)?;
    Ok(Outcome::Passed)
}

fn ae_convergence() -> Outcome {
    report(ae_convergence_impl())
}

/// Auto-exposure searches for two results, then converges.
fn ae_convergence_impl() -> Result<Outcome> {
    let pipeline = SimulatedPipeline::new()
        .with_pipeline_depth(1)
        .with_reported_latency(LatencyModel::Known(1))
        .with_scripted_field(0, AE_STATE, AE_STATE_SEARCHING)
        .with_scripted_field(1, AE_STATE, AE_STATE_SEARCHING)
        .with_scripted_field(2, AE_STATE, AE_STATE_CONVERGED);
    let (mut session, stream) = activate(pipeline)?;

    PipelineDriver::new(&mut session).submit_synchronized(&CaptureRequest::new(), 5, 0)?;

    let waiter = ConvergenceWaiter::new(WAIT);
    let target = ConvergenceTarget::new(AE_STATE, vec![AE_STATE_CONVERGED], 10);
    let converged = waiter.wait_for_converged(session.device(), &stream, &target, 0)?;
    let outcome = match converged {
        Some(result) if result.sequence() == 2 => Outcome::Passed,
        Some(result) => Outcome::Failed(format!(
            "converged on unexpected result {}",
            result.sequence()
        )),
        None => Outcome::Failed("ae state unexpectedly unsupported".to_owned()),
    };

    teardown(&mut session, &stream)?;
    Ok(outcome)
}

fn unsupported_field_skip() -> Outcome {
    report(unsupported_field_skip_impl())
}

/// Devices that never report the field are skipped, not timed out.
fn unsupported_field_skip_impl() -> Result<Outcome> {
    let pipeline = SimulatedPipeline::new().without_capability(AE_STATE);
    let (mut session, stream) = activate(pipeline)?;

    let waiter = ConvergenceWaiter::new(WAIT);
    let target = ConvergenceTarget::new(AE_STATE, vec![AE_STATE_CONVERGED], 10);
    let converged = waiter.wait_for_converged(session.device(), &stream, &target, FALLBACK_LATENCY)?;

    teardown(&mut session, &stream)?;
    match converged {
        None => Ok(Outcome::Skipped("ae state not reported by device".to_owned())),
        Some(_) => Ok(Outcome::Failed(
            "convergence wait ran against an unsupported field".to_owned(),
        )),
    }
}

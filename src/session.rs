//! Session lifecycle state machine gating request submission.
//!
//! One [`SessionLifecycle`] exists per device session. Request edges
//! (`open`, `configure`, `close`) run on the test-driver thread and move
//! the machine into a transient state before invoking the device; the
//! device's dispatch context completes them through a [`SessionHandle`].
//! The transient states themselves encode "one asynchronous request
//! outstanding", so a conflicting request is rejected by the state check
//! alone.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::traits::{
    CaptureDevice, CaptureRequest, OutputTarget, Result, SessionState, SyncError,
};

#[derive(Debug)]
struct StateCell {
    state: SessionState,
    fault: Option<String>,
}

/// Callback sink the device's dispatch context reports completions to.
///
/// Cloneable so the device can move it into its own dispatch thread. Each
/// completion publishes the new state (readable at any time through
/// [`SessionLifecycle::state`]) and wakes any pending
/// [`SessionLifecycle::await_state`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cell: Arc<Mutex<StateCell>>,
    notify: Sender<SessionState>,
}

impl SessionHandle {
    /// The session finished opening.
    pub fn on_opened(&self) {
        self.complete("on_opened", SessionState::Opening, SessionState::Open);
    }

    /// Output configuration completed; requests may now be submitted.
    pub fn on_configured(&self) {
        self.complete("on_configured", SessionState::Configuring, SessionState::Active);
    }

    /// Output configuration failed; the session is unusable for capture.
    pub fn on_configure_failed(&self, reason: &str) {
        self.fail(format!("configure failed: {reason}"));
    }

    /// The session finished closing and released its resources.
    pub fn on_closed(&self) {
        self.complete("on_closed", SessionState::Closing, SessionState::Closed);
    }

    /// The device reported a fatal failure.
    pub fn on_error(&self, reason: &str) {
        self.fail(reason.to_owned());
    }

    fn complete(&self, callback: &'static str, from: SessionState, to: SessionState) {
        let mut cell = self.cell.lock();
        if cell.state == from {
            cell.state = to;
            drop(cell);
            tracing::debug!(callback, from = %from, to = %to, "session transition");
            let _ = self.notify.send(to);
        } else {
            tracing::warn!(
                callback,
                state = %cell.state,
                "completion callback in unexpected state, ignored"
            );
        }
    }

    fn fail(&self, reason: String) {
        let mut cell = self.cell.lock();
        if cell.state == SessionState::Closed {
            tracing::warn!(%reason, "error reported after close, ignored");
            return;
        }
        tracing::error!(%reason, from = %cell.state, "session entered error state");
        cell.state = SessionState::Error;
        cell.fault = Some(reason);
        drop(cell);
        let _ = self.notify.send(SessionState::Error);
    }
}

/// State machine owning one device session.
///
/// All blocking waits are bounded by caller-supplied timeouts; the current
/// state is always readable without waiting.
#[derive(Debug)]
pub struct SessionLifecycle<D: CaptureDevice> {
    device: D,
    cell: Arc<Mutex<StateCell>>,
    notify_tx: Sender<SessionState>,
    notify_rx: Receiver<SessionState>,
}

impl<D: CaptureDevice> SessionLifecycle<D> {
    /// Wrap a device in a fresh lifecycle, starting in `Idle`.
    pub fn new(device: D) -> Self {
        let (notify_tx, notify_rx) = mpsc::channel();
        Self {
            device,
            cell: Arc::new(Mutex::new(StateCell {
                state: SessionState::Idle,
                fault: None,
            })),
            notify_tx,
            notify_rx,
        }
    }

    /// The most recently published session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.cell.lock().state
    }

    /// The device's failure message, once the session is in `Error`.
    #[must_use]
    pub fn fault(&self) -> Option<String> {
        self.cell.lock().fault.clone()
    }

    /// Borrow the underlying device (capabilities, reported latency).
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Mint a callback handle for the device's dispatch context.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            cell: Arc::clone(&self.cell),
            notify: self.notify_tx.clone(),
        }
    }

    /// Request the session be opened. Completion arrives asynchronously;
    /// block with [`await_state`](Self::await_state) if needed.
    pub fn open(&mut self) -> Result<()> {
        let handle = self.handle();
        self.request(
            "open",
            &[SessionState::Idle],
            SessionState::Opening,
            |device| device.open_session(handle),
        )
    }

    /// Request output configuration. Legal from `Open` and, for
    /// reconfiguration, from `Active`.
    pub fn configure(&mut self, targets: &[OutputTarget]) -> Result<()> {
        self.request(
            "configure",
            &[SessionState::Open, SessionState::Active],
            SessionState::Configuring,
            |device| device.configure_session(targets),
        )
    }

    /// Request the session be closed.
    ///
    /// Legal from any state: closing an `Idle` session completes
    /// immediately, closing a `Closing` or `Closed` session is a no-op,
    /// and an `Error` session is still closed so resources are released.
    pub fn close(&mut self) -> Result<()> {
        match self.state() {
            SessionState::Closing | SessionState::Closed => {
                tracing::debug!("close requested on an already-closing session, ignored");
                Ok(())
            }
            SessionState::Idle => {
                self.publish(SessionState::Closed);
                Ok(())
            }
            _ => self.request(
                "close",
                &[
                    SessionState::Opening,
                    SessionState::Open,
                    SessionState::Configuring,
                    SessionState::Active,
                    SessionState::Error,
                ],
                SessionState::Closing,
                CaptureDevice::close_session,
            ),
        }
    }

    /// Submit one request into the pipeline. Only legal while `Active`.
    pub fn submit(&mut self, request: &CaptureRequest) -> Result<()> {
        let state = self.state();
        if state != SessionState::Active {
            return Err(SyncError::InvalidState {
                operation: "submit a request",
                state,
            });
        }
        self.device.submit_request(request)
    }

    /// Block until the session reaches `target` or `timeout` elapses.
    ///
    /// Fails fast with [`SyncError::Session`] if the machine lands in
    /// `Error` while a non-teardown state is awaited, so callers do not
    /// burn their timeout on a state that can no longer arrive.
    pub fn await_state(&self, target: SessionState, timeout: Duration) -> Result<SessionState> {
        let deadline = Instant::now() + timeout;
        loop {
            let (current, fault) = {
                let cell = self.cell.lock();
                (cell.state, cell.fault.clone())
            };
            if current == target {
                return Ok(current);
            }
            if current == SessionState::Error
                && !matches!(
                    target,
                    SessionState::Error | SessionState::Closing | SessionState::Closed
                )
            {
                return Err(SyncError::Session(
                    fault.unwrap_or_else(|| "device reported an error".to_owned()),
                ));
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(target = %target, current = %current, "await_state timed out");
                return Err(SyncError::Timeout(timeout));
            }
            // Re-check the published state on every wakeup; stale or
            // missed notifications are harmless.
            let _ = self.notify_rx.recv_timeout(deadline - now);
        }
    }

    fn request(
        &mut self,
        operation: &'static str,
        allowed_from: &[SessionState],
        transient: SessionState,
        issue: impl FnOnce(&mut D) -> Result<()>,
    ) -> Result<()> {
        {
            let mut cell = self.cell.lock();
            if !allowed_from.contains(&cell.state) {
                return Err(SyncError::InvalidState {
                    operation,
                    state: cell.state,
                });
            }
            cell.state = transient;
        }
        tracing::debug!(operation, state = %transient, "session request issued");

        match issue(&mut self.device) {
            Ok(()) => Ok(()),
            Err(err) => {
                // The request never reached the device; no completion
                // callback will arrive for it.
                let mut cell = self.cell.lock();
                cell.state = SessionState::Error;
                cell.fault = Some(err.to_string());
                drop(cell);
                let _ = self.notify_tx.send(SessionState::Error);
                Err(err)
            }
        }
    }

    fn publish(&self, state: SessionState) {
        self.cell.lock().state = state;
        tracing::debug!(state = %state, "session transition");
        let _ = self.notify_tx.send(state);
    }
}

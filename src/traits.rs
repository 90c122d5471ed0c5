//! Core types, error taxonomy, and the device trait seam.

use std::collections::HashMap;
use std::time::Duration;

use crate::session::SessionHandle;

/// A discrete metadata value carried by capture results.
///
/// Capture pipelines report state machines (auto-exposure, auto-focus, ...)
/// as small discrete values; convergence waiting only ever compares for
/// equality, so floating-point values are deliberately not representable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    /// Integer-valued metadata (state machine values, counters).
    Int(i64),
    /// Boolean-valued metadata (lock flags and similar).
    Bool(bool),
    /// String-valued metadata.
    Str(String),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

/// Well-known metadata field names and their discrete values.
///
/// Mirrors the auto-exposure state vocabulary reported by camera-class
/// pipelines so tests read without magic numbers.
pub mod fields {
    use super::FieldValue;

    /// Auto-exposure state field name.
    pub const AE_STATE: &str = "control.aeState";

    /// AE is off or has not started measuring.
    pub const AE_STATE_INACTIVE: FieldValue = FieldValue::Int(0);
    /// AE is still adjusting exposure.
    pub const AE_STATE_SEARCHING: FieldValue = FieldValue::Int(1);
    /// AE has settled on a good exposure.
    pub const AE_STATE_CONVERGED: FieldValue = FieldValue::Int(2);
    /// AE values are locked.
    pub const AE_STATE_LOCKED: FieldValue = FieldValue::Int(3);
    /// AE has settled but flash is required for a good capture.
    pub const AE_STATE_FLASH_REQUIRED: FieldValue = FieldValue::Int(4);
}

/// An immutable capture configuration submitted into the pipeline.
///
/// Requests carry no identity beyond submission order; the pipeline
/// produces exactly one [`CaptureResult`] per submitted request, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureRequest {
    settings: HashMap<String, FieldValue>,
}

impl CaptureRequest {
    /// Create an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a setting to this request.
    #[must_use]
    pub fn with_setting(mut self, key: &str, value: FieldValue) -> Self {
        self.settings.insert(key.to_owned(), value);
        self
    }

    /// Look up a setting by key.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<&FieldValue> {
        self.settings.get(key)
    }

    /// All settings carried by this request.
    #[must_use]
    pub const fn settings(&self) -> &HashMap<String, FieldValue> {
        &self.settings
    }
}

/// An immutable key-value result produced asynchronously by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    sequence: u64,
    fields: HashMap<String, FieldValue>,
}

impl CaptureResult {
    /// Create a result with the given sequence number and no fields.
    #[must_use]
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            fields: HashMap::new(),
        }
    }

    /// Add a metadata field to this result.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: FieldValue) -> Self {
        self.fields.insert(key.to_owned(), value);
        self
    }

    /// Position of this result in the pipeline's delivery order.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Look up a metadata field by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
}

/// An output the session renders capture results into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputTarget {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

impl OutputTarget {
    /// Create a new output target.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// The pipeline's settle depth as reported by the device.
///
/// Different devices report different (or no) pipeline depth; every
/// consumer supplies its own fallback so behavior is explicit per call
/// site rather than resting on a global constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyModel {
    /// The device reports a fixed settle depth of `n` results.
    Known(u32),
    /// The device does not report a settle depth.
    Unknown,
}

impl LatencyModel {
    /// The depth to assume for flushing: the known depth, or `fallback`.
    #[must_use]
    pub const fn effective_latency(self, fallback: u32) -> u32 {
        match self {
            Self::Known(n) => n,
            Self::Unknown => fallback,
        }
    }
}

/// State of a capture session, published by the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session requested yet.
    Idle,
    /// `open` issued, waiting for the device to report readiness.
    Opening,
    /// Session open, no outputs configured.
    Open,
    /// `configure` issued, waiting for output configuration to complete.
    Configuring,
    /// Outputs configured; requests may be submitted.
    Active,
    /// `close` issued, waiting for the device to release resources.
    Closing,
    /// Session closed; terminal.
    Closed,
    /// Device or driver failure; terminal for capture, closable.
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Configuring => "configuring",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Error type for capture synchronization operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Malformed caller input, detected before any side effect.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A bounded wait elapsed without the expected event.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A convergence wait exhausted its result budget without a match.
    #[error(
        "field {field:?} never reached any of {targets:?} within {examined} \
         results (last seen: {last_seen:?})"
    )]
    ConvergenceTimeout {
        /// The field that was examined.
        field: String,
        /// The accepted values that were never observed.
        targets: Vec<FieldValue>,
        /// How many results were examined before giving up.
        examined: usize,
        /// The field's value in the last examined result, if present.
        last_seen: Option<FieldValue>,
    },

    /// An operation attempted in a session state that does not permit it.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        /// The operation that was refused.
        operation: &'static str,
        /// The session state at the time of the attempt.
        state: SessionState,
    },

    /// The device reported a fatal session failure.
    #[error("session failed: {0}")]
    Session(String),

    /// The result producer is gone and no buffered results remain.
    #[error("result stream closed by producer")]
    StreamClosed,
}

/// Result type for capture synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Abstraction over the device/session collaborator driving one pipeline.
///
/// Implementations deliver completion callbacks through the
/// [`SessionHandle`] registered at open time, from their own dispatch
/// context, and enqueue one result per submitted request in submission
/// order.
pub trait CaptureDevice {
    /// Begin opening a session; completion arrives as `on_opened` or
    /// `on_error` on `handle`.
    fn open_session(&mut self, handle: SessionHandle) -> Result<()>;

    /// Begin configuring outputs; completion arrives as `on_configured`
    /// or `on_configure_failed`.
    fn configure_session(&mut self, targets: &[OutputTarget]) -> Result<()>;

    /// Enqueue one request; exactly one result is produced eventually,
    /// preserving submission order.
    fn submit_request(&mut self, request: &CaptureRequest) -> Result<()>;

    /// Begin closing the session; completion arrives as `on_closed`.
    fn close_session(&mut self) -> Result<()>;

    /// Whether the device reports `field` in its capture results.
    fn capability_supported(&self, field: &str) -> bool;

    /// The pipeline depth the device advertises, if any.
    fn reported_latency_depth(&self) -> LatencyModel;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_latency_ignores_fallback() {
        for n in [0u32, 1, 4, 17] {
            assert_eq!(LatencyModel::Known(n).effective_latency(99), n);
        }
    }

    #[test]
    fn test_unknown_latency_uses_fallback() {
        assert_eq!(LatencyModel::Unknown.effective_latency(0), 0);
        assert_eq!(LatencyModel::Unknown.effective_latency(4), 4);
    }

    #[test]
    fn test_request_settings_round_trip() {
        let request = CaptureRequest::new()
            .with_setting("control.aeLock", FieldValue::Bool(true))
            .with_setting(fields::AE_STATE, fields::AE_STATE_SEARCHING);

        assert_eq!(
            request.setting("control.aeLock"),
            Some(&FieldValue::Bool(true))
        );
        assert_eq!(request.setting("missing"), None);
    }

    #[test]
    fn test_result_fields() {
        let result = CaptureResult::new(7).with_field(fields::AE_STATE, fields::AE_STATE_CONVERGED);
        assert_eq!(result.sequence(), 7);
        assert_eq!(
            result.get(fields::AE_STATE),
            Some(&fields::AE_STATE_CONVERGED)
        );
    }

    #[test]
    fn test_error_display_names_state() {
        let err = SyncError::InvalidState {
            operation: "configure",
            state: SessionState::Idle,
        };
        assert_eq!(err.to_string(), "cannot configure while session is idle");
    }

    #[test]
    fn test_convergence_timeout_display_carries_diagnostics() {
        let err = SyncError::ConvergenceTimeout {
            field: fields::AE_STATE.to_owned(),
            targets: vec![fields::AE_STATE_CONVERGED],
            examined: 11,
            last_seen: Some(fields::AE_STATE_SEARCHING),
        };
        let text = err.to_string();
        assert!(text.contains("control.aeState"));
        assert!(text.contains("11"));
    }
}

//! Simulated capture pipeline for hardware-free testing.
//!
//! [`SimulatedPipeline`] implements [`CaptureDevice`] with a real dispatch
//! thread, so completion callbacks and results genuinely arrive from a
//! second execution context. The pipeline depth actually applied to
//! results is configured independently of the latency the device reports,
//! which lets tests exercise both the `Known` and `Unknown` flushing
//! paths against the same behavior.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::session::SessionHandle;
use crate::stream::{result_channel, ResultSink, ResultStream};
use crate::traits::{
    CaptureDevice, CaptureRequest, CaptureResult, FieldValue, LatencyModel, OutputTarget, Result,
    SyncError,
};

enum Command {
    Configure,
    Submit(CaptureRequest),
    Close,
}

#[derive(Clone)]
struct SimConfig {
    depth: usize,
    script: Vec<HashMap<String, FieldValue>>,
    fail_open: Option<String>,
    fail_configure: Option<String>,
}

struct Worker {
    commands: Sender<Command>,
    thread: JoinHandle<()>,
}

/// A capture device backed by an in-process dispatch thread.
pub struct SimulatedPipeline {
    reported: LatencyModel,
    config: SimConfig,
    unsupported: HashSet<String>,
    sink: ResultSink,
    stream: Option<ResultStream>,
    worker: Option<Worker>,
}

impl Default for SimulatedPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPipeline {
    /// Create a zero-depth pipeline that reports `Known(0)` latency.
    #[must_use]
    pub fn new() -> Self {
        let (sink, stream) = result_channel();
        Self {
            reported: LatencyModel::Known(0),
            config: SimConfig {
                depth: 0,
                script: Vec::new(),
                fail_open: None,
                fail_configure: None,
            },
            unsupported: HashSet::new(),
            sink,
            stream: Some(stream),
            worker: None,
        }
    }

    /// Set the depth actually applied to results: result `n` reflects the
    /// settings of request `n - depth` (or the initial settings while the
    /// pipeline is still filling).
    #[must_use]
    pub fn with_pipeline_depth(mut self, depth: u32) -> Self {
        self.config.depth = depth as usize;
        self
    }

    /// Set the latency the device advertises, independently of the depth
    /// actually applied.
    #[must_use]
    pub fn with_reported_latency(mut self, model: LatencyModel) -> Self {
        self.reported = model;
        self
    }

    /// Force `field` to `value` in the result with the given sequence
    /// number, overriding whatever the pipeline would have produced.
    #[must_use]
    pub fn with_scripted_field(mut self, sequence: usize, field: &str, value: FieldValue) -> Self {
        if self.config.script.len() <= sequence {
            self.config.script.resize_with(sequence + 1, HashMap::new);
        }
        if let Some(overrides) = self.config.script.get_mut(sequence) {
            overrides.insert(field.to_owned(), value);
        }
        self
    }

    /// Declare `field` unsupported: it is never reported in results and
    /// `capability_supported` returns `false` for it.
    #[must_use]
    pub fn without_capability(mut self, field: &str) -> Self {
        self.unsupported.insert(field.to_owned());
        self
    }

    /// Make `open` fail asynchronously with `reason`.
    #[must_use]
    pub fn failing_open(mut self, reason: &str) -> Self {
        self.config.fail_open = Some(reason.to_owned());
        self
    }

    /// Make `configure` fail asynchronously with `reason`.
    #[must_use]
    pub fn failing_configure(mut self, reason: &str) -> Self {
        self.config.fail_configure = Some(reason.to_owned());
        self
    }

    /// Take the consumer half of the pipeline's result stream.
    ///
    /// Yields `Some` exactly once; the stream is a single-consumer
    /// resource.
    pub fn take_stream(&mut self) -> Option<ResultStream> {
        self.stream.take()
    }

    fn send(&self, command: Command) -> Result<()> {
        match &self.worker {
            Some(worker) => worker
                .commands
                .send(command)
                .map_err(|_| SyncError::Session("dispatch context stopped".to_owned())),
            None => Err(SyncError::Session("session not open".to_owned())),
        }
    }
}

impl CaptureDevice for SimulatedPipeline {
    fn open_session(&mut self, handle: SessionHandle) -> Result<()> {
        if self.worker.is_some() {
            return Err(SyncError::Session("session already running".to_owned()));
        }

        let (commands, inbox) = mpsc::channel();
        let sink = self.sink.clone();
        let config = self.config.clone();
        let unsupported = self.unsupported.clone();
        let thread = thread::Builder::new()
            .name("capture-sim-dispatch".to_owned())
            .spawn(move || dispatch(&handle, &sink, &config, &unsupported, &inbox))
            .map_err(|err| SyncError::Session(format!("failed to spawn dispatch: {err}")))?;

        self.worker = Some(Worker { commands, thread });
        Ok(())
    }

    fn configure_session(&mut self, _targets: &[OutputTarget]) -> Result<()> {
        self.send(Command::Configure)
    }

    fn submit_request(&mut self, request: &CaptureRequest) -> Result<()> {
        self.send(Command::Submit(request.clone()))
    }

    fn close_session(&mut self) -> Result<()> {
        self.send(Command::Close)
    }

    fn capability_supported(&self, field: &str) -> bool {
        !self.unsupported.contains(field)
    }

    fn reported_latency_depth(&self) -> LatencyModel {
        self.reported
    }
}

impl Drop for SimulatedPipeline {
    /// Stop the dispatch context gracefully and join it.
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.send(Command::Close);
            let _ = worker.thread.join();
        }
    }
}

/// Dispatch-thread body: report readiness, then serve commands in order.
fn dispatch(
    handle: &SessionHandle,
    sink: &ResultSink,
    config: &SimConfig,
    unsupported: &HashSet<String>,
    inbox: &Receiver<Command>,
) {
    if let Some(reason) = &config.fail_open {
        handle.on_error(reason);
    } else {
        handle.on_opened();
    }

    let mut inflight: VecDeque<CaptureRequest> = VecDeque::new();
    let mut effective: HashMap<String, FieldValue> = HashMap::new();
    let mut sequence: u64 = 0;

    while let Ok(command) = inbox.recv() {
        match command {
            Command::Configure => match &config.fail_configure {
                Some(reason) => handle.on_configure_failed(reason),
                None => handle.on_configured(),
            },
            Command::Submit(request) => {
                inflight.push_back(request);
                // The request submitted `depth` ago takes effect now.
                if inflight.len() > config.depth {
                    if let Some(applied) = inflight.pop_front() {
                        for (key, value) in applied.settings() {
                            effective.insert(key.clone(), value.clone());
                        }
                    }
                }

                let mut result = CaptureResult::new(sequence);
                for (key, value) in &effective {
                    if !unsupported.contains(key) {
                        result = result.with_field(key, value.clone());
                    }
                }
                let script_idx = usize::try_from(sequence).unwrap_or(usize::MAX);
                if let Some(overrides) = config.script.get(script_idx) {
                    for (key, value) in overrides {
                        if !unsupported.contains(key) {
                            result = result.with_field(key, value.clone());
                        }
                    }
                }
                sequence += 1;

                if !sink.send(result) {
                    // Consumer is gone; only teardown remains.
                    tracing::debug!("result consumer dropped, discarding further results");
                }
            }
            Command::Close => {
                handle.on_closed();
                break;
            }
        }
    }
}

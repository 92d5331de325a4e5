//! Batch runs: scan, process one file at a time, verify.
//!
//! The orchestrator owns the run state; a single worker thread does the
//! work while `pause`, `resume` and `cancel` are called from the control
//! thread. Progress flows out through an `mpsc` channel of [`BatchEvent`]s.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::{NormalizeError, Result};
use crate::models::{BatchEvent, Job, JobOutcome, Phase, PhaseStatus, ProgressSink, RunOutcome};
use crate::planner::FileProcessor;
use crate::process::{CancelToken, ProcessSupervisor};
use crate::scanner::{mirror_output_path, prepare_output, scan_wav_files};
use crate::verify::verify_outputs;

/// How often a paused worker re-checks for resume or cancel.
const PAUSE_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Scanning,
    Running,
    Paused,
    Completing,
}

/// Arguments of [`BatchOrchestrator::start`].
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub settings: Settings,
    /// Keep the processed set from an earlier run instead of resetting it.
    pub resume: bool,
}

struct RunState {
    status: RunStatus,
    running: bool,
    paused: bool,
    /// Bumped by every `pause`; a job that saw it change was interrupted.
    pause_epoch: u64,
    processed: HashSet<PathBuf>,
    total: usize,
    settings: Option<Settings>,
    events: Option<Sender<BatchEvent>>,
}

impl RunState {
    fn idle() -> Self {
        Self {
            status: RunStatus::Idle,
            running: false,
            paused: false,
            pause_epoch: 0,
            processed: HashSet::new(),
            total: 0,
            settings: None,
            events: None,
        }
    }
}

struct Shared {
    state: Mutex<RunState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Forwards planner notifications into the event channel.
///
/// Nothing is forwarded once the run is canceled.
pub struct ChannelSink {
    tx: Sender<BatchEvent>,
    cancel: CancelToken,
}

impl ChannelSink {
    pub fn new(tx: Sender<BatchEvent>, cancel: CancelToken) -> Self {
        Self { tx, cancel }
    }
}

impl ProgressSink for ChannelSink {
    fn phase(&self, job_id: &str, phase: Phase, status: PhaseStatus, percent: f32) {
        if self.cancel.is_canceled() {
            return;
        }
        let _ = self.tx.send(BatchEvent::Phase {
            job_id: job_id.to_string(),
            phase,
            status,
            percent,
        });
    }

    fn log(&self, job_id: &str, phase: Phase, message: &str) {
        debug!(job_id, %phase, "{}", message);
        if self.cancel.is_canceled() {
            return;
        }
        let _ = self.tx.send(BatchEvent::Log {
            job_id: job_id.to_string(),
            phase,
            message: message.to_string(),
        });
    }
}

/// Runs one batch at a time on a background thread.
pub struct BatchOrchestrator {
    shared: Arc<Shared>,
    supervisor: Arc<ProcessSupervisor>,
    processor: Arc<dyn FileProcessor>,
    worker: Mutex<Option<JoinHandle<RunOutcome>>>,
}

impl BatchOrchestrator {
    pub fn new(supervisor: Arc<ProcessSupervisor>, processor: Arc<dyn FileProcessor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RunState::idle()),
                wake: Condvar::new(),
            }),
            supervisor,
            processor,
            worker: Mutex::new(None),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.shared.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Snapshot of the resume set, sorted.
    pub fn processed_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.shared.lock().processed.iter().cloned().collect();
        files.sort();
        files
    }

    /// Seed the resume set before a `resume = true` start.
    pub fn restore_processed(&self, files: impl IntoIterator<Item = PathBuf>) -> Result<()> {
        let mut state = self.shared.lock();
        if state.running {
            return Err(NormalizeError::Busy);
        }
        state.processed.extend(files);
        Ok(())
    }

    /// Validate the request and start the worker thread.
    pub fn start(&self, request: StartRequest, events: Sender<BatchEvent>) -> Result<()> {
        if !request.input.is_dir() {
            return Err(NormalizeError::invalid_path(
                &request.input,
                "input folder does not exist",
            ));
        }
        if !request.output.is_dir() {
            return Err(NormalizeError::invalid_path(
                &request.output,
                "output folder does not exist",
            ));
        }
        request.settings.validate()?;

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.shared.lock();
            if state.running {
                return Err(NormalizeError::Busy);
            }
            if !request.resume {
                state.processed.clear();
            }
            self.supervisor.reset();
            state.running = true;
            state.paused = false;
            state.status = RunStatus::Scanning;
            state.total = 0;
            state.settings = Some(request.settings.clone());
            state.events = Some(events.clone());
        }
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        let run = BatchRun {
            shared: Arc::clone(&self.shared),
            supervisor: Arc::clone(&self.supervisor),
            processor: Arc::clone(&self.processor),
            events,
        };
        let spawned = thread::Builder::new()
            .name("bulknorm-batch".into())
            .spawn(move || run.execute(request));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                *self.shared.lock() = RunState::idle();
                Err(NormalizeError::io("Failed to start batch worker", e))
            }
        }
    }

    /// Stop the in-flight file and hold until `resume` or `cancel`.
    ///
    /// Returns `false` when there is nothing to pause.
    pub fn pause(&self) -> bool {
        let events = {
            let mut state = self.shared.lock();
            if !state.running || state.paused {
                return false;
            }
            state.paused = true;
            state.pause_epoch += 1;
            state.status = RunStatus::Paused;
            state.events.clone()
        };
        self.supervisor.hold();
        info!("Batch paused");
        if let Some(tx) = events {
            let _ = tx.send(BatchEvent::Paused);
        }
        true
    }

    pub fn resume(&self) -> bool {
        let events = {
            let mut state = self.shared.lock();
            if !state.running || !state.paused {
                return false;
            }
            state.paused = false;
            state.status = RunStatus::Running;
            state.events.clone()
        };
        self.supervisor.release();
        self.shared.wake.notify_all();
        info!("Batch resumed");
        if let Some(tx) = events {
            let _ = tx.send(BatchEvent::Resumed);
        }
        true
    }

    /// End the run, dropping the resume set. Terminal.
    pub fn cancel(&self) -> bool {
        {
            let mut state = self.shared.lock();
            if !state.running {
                return false;
            }
            state.paused = false;
            state.processed.clear();
        }
        self.supervisor.kill_all();
        self.shared.wake.notify_all();
        info!("Batch canceled");
        true
    }

    /// Wait for the current worker, if any, and return its outcome.
    pub fn join(&self) -> Option<RunOutcome> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(handle.join().unwrap_or_else(|_| RunOutcome::Errored {
            path: None,
            message: "batch worker panicked".to_string(),
        }))
    }
}

enum Gate {
    /// Carries the pause epoch seen when the gate opened.
    Proceed(u64),
    Canceled,
}

/// Everything the worker thread needs.
struct BatchRun {
    shared: Arc<Shared>,
    supervisor: Arc<ProcessSupervisor>,
    processor: Arc<dyn FileProcessor>,
    events: Sender<BatchEvent>,
}

impl BatchRun {
    fn send(&self, event: BatchEvent) {
        if self.supervisor.is_canceled() && !matches!(event, BatchEvent::Finished { .. }) {
            return;
        }
        let _ = self.events.send(event);
    }

    /// Block while paused; report cancellation.
    fn gate(&self) -> Gate {
        let mut state = self.shared.lock();
        loop {
            if self.supervisor.is_canceled() {
                return Gate::Canceled;
            }
            if !state.paused {
                return Gate::Proceed(state.pause_epoch);
            }
            state = self
                .shared
                .wake
                .wait_timeout(state, PAUSE_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn pause_epoch(&self) -> u64 {
        self.shared.lock().pause_epoch
    }

    fn execute(self, request: StartRequest) -> RunOutcome {
        let outcome = self.run(&request);
        match &outcome {
            RunOutcome::Verified { matched, .. } => info!("Batch verified: {} files", matched),
            RunOutcome::Canceled => info!("Batch canceled"),
            RunOutcome::VerificationFailed { missing } => {
                error!("Verification failed: {} files not processed", missing.len())
            }
            RunOutcome::Errored { message, .. } => error!("Batch failed: {}", message),
        }

        {
            let mut state = self.shared.lock();
            *state = RunState::idle();
        }
        let _ = self.events.send(BatchEvent::Finished {
            outcome: outcome.clone(),
        });
        outcome
    }

    fn run(&self, request: &StartRequest) -> RunOutcome {
        let settings = &request.settings;
        let scan = scan_wav_files(&request.input);
        let files = scan.files;
        if files.is_empty() {
            return RunOutcome::Errored {
                path: Some(request.input.clone()),
                message: format!("No WAV files found in {}", request.input.display()),
            };
        }

        let already = {
            let mut state = self.shared.lock();
            state.total = files.len();
            if !state.paused {
                state.status = RunStatus::Running;
            }
            files.iter().filter(|f| state.processed.contains(*f)).count()
        };
        info!(
            total = files.len(),
            already,
            skipped_dirs = scan.skipped_dirs,
            "Starting batch {} -> {}",
            request.input.display(),
            request.output.display()
        );
        self.send(BatchEvent::Started {
            total: files.len(),
            already_processed: already,
            skipped_dirs: scan.skipped_dirs,
        });

        let sink = ChannelSink::new(self.events.clone(), self.supervisor.cancel_token());
        let total = files.len();
        let mut completed = already;
        let mut index = 0;
        while index < total {
            let epoch = match self.gate() {
                Gate::Proceed(epoch) => epoch,
                Gate::Canceled => return RunOutcome::Canceled,
            };
            let input = &files[index];
            if self.shared.lock().processed.contains(input) {
                index += 1;
                continue;
            }

            let output = mirror_output_path(&request.input, &request.output, input);
            if let Err(e) = prepare_output(&output) {
                self.send(BatchEvent::FileFailed {
                    path: input.clone(),
                    message: e.to_string(),
                });
                return RunOutcome::Errored {
                    path: Some(input.clone()),
                    message: e.to_string(),
                };
            }

            let job = Job {
                id: job_id(index, input),
                input: input.clone(),
                output,
                cancel: self.supervisor.cancel_token(),
            };
            self.send(BatchEvent::FileStarted {
                job_id: job.id.clone(),
                path: input.clone(),
                index,
            });

            let result = self.processor.process(&job, settings, &sink);
            if self.supervisor.is_canceled() {
                return RunOutcome::Canceled;
            }
            let interrupted = self.pause_epoch() != epoch;
            match result {
                Ok(JobOutcome::Completed) => {
                    self.shared.lock().processed.insert(input.clone());
                    completed += 1;
                    self.send(BatchEvent::FileCompleted {
                        job_id: job.id,
                        path: input.clone(),
                        completed,
                        total,
                        percent: completed as f64 / total as f64 * 100.0,
                    });
                    index += 1;
                }
                Ok(JobOutcome::Canceled) | Err(_) if interrupted => {
                    warn!(job_id = %job.id, "Interrupted by pause; will redo {}", input.display());
                    self.send(BatchEvent::FileInterrupted { job_id: job.id });
                }
                Ok(JobOutcome::Canceled) => return RunOutcome::Canceled,
                Err(e) => {
                    error!(job_id = %job.id, "Failed to process {}: {}", input.display(), e);
                    self.send(BatchEvent::FileFailed {
                        path: input.clone(),
                        message: e.to_string(),
                    });
                    return RunOutcome::Errored {
                        path: Some(input.clone()),
                        message: e.to_string(),
                    };
                }
            }
        }

        {
            let mut state = self.shared.lock();
            state.status = RunStatus::Completing;
        }
        let report = verify_outputs(&files, &request.input, &request.output, !settings.auto_trim);
        if report.passed() {
            RunOutcome::Verified {
                matched: report.matched,
                mismatched: report.mismatched,
            }
        } else {
            RunOutcome::VerificationFailed {
                missing: report.missing,
            }
        }
    }
}

/// Job ids are unique per run and readable in logs.
fn job_id(index: usize, input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}_{}", index, stem)
}

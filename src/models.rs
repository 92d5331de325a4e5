use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::NormalizeError;
use crate::process::CancelToken;

/// Stage of a single file's processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Detect,
    Analyze,
    Render,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Detect => "detect",
            Phase::Analyze => "analyze",
            Phase::Render => "render",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Start,
    Progress,
    Done,
}

/// One file's unit of work. Never persisted.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub cancel: CancelToken,
}

/// Non-silent span kept by trimming, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceRegion {
    pub start: f64,
    pub end: f64,
}

impl VoiceRegion {
    pub fn len(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Values measured by the first `loudnorm` pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParams {
    pub input_i: f64,
    pub input_lra: f64,
    pub input_tp: f64,
    pub input_thresh: f64,
    pub target_offset: f64,
}

/// How a single job ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Canceled,
}

/// Terminal state of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every input has an output. `mismatched` lists informational
    /// duration / sample-rate differences.
    Verified {
        matched: usize,
        mismatched: Vec<String>,
    },
    VerificationFailed { missing: Vec<PathBuf> },
    Canceled,
    Errored {
        path: Option<PathBuf>,
        message: String,
    },
}

impl RunOutcome {
    /// The library error for a run that left inputs without outputs.
    pub fn verification_error(&self) -> Option<NormalizeError> {
        match self {
            RunOutcome::VerificationFailed { missing } => Some(NormalizeError::Verification {
                missing: missing.clone(),
            }),
            _ => None,
        }
    }
}

/// Sent from the batch worker thread to whoever drives the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    Started {
        total: usize,
        already_processed: usize,
        skipped_dirs: usize,
    },
    FileStarted {
        job_id: String,
        path: PathBuf,
        index: usize,
    },
    Phase {
        job_id: String,
        phase: Phase,
        status: PhaseStatus,
        percent: f32,
    },
    Log {
        job_id: String,
        phase: Phase,
        message: String,
    },
    FileCompleted {
        job_id: String,
        path: PathBuf,
        completed: usize,
        total: usize,
        percent: f64,
    },
    /// Pause killed the in-flight file; it will be redone after resume.
    FileInterrupted { job_id: String },
    FileFailed { path: PathBuf, message: String },
    Paused,
    Resumed,
    Finished { outcome: RunOutcome },
}

/// Sent from the preview worker thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PreviewEvent {
    FileReady {
        original: PathBuf,
        rendered: PathBuf,
        relative: PathBuf,
        temp_root: PathBuf,
    },
    FileFailed { path: PathBuf, message: String },
    Done { count: usize, temp_root: PathBuf },
}

/// Receives phase notifications and diagnostic lines from the planner.
///
/// Implementations must return quickly; they run on the worker thread.
pub trait ProgressSink: Send + Sync {
    fn phase(&self, job_id: &str, phase: Phase, status: PhaseStatus, percent: f32);
    fn log(&self, job_id: &str, phase: Phase, message: &str);
}

/// Sink that only writes to the tracing log.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn phase(&self, job_id: &str, phase: Phase, status: PhaseStatus, percent: f32) {
        tracing::debug!(job_id, %phase, ?status, percent, "phase");
    }

    fn log(&self, job_id: &str, phase: Phase, message: &str) {
        tracing::debug!(job_id, %phase, "{}", message);
    }
}

/// One row of a `scan` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEntry {
    /// Path relative to the scanned root.
    pub path: PathBuf,
    pub duration_secs: f64,
    pub sample_rate: Option<u32>,
    pub bits_per_sample: Option<u16>,
    pub float: bool,
}

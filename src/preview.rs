//! Quick preview renders of a random sample into a temp directory.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::{NormalizeError, Result};
use crate::models::{Job, JobOutcome, PreviewEvent, TracingSink};
use crate::planner::FileProcessor;
use crate::process::ProcessSupervisor;
use crate::scanner::{prepare_output, scan_wav_files};

/// Name prefix of preview temp directories; stale ones are purged by prefix.
pub const PREVIEW_PREFIX: &str = "ban-preview-";
pub const DEFAULT_SAMPLE_SIZE: usize = 5;
pub const MAX_SAMPLE_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub input: PathBuf,
    pub settings: Settings,
    pub sample_size: usize,
    /// Fixed seed for a reproducible sample.
    pub seed: Option<u64>,
}

/// Remove every `ban-preview-*` directory directly under `parent`.
pub fn purge_stale_previews(parent: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(parent) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let is_preview = entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with(PREVIEW_PREFIX));
        if !is_preview || !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => debug!("Could not remove {}: {}", entry.path().display(), e),
        }
    }
    if removed > 0 {
        info!("Removed {} stale preview directories", removed);
    }
    removed
}

fn sample_with<R: Rng + ?Sized>(files: &[PathBuf], size: usize, rng: &mut R) -> Vec<PathBuf> {
    let mut picked: Vec<PathBuf> = files.choose_multiple(rng, size).cloned().collect();
    picked.sort();
    picked
}

/// Draw up to `size` files (clamped to 1..=50), sorted by path.
pub fn choose_sample(files: &[PathBuf], size: usize, seed: Option<u64>) -> Vec<PathBuf> {
    let size = size.clamp(1, MAX_SAMPLE_SIZE);
    match seed {
        Some(seed) => sample_with(files, size, &mut StdRng::seed_from_u64(seed)),
        None => sample_with(files, size, &mut rand::rng()),
    }
}

/// Sequential, pause-free variant of the batch runner.
pub struct PreviewOrchestrator {
    supervisor: Arc<ProcessSupervisor>,
    processor: Arc<dyn FileProcessor>,
    temp_parent: PathBuf,
    worker: Mutex<Option<JoinHandle<usize>>>,
}

impl PreviewOrchestrator {
    pub fn new(supervisor: Arc<ProcessSupervisor>, processor: Arc<dyn FileProcessor>) -> Self {
        Self::with_temp_parent(supervisor, processor, std::env::temp_dir())
    }

    /// Keep preview directories under `temp_parent` instead of the system temp dir.
    pub fn with_temp_parent(
        supervisor: Arc<ProcessSupervisor>,
        processor: Arc<dyn FileProcessor>,
        temp_parent: PathBuf,
    ) -> Self {
        Self {
            supervisor,
            processor,
            temp_parent,
            worker: Mutex::new(None),
        }
    }

    /// Purge old previews, sample, and start rendering. Returns the temp root.
    pub fn start(&self, request: PreviewRequest, events: Sender<PreviewEvent>) -> Result<PathBuf> {
        if !request.input.is_dir() {
            return Err(NormalizeError::invalid_path(
                &request.input,
                "input folder does not exist",
            ));
        }
        request.settings.validate()?;

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(NormalizeError::Busy);
        }
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        let files = scan_wav_files(&request.input).files;
        if files.is_empty() {
            return Err(NormalizeError::invalid_path(
                &request.input,
                "no WAV files found for preview",
            ));
        }
        let sample = choose_sample(&files, request.sample_size, request.seed);

        purge_stale_previews(&self.temp_parent);
        let temp_root = tempfile::Builder::new()
            .prefix(PREVIEW_PREFIX)
            .tempdir_in(&self.temp_parent)
            .map_err(|e| NormalizeError::io("Failed to create preview directory", e))?
            .keep();
        info!(
            sample = sample.len(),
            of = files.len(),
            "Previewing into {}",
            temp_root.display()
        );

        self.supervisor.reset();
        let run = PreviewRun {
            supervisor: Arc::clone(&self.supervisor),
            processor: Arc::clone(&self.processor),
            input_root: request.input,
            settings: request.settings,
            temp_root: temp_root.clone(),
            events,
        };
        let handle = thread::Builder::new()
            .name("bulknorm-preview".into())
            .spawn(move || run.execute(sample))
            .map_err(|e| NormalizeError::io("Failed to start preview worker", e))?;
        *worker = Some(handle);
        Ok(temp_root)
    }

    /// Stop the preview; the temp directory is left for the next purge.
    pub fn cancel(&self) {
        self.supervisor.kill_all();
    }

    /// Wait for the worker and return how many files were rendered.
    pub fn join(&self) -> Option<usize> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(handle.join().unwrap_or(0))
    }
}

struct PreviewRun {
    supervisor: Arc<ProcessSupervisor>,
    processor: Arc<dyn FileProcessor>,
    input_root: PathBuf,
    settings: Settings,
    temp_root: PathBuf,
    events: Sender<PreviewEvent>,
}

impl PreviewRun {
    fn execute(self, sample: Vec<PathBuf>) -> usize {
        let mut ready = 0;
        for (idx, original) in sample.iter().enumerate() {
            if self.supervisor.is_canceled() {
                info!("Preview canceled after {} files", ready);
                return ready;
            }
            let relative = original
                .strip_prefix(&self.input_root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(original.file_name().unwrap_or_default()));
            let rendered = self.temp_root.join(&relative);
            let job = Job {
                id: format!("preview_{idx}"),
                input: original.clone(),
                output: rendered.clone(),
                cancel: self.supervisor.cancel_token(),
            };

            let result = prepare_output(&rendered)
                .and_then(|()| self.processor.process(&job, &self.settings, &TracingSink));
            match result {
                Ok(JobOutcome::Completed) => {
                    ready += 1;
                    let _ = self.events.send(PreviewEvent::FileReady {
                        original: original.clone(),
                        rendered,
                        relative,
                        temp_root: self.temp_root.clone(),
                    });
                }
                Ok(JobOutcome::Canceled) => return ready,
                Err(NormalizeError::Canceled) => return ready,
                Err(e) => {
                    error!("Preview failed for {}: {}", original.display(), e);
                    let _ = self.events.send(PreviewEvent::FileFailed {
                        path: original.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if ready < sample.len() {
            warn!("{} of {} preview files failed", sample.len() - ready, sample.len());
        }
        let _ = self.events.send(PreviewEvent::Done {
            count: ready,
            temp_root: self.temp_root.clone(),
        });
        ready
    }
}

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin_cmd;
use bulknorm::batch::{BatchOrchestrator, RunStatus, StartRequest};
use bulknorm::config::Settings;
use bulknorm::error::{NormalizeError, Result};
use bulknorm::inspect;
use bulknorm::models::{BatchEvent, Job, JobOutcome, PreviewEvent, ProgressSink, RunOutcome};
use bulknorm::planner::{FileProcessor, Planner};
use bulknorm::preview::{PreviewOrchestrator, PreviewRequest};
use bulknorm::process::{Invocation, ProcessSupervisor};
use bulknorm::tools::ToolPaths;

const WAIT: Duration = Duration::from_secs(10);

/// Write a mono 16-bit WAV built from `(seconds, amplitude)` segments of a
/// 440 Hz sine. An amplitude of 0.0 gives digital silence.
fn generate_wav(dir: &Path, filename: &str, sample_rate: u32, segments: &[(f64, f32)]) -> PathBuf {
    let num_channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let num_samples: usize = segments
        .iter()
        .map(|(secs, _)| (sample_rate as f64 * secs) as usize)
        .sum();
    let byte_rate = sample_rate * num_channels as u32 * bits_per_sample as u32 / 8;
    let block_align = num_channels * bits_per_sample / 8;
    let data_size = (num_samples * num_channels as usize * (bits_per_sample as usize / 8)) as u32;

    let path = dir.join(filename);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut file = std::fs::File::create(&path).unwrap();

    // RIFF header
    file.write_all(b"RIFF").unwrap();
    file.write_all(&(36 + data_size).to_le_bytes()).unwrap();
    file.write_all(b"WAVE").unwrap();

    // fmt chunk
    file.write_all(b"fmt ").unwrap();
    file.write_all(&16u32.to_le_bytes()).unwrap();
    file.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
    file.write_all(&num_channels.to_le_bytes()).unwrap();
    file.write_all(&sample_rate.to_le_bytes()).unwrap();
    file.write_all(&byte_rate.to_le_bytes()).unwrap();
    file.write_all(&block_align.to_le_bytes()).unwrap();
    file.write_all(&bits_per_sample.to_le_bytes()).unwrap();

    // data chunk
    file.write_all(b"data").unwrap();
    file.write_all(&data_size.to_le_bytes()).unwrap();

    let mut samples = Vec::with_capacity(num_samples * 2);
    let mut n = 0usize;
    for (secs, amplitude) in segments {
        for _ in 0..(sample_rate as f64 * secs) as usize {
            let t = n as f64 / sample_rate as f64;
            let sample = amplitude * (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32;
            samples.extend_from_slice(&((sample * i16::MAX as f32) as i16).to_le_bytes());
            n += 1;
        }
    }
    file.write_all(&samples).unwrap();

    path
}

fn tone(dir: &Path, filename: &str) -> PathBuf {
    generate_wav(dir, filename, 8000, &[(0.5, 0.5)])
}

// --- fake processor ---

/// Copies input to output. Optionally blocks once on a named file by running
/// `sleep` through the supervisor, fails on a named file, or "completes" a
/// named file without writing it.
struct FakeProcessor {
    supervisor: Arc<ProcessSupervisor>,
    calls: Mutex<Vec<PathBuf>>,
    block_once: Option<String>,
    blocked: Mutex<HashSet<String>>,
    blocking: AtomicBool,
    fail_on: Option<String>,
    skip_output: Option<String>,
}

impl FakeProcessor {
    fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self {
            supervisor,
            calls: Mutex::new(Vec::new()),
            block_once: None,
            blocked: Mutex::new(HashSet::new()),
            blocking: AtomicBool::new(false),
            fail_on: None,
            skip_output: None,
        }
    }

    fn names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn wait_until_blocking(&self) {
        let deadline = Instant::now() + WAIT;
        while !self.blocking.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "processor never blocked");
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl FileProcessor for FakeProcessor {
    fn process(&self, job: &Job, _: &Settings, _: &dyn ProgressSink) -> Result<JobOutcome> {
        let name = job.input.file_name().unwrap().to_string_lossy().into_owned();
        self.calls.lock().unwrap().push(job.input.clone());

        if self.block_once.as_deref() == Some(name.as_str())
            && self.blocked.lock().unwrap().insert(name.clone())
        {
            self.blocking.store(true, Ordering::SeqCst);
            let sleep = Invocation::new("sleep", "render").arg("30");
            let output = self.supervisor.run(&sleep, &job.id, None, |_| {})?;
            self.blocking.store(false, Ordering::SeqCst);
            if job.cancel.is_canceled() {
                return Ok(JobOutcome::Canceled);
            }
            if !output.status.success() {
                return Err(NormalizeError::ToolFailed {
                    tool: "sleep".into(),
                    stage: "render",
                    code: output.status.code(),
                    detail: String::new(),
                });
            }
        }

        if self.fail_on.as_deref() == Some(name.as_str()) {
            return Err(NormalizeError::ToolFailed {
                tool: "ffmpeg".into(),
                stage: "render",
                code: Some(1),
                detail: "Invalid data found when processing input".into(),
            });
        }
        if self.skip_output.as_deref() != Some(name.as_str()) {
            std::fs::copy(&job.input, &job.output)
                .map_err(|e| NormalizeError::io("copy", e))?;
        }
        Ok(JobOutcome::Completed)
    }
}

struct Fixture {
    input: tempfile::TempDir,
    output: tempfile::TempDir,
    files: Vec<PathBuf>,
}

fn fixture(count: usize) -> Fixture {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let files = (0..count)
        .map(|i| tone(input.path(), &format!("take{i:02}.wav")))
        .collect();
    Fixture {
        input,
        output,
        files,
    }
}

impl Fixture {
    fn request(&self, resume: bool) -> StartRequest {
        StartRequest {
            input: self.input.path().to_path_buf(),
            output: self.output.path().to_path_buf(),
            settings: Settings::default(),
            resume,
        }
    }
}

fn recv_until(rx: &Receiver<BatchEvent>, mut done: impl FnMut(&BatchEvent) -> bool) -> Vec<BatchEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let event = rx.recv_timeout(left).expect("timed out waiting for batch event");
        let stop = done(&event);
        seen.push(event);
        if stop {
            return seen;
        }
    }
}

// --- batch orchestration ---

#[test]
fn test_batch_processes_every_file_and_verifies() {
    let fx = fixture(3);
    generate_wav(fx.input.path(), "nested/deep.wav", 8000, &[(0.5, 0.5)]);
    let supervisor = Arc::new(ProcessSupervisor::new());
    let fake = Arc::new(FakeProcessor::new(Arc::clone(&supervisor)));
    let batch = BatchOrchestrator::new(supervisor, fake.clone());

    let (tx, rx) = mpsc::channel();
    batch.start(fx.request(false), tx).unwrap();
    let outcome = batch.join().unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Verified {
            matched: 4,
            mismatched: vec![]
        }
    );
    assert!(fx.output.path().join("nested/deep.wav").is_file());
    assert_eq!(fake.names().len(), 4);

    let events: Vec<BatchEvent> = rx.try_iter().collect();
    assert!(matches!(events[0], BatchEvent::Started { total: 4, already_processed: 0, .. }));
    assert_eq!(events.last(), Some(&BatchEvent::Finished { outcome }));
    assert_eq!(batch.status(), RunStatus::Idle);
    assert!(batch.processed_files().is_empty());
}

#[test]
fn test_resume_skips_processed_files() {
    let fx = fixture(10);
    let supervisor = Arc::new(ProcessSupervisor::new());
    let fake = Arc::new(FakeProcessor::new(Arc::clone(&supervisor)));
    let batch = BatchOrchestrator::new(supervisor, fake.clone());

    let done: Vec<PathBuf> = fx.files[..3].to_vec();
    for input in &done {
        std::fs::copy(input, fx.output.path().join(input.file_name().unwrap())).unwrap();
    }
    batch.restore_processed(done.clone()).unwrap();

    let (tx, rx) = mpsc::channel();
    batch.start(fx.request(true), tx).unwrap();
    let outcome = batch.join().unwrap();
    assert!(matches!(outcome, RunOutcome::Verified { matched: 10, .. }));

    let names = fake.names();
    assert_eq!(names.len(), 7);
    assert!(!names.contains(&"take00.wav".to_string()));

    let events: Vec<BatchEvent> = rx.try_iter().collect();
    assert!(matches!(events[0], BatchEvent::Started { already_processed: 3, .. }));
    let last_completed = events
        .iter()
        .rev()
        .find_map(|e| match e {
            BatchEvent::FileCompleted {
                completed, total, ..
            } => Some((*completed, *total)),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_completed, (10, 10));
}

#[test]
fn test_fresh_start_ignores_restored_set() {
    let fx = fixture(4);
    let supervisor = Arc::new(ProcessSupervisor::new());
    let fake = Arc::new(FakeProcessor::new(Arc::clone(&supervisor)));
    let batch = BatchOrchestrator::new(supervisor, fake.clone());

    batch.restore_processed(fx.files[..2].to_vec()).unwrap();
    let (tx, _rx) = mpsc::channel();
    batch.start(fx.request(false), tx).unwrap();
    batch.join();
    assert_eq!(fake.names().len(), 4);
}

#[test]
fn test_error_aborts_batch() {
    let fx = fixture(4);
    let supervisor = Arc::new(ProcessSupervisor::new());
    let mut fake = FakeProcessor::new(Arc::clone(&supervisor));
    fake.fail_on = Some("take01.wav".into());
    let fake = Arc::new(fake);
    let batch = BatchOrchestrator::new(supervisor, fake.clone());

    let (tx, rx) = mpsc::channel();
    batch.start(fx.request(false), tx).unwrap();
    let outcome = batch.join().unwrap();

    match &outcome {
        RunOutcome::Errored { path, message } => {
            assert_eq!(path.as_deref(), Some(fx.files[1].as_path()));
            assert!(message.contains("exit code 1"));
        }
        other => panic!("expected Errored, got {:?}", other),
    }
    assert_eq!(fake.names(), vec!["take00.wav", "take01.wav"]);

    let events: Vec<BatchEvent> = rx.try_iter().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, BatchEvent::FileFailed { path, .. } if *path == fx.files[1])));
    let started = events
        .iter()
        .filter(|e| matches!(e, BatchEvent::FileStarted { .. }))
        .count();
    assert_eq!(started, 2);
    assert!(batch.processed_files().is_empty());
}

#[test]
fn test_missing_output_fails_verification() {
    let fx = fixture(3);
    let supervisor = Arc::new(ProcessSupervisor::new());
    let mut fake = FakeProcessor::new(Arc::clone(&supervisor));
    fake.skip_output = Some("take02.wav".into());
    let batch = BatchOrchestrator::new(supervisor, Arc::new(fake));

    let (tx, _rx) = mpsc::channel();
    batch.start(fx.request(false), tx).unwrap();
    assert_eq!(
        batch.join().unwrap(),
        RunOutcome::VerificationFailed {
            missing: vec![fx.files[2].clone()]
        }
    );
}

#[cfg(unix)]
#[test]
fn test_pause_redoes_inflight_file_after_resume() {
    let fx = fixture(3);
    let supervisor = Arc::new(ProcessSupervisor::new());
    let mut fake = FakeProcessor::new(Arc::clone(&supervisor));
    fake.block_once = Some("take01.wav".into());
    let fake = Arc::new(fake);
    let batch = BatchOrchestrator::new(supervisor, fake.clone());

    let (tx, rx) = mpsc::channel();
    batch.start(fx.request(false), tx).unwrap();
    fake.wait_until_blocking();
    assert!(batch.pause());
    assert!(!batch.pause());
    assert_eq!(batch.status(), RunStatus::Paused);

    let mut paused = false;
    let mut interrupted = false;
    recv_until(&rx, |e| {
        paused |= matches!(e, BatchEvent::Paused);
        interrupted |= matches!(e, BatchEvent::FileInterrupted { .. });
        paused && interrupted
    });
    assert_eq!(batch.processed_files(), vec![fx.files[0].clone()]);

    assert!(batch.resume());
    let outcome = batch.join().unwrap();
    assert!(matches!(outcome, RunOutcome::Verified { matched: 3, .. }));
    assert_eq!(
        fake.names(),
        vec!["take00.wav", "take01.wav", "take01.wav", "take02.wav"]
    );
}

fn wait_for_process(supervisor: &ProcessSupervisor, job_id: &str) {
    let deadline = Instant::now() + WAIT;
    while !supervisor.has_processes(job_id) {
        assert!(Instant::now() < deadline, "{job_id} never spawned");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(unix)]
#[test]
fn test_immediate_resume_still_redoes_inflight_file() {
    let fx = fixture(3);
    let supervisor = Arc::new(ProcessSupervisor::new());
    let mut fake = FakeProcessor::new(Arc::clone(&supervisor));
    fake.block_once = Some("take01.wav".into());
    let fake = Arc::new(fake);
    let batch = BatchOrchestrator::new(Arc::clone(&supervisor), fake.clone());

    let (tx, rx) = mpsc::channel();
    batch.start(fx.request(false), tx).unwrap();
    wait_for_process(&supervisor, "1_take01");
    assert!(batch.pause());
    assert!(batch.resume());

    let outcome = batch.join().unwrap();
    assert!(matches!(outcome, RunOutcome::Verified { matched: 3, .. }), "{:?}", outcome);
    assert_eq!(
        fake.names(),
        vec!["take00.wav", "take01.wav", "take01.wav", "take02.wav"]
    );
    let events: Vec<BatchEvent> = rx.try_iter().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, BatchEvent::FileInterrupted { job_id } if job_id == "1_take01")));
    assert!(!events.iter().any(|e| matches!(e, BatchEvent::FileFailed { .. })));
}

#[cfg(unix)]
#[test]
fn test_cancel_right_after_start_is_honored() {
    let fx = fixture(3);
    let supervisor = Arc::new(ProcessSupervisor::new());
    let mut fake = FakeProcessor::new(Arc::clone(&supervisor));
    fake.block_once = Some("take00.wav".into());
    let batch = BatchOrchestrator::new(supervisor, Arc::new(fake));

    let (tx, _rx) = mpsc::channel();
    batch.start(fx.request(false), tx).unwrap();
    assert!(batch.cancel());
    assert_eq!(batch.join(), Some(RunOutcome::Canceled));
    assert!(batch.processed_files().is_empty());
}

#[cfg(unix)]
#[test]
fn test_cancel_while_paused_ends_run() {
    let fx = fixture(3);
    let supervisor = Arc::new(ProcessSupervisor::new());
    let mut fake = FakeProcessor::new(Arc::clone(&supervisor));
    fake.block_once = Some("take01.wav".into());
    let fake = Arc::new(fake);
    let batch = BatchOrchestrator::new(supervisor, fake.clone());

    let (tx, rx) = mpsc::channel();
    batch.start(fx.request(false), tx).unwrap();
    fake.wait_until_blocking();

    let (busy_tx, _busy_rx) = mpsc::channel();
    assert!(matches!(
        batch.start(fx.request(false), busy_tx),
        Err(NormalizeError::Busy)
    ));
    assert!(matches!(
        batch.restore_processed(vec![]),
        Err(NormalizeError::Busy)
    ));

    assert!(batch.pause());
    let mut paused = false;
    let mut interrupted = false;
    recv_until(&rx, |e| {
        paused |= matches!(e, BatchEvent::Paused);
        interrupted |= matches!(e, BatchEvent::FileInterrupted { .. });
        paused && interrupted
    });

    assert!(batch.cancel());
    assert_eq!(batch.join(), Some(RunOutcome::Canceled));
    let rest: Vec<BatchEvent> = rx.try_iter().collect();
    assert_eq!(
        rest,
        vec![BatchEvent::Finished {
            outcome: RunOutcome::Canceled
        }]
    );
    assert!(batch.processed_files().is_empty());
    assert_eq!(fake.names(), vec!["take00.wav", "take01.wav"]);
}

// --- preview ---

#[test]
fn test_preview_renders_sample_into_temp_root() {
    let fx = fixture(8);
    let temp_parent = tempfile::tempdir().unwrap();
    let supervisor = Arc::new(ProcessSupervisor::new());
    let fake = Arc::new(FakeProcessor::new(Arc::clone(&supervisor)));
    let preview = PreviewOrchestrator::with_temp_parent(
        supervisor,
        fake.clone(),
        temp_parent.path().to_path_buf(),
    );

    let (tx, rx) = mpsc::channel();
    let temp_root = preview
        .start(
            PreviewRequest {
                input: fx.input.path().to_path_buf(),
                settings: Settings::default(),
                sample_size: 3,
                seed: Some(7),
            },
            tx,
        )
        .unwrap();
    assert_eq!(preview.join(), Some(3));
    assert!(temp_root.starts_with(temp_parent.path()));

    let events: Vec<PreviewEvent> = rx.try_iter().collect();
    assert_eq!(events.len(), 4);
    for event in &events[..3] {
        match event {
            PreviewEvent::FileReady {
                rendered, relative, ..
            } => {
                assert!(rendered.is_file());
                assert_eq!(*rendered, temp_root.join(relative));
            }
            other => panic!("expected FileReady, got {:?}", other),
        }
    }
    assert_eq!(
        events[3],
        PreviewEvent::Done {
            count: 3,
            temp_root: temp_root.clone()
        }
    );
    // Input is untouched.
    assert_eq!(std::fs::read_dir(fx.input.path()).unwrap().count(), 8);
}

// --- CLI ---

#[test]
fn test_cli_scan_table() {
    let dir = tempfile::tempdir().unwrap();
    generate_wav(dir.path(), "a.wav", 8000, &[(2.0, 0.5)]);
    generate_wav(dir.path(), "sub/b.wav", 8000, &[(1.0, 0.5)]);
    std::fs::write(dir.path().join("notes.txt"), "not audio").unwrap();

    cargo_bin_cmd!("bulknorm")
        .args(["scan", dir.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicates::str::contains("Number of files: 2"))
        .stdout(predicates::str::contains("a.wav"))
        .stdout(predicates::str::contains("8000"));
}

#[test]
fn test_cli_scan_json() {
    let dir = tempfile::tempdir().unwrap();
    generate_wav(dir.path(), "a.wav", 8000, &[(2.0, 0.5)]);

    let output = cargo_bin_cmd!("bulknorm")
        .args(["scan", "--json", dir.path().to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["sample_rate"], 8000);
    assert_eq!(entries[0]["bits_per_sample"], 16);
    assert!((entries[0]["duration_secs"].as_f64().unwrap() - 2.0).abs() < 0.01);
}

#[test]
fn test_cli_scan_empty_folder() {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("bulknorm")
        .args(["scan", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicates::str::contains("No WAV files found"));
}

#[test]
fn test_cli_invalid_input_path() {
    let out = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("bulknorm")
        .args([
            "normalize",
            "/nonexistent/path/to/takes",
            out.path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicates::str::contains("is not a directory"));
}

#[test]
fn test_cli_refuses_non_empty_output() {
    let fx = fixture(1);
    std::fs::write(fx.output.path().join("old.wav"), b"stale").unwrap();
    cargo_bin_cmd!("bulknorm")
        .args([
            "normalize",
            fx.input.path().to_str().unwrap(),
            fx.output.path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicates::str::contains("is not empty"));
    assert!(fx.output.path().join("old.wav").exists());
}

#[test]
fn test_cli_rejects_out_of_range_settings() {
    let fx = fixture(1);
    cargo_bin_cmd!("bulknorm")
        .args([
            "normalize",
            "--lufs",
            "3",
            fx.input.path().to_str().unwrap(),
            fx.output.path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicates::str::contains("lufsTarget must be between"));
}

#[test]
fn test_cli_rejects_unknown_settings_key() {
    let fx = fixture(1);
    let settings = fx.input.path().join("settings.json");
    std::fs::write(&settings, r#"{"normMode": "peak", "turbo": true}"#).unwrap();
    cargo_bin_cmd!("bulknorm")
        .args([
            "normalize",
            "--settings",
            settings.to_str().unwrap(),
            fx.input.path().to_str().unwrap(),
            fx.output.path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicates::str::contains("turbo"));
}

// --- end to end with ffmpeg ---

fn ffmpeg_planner() -> Option<(Arc<ProcessSupervisor>, Arc<Planner>)> {
    let tools = ToolPaths::resolve().ok()?;
    let supervisor = Arc::new(ProcessSupervisor::new());
    let planner = Arc::new(Planner::new(tools, Arc::clone(&supervisor)));
    Some((supervisor, planner))
}

#[test]
fn test_ffmpeg_trim_and_peak_normalize() {
    let Some((supervisor, planner)) = ffmpeg_planner() else {
        eprintln!("ffmpeg not available, skipping");
        return;
    };
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    // 2 s silence, 7 s tone, 1 s silence.
    generate_wav(
        input.path(),
        "speech.wav",
        44100,
        &[(2.0, 0.0), (7.0, 0.25), (1.0, 0.0)],
    );

    let batch = BatchOrchestrator::new(supervisor, planner);
    let (tx, _rx) = mpsc::channel();
    batch
        .start(
            StartRequest {
                input: input.path().to_path_buf(),
                output: output.path().to_path_buf(),
                settings: Settings {
                    auto_trim: true,
                    ..Settings::default()
                },
                resume: false,
            },
            tx,
        )
        .unwrap();
    let outcome = batch.join().unwrap();
    assert!(matches!(outcome, RunOutcome::Verified { matched: 1, .. }), "{:?}", outcome);

    // Voice at 2..9 s padded by 0.8 s on each side.
    let rendered = output.path().join("speech.wav");
    let info = inspect::stream_info(&rendered).unwrap();
    assert!(
        (info.duration_secs - 8.6).abs() < 0.25,
        "trimmed duration {}",
        info.duration_secs
    );
    assert_eq!(info.sample_rate, 44100);
    let format = inspect::get_format_info(&rendered).unwrap();
    assert_eq!(format.bits_per_sample, 16);
}

#[test]
fn test_ffmpeg_loudness_normalize() {
    let Some((supervisor, planner)) = ffmpeg_planner() else {
        eprintln!("ffmpeg not available, skipping");
        return;
    };
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    generate_wav(input.path(), "a.wav", 44100, &[(3.0, 0.1)]);

    let batch = BatchOrchestrator::new(supervisor, planner);
    let (tx, _rx) = mpsc::channel();
    batch
        .start(
            StartRequest {
                input: input.path().to_path_buf(),
                output: output.path().to_path_buf(),
                settings: Settings {
                    norm_mode: bulknorm::config::NormMode::Lufs,
                    ..Settings::default()
                },
                resume: false,
            },
            tx,
        )
        .unwrap();
    match batch.join().unwrap() {
        RunOutcome::Verified { matched, .. } => assert_eq!(matched, 1),
        other => panic!("expected Verified, got {:?}", other),
    }
}

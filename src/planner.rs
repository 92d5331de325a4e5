//! Per-file normalization: detect, analyze, render.
//!
//! Each phase turns settings into an ffmpeg command line and parses the
//! textual report ffmpeg prints on stderr. The planner never retries; a
//! failed render aborts the job and the caller decides what happens next.

use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::{NormMode, Settings};
use crate::error::{NormalizeError, Result};
use crate::inspect::{choose_output_codec, get_format_info, MediaInspector, OutputCodec};
use crate::models::{AnalysisParams, Job, JobOutcome, Phase, PhaseStatus, ProgressSink, VoiceRegion};
use crate::process::{Invocation, ProcessOutput, ProcessSupervisor};
use crate::tools::ToolPaths;
use crate::trim::{self, TrimConfig};

const DETECT_TIMEOUT: Duration = Duration::from_secs(120);
/// Loudness-range target handed to `loudnorm`.
const LOUDNESS_RANGE: u32 = 11;
const MAX_GAIN_DB: f64 = 30.0;

static MAX_VOLUME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"max_volume:\s*(-?[0-9.]+)\s*dB").expect("max_volume regex must compile")
});
static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[\s\S]*?\}").expect("json object regex must compile"));
static PROGRESS_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("progress regex must compile")
});

/// Turns one input file into one output file.
///
/// The batch and preview orchestrators only see this trait, which keeps
/// them testable without ffmpeg.
pub trait FileProcessor: Send + Sync {
    fn process(&self, job: &Job, settings: &Settings, sink: &dyn ProgressSink)
        -> Result<JobOutcome>;
}

/// Portion of the input that gets analyzed and rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderWindow {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl RenderWindow {
    pub fn whole(duration: f64) -> Self {
        Self {
            start: 0.0,
            end: duration,
            duration,
        }
    }

    pub fn trimmed(region: VoiceRegion, duration: f64) -> Self {
        Self {
            start: region.start,
            end: region.end,
            duration,
        }
    }

    pub fn is_trimmed(&self) -> bool {
        self.start > 0.0 || self.end < self.duration
    }

    /// Seconds that end up in the output; `0.0` when the duration is unknown.
    pub fn len(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// `-ss`/`-to` input options; empty unless trimming applies.
    pub fn seek_args(&self) -> Vec<String> {
        if self.is_trimmed() {
            vec![
                "-ss".to_string(),
                format!("{:.3}", self.start),
                "-to".to_string(),
                format!("{:.3}", self.end),
            ]
        } else {
            Vec::new()
        }
    }
}

/// Result of the analysis phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// Maximum sample volume in dB, when volumedetect reported one.
    Peak(Option<f64>),
    /// Measured loudness, or `None` for single-pass rendering.
    Loudness(Option<AnalysisParams>),
}

fn thread_args(settings: &Settings) -> Vec<String> {
    if settings.ffmpeg_threads > 0 {
        vec!["-threads".to_string(), settings.ffmpeg_threads.to_string()]
    } else {
        Vec::new()
    }
}

pub fn detect_invocation(ffmpeg: &Path, input: &Path, config: &TrimConfig) -> Invocation {
    Invocation::new(ffmpeg, "detect")
        .args(["-hide_banner", "-nostats", "-v", "info", "-i"])
        .arg(input)
        .args(["-af".to_string(), config.filter()])
        .args(["-f", "null", "-"])
}

pub fn peak_invocation(
    ffmpeg: &Path,
    input: &Path,
    window: &RenderWindow,
    settings: &Settings,
) -> Invocation {
    Invocation::new(ffmpeg, "analyze")
        .args(["-hide_banner", "-v", "info"])
        .args(window.seek_args())
        .arg("-i")
        .arg(input)
        .args(thread_args(settings))
        .args(["-af", "volumedetect", "-f", "null", "-"])
}

/// First `loudnorm` pass. Runs at `info` level since that is where the
/// JSON report is printed.
pub fn loudness_invocation(
    ffmpeg: &Path,
    input: &Path,
    window: &RenderWindow,
    settings: &Settings,
) -> Invocation {
    let filter = format!(
        "loudnorm=I={}:TP={}:LRA={}:print_format=json",
        settings.lufs_target, settings.tp_margin, LOUDNESS_RANGE
    );
    Invocation::new(ffmpeg, "analyze")
        .args(["-hide_banner", "-v", "info"])
        .args(window.seek_args())
        .arg("-i")
        .arg(input)
        .args(thread_args(settings))
        .args(["-af".to_string(), filter])
        .args(["-f", "null", "-"])
}

/// Gain applied in peak mode, clamped to ±30 dB.
pub fn peak_gain(settings: &Settings, max_volume: Option<f64>) -> f64 {
    let Some(measured) = max_volume else {
        return 0.0;
    };
    let ideal = settings.peak_target_db - measured;
    let gain = if settings.peak_only_boost {
        ideal.max(0.0)
    } else {
        ideal
    };
    gain.clamp(-MAX_GAIN_DB, MAX_GAIN_DB)
}

/// The `-af` chain of the render pass.
pub fn render_filter(settings: &Settings, measurement: &Measurement) -> String {
    match measurement {
        Measurement::Loudness(params) => {
            let loudnorm = match params {
                Some(p) => format!(
                    "loudnorm=I={}:TP={}:LRA={}:measured_I={}:measured_LRA={}:measured_TP={}:measured_thresh={}:offset={}:linear=true:print_format=summary",
                    settings.lufs_target,
                    settings.tp_margin,
                    LOUDNESS_RANGE,
                    p.input_i,
                    p.input_lra,
                    p.input_tp,
                    p.input_thresh,
                    p.target_offset
                ),
                None => format!(
                    "loudnorm=I={}:TP={}:LRA={}:print_format=summary",
                    settings.lufs_target, settings.tp_margin, LOUDNESS_RANGE
                ),
            };
            format!(
                "{loudnorm},alimiter=limit={}:level_in=1.0:level_out=1.0",
                settings.limiter_limit
            )
        }
        Measurement::Peak(max_volume) => {
            format!("volume={:.2}dB", peak_gain(settings, *max_volume))
        }
    }
}

pub fn render_invocation(
    ffmpeg: &Path,
    job: &Job,
    window: &RenderWindow,
    settings: &Settings,
    filter: &str,
    codec: OutputCodec,
) -> Invocation {
    let verbosity: &[&str] = if settings.verbose_logs {
        &["-v", "info"]
    } else {
        &["-hide_banner", "-v", "error"]
    };
    Invocation::new(ffmpeg, "render")
        .args(verbosity)
        .arg("-stats")
        .args(window.seek_args())
        .args(["-y", "-i"])
        .arg(&job.input)
        .args(thread_args(settings))
        .args(["-af", filter, "-acodec", codec.ffmpeg_name()])
        .args(["-map_metadata", "-1"])
        .arg(&job.output)
}

pub fn parse_max_volume(stderr: &str) -> Option<f64> {
    MAX_VOLUME
        .captures(stderr)
        .and_then(|c| c.get(1)?.as_str().parse().ok())
}

fn number_field(report: &serde_json::Value, key: &str) -> Option<f64> {
    let value = report.get(key)?;
    let parsed = match value {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        other => other.as_f64()?,
    };
    parsed.is_finite().then_some(parsed)
}

/// Measured values from the last JSON object in a `loudnorm` report.
///
/// Returns `None` unless all five fields are present and finite.
pub fn parse_loudnorm_report(stderr: &str) -> Option<AnalysisParams> {
    let last = JSON_OBJECT.find_iter(stderr).last()?;
    let report: serde_json::Value = match serde_json::from_str(last.as_str()) {
        Ok(value) => value,
        Err(e) => {
            debug!("Unparseable loudnorm report: {}", e);
            return None;
        }
    };
    Some(AnalysisParams {
        input_i: number_field(&report, "input_i")?,
        input_lra: number_field(&report, "input_lra")?,
        input_tp: number_field(&report, "input_tp")?,
        input_thresh: number_field(&report, "input_thresh")?,
        target_offset: number_field(&report, "target_offset")?,
    })
}

/// Seconds from an ffmpeg stats line (`time=00:01:02.50`).
pub fn parse_progress_time(line: &str) -> Option<f64> {
    let caps = PROGRESS_TIME.captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

enum PlanState {
    Detect,
    Analyze(RenderWindow),
    Render(RenderWindow, Measurement),
    Done,
}

/// Drives ffmpeg through the three phases for one file at a time.
pub struct Planner {
    tools: ToolPaths,
    supervisor: Arc<ProcessSupervisor>,
    inspector: MediaInspector,
}

impl Planner {
    pub fn new(tools: ToolPaths, supervisor: Arc<ProcessSupervisor>) -> Self {
        let inspector = MediaInspector::new(Some(tools.ffprobe.clone()), Arc::clone(&supervisor));
        Self {
            tools,
            supervisor,
            inspector,
        }
    }

    pub fn inspector(&self) -> &MediaInspector {
        &self.inspector
    }

    fn ensure_success(&self, invocation: &Invocation, output: &ProcessOutput) -> Result<()> {
        if output.status.success() {
            return Ok(());
        }
        Err(NormalizeError::ToolFailed {
            tool: invocation.tool_name(),
            stage: invocation.stage(),
            code: output.status.code(),
            detail: output.stderr_tail(),
        })
    }

    fn detect(
        &self,
        job: &Job,
        settings: &Settings,
        duration: f64,
        sink: &dyn ProgressSink,
    ) -> Result<RenderWindow> {
        let whole = RenderWindow::whole(duration);
        if !settings.auto_trim {
            return Ok(whole);
        }
        if !trim::should_trim(settings, duration) {
            sink.log(
                &job.id,
                Phase::Detect,
                &format!(
                    "No trimming applied: file shorter than minimum {}ms",
                    settings.trim_min_file_ms
                ),
            );
            return Ok(whole);
        }

        let config = TrimConfig::from_settings(settings);
        sink.log(&job.id, Phase::Detect, &config.describe());
        let invocation = detect_invocation(&self.tools.ffmpeg, &job.input, &config);
        let region = match self
            .supervisor
            .run(&invocation, &job.id, Some(DETECT_TIMEOUT), |_| {})
        {
            Ok(output) if output.status.success() => {
                trim::detect_voice_region(&output.stderr, duration)
            }
            Ok(output) => {
                warn!(job_id = %job.id, code = ?output.status.code(), "Silence detection failed: {}", output.stderr_tail());
                None
            }
            Err(NormalizeError::Canceled) => return Err(NormalizeError::Canceled),
            Err(e) => {
                warn!(job_id = %job.id, "Silence detection failed: {}", e);
                None
            }
        };

        match region {
            Some(region) => {
                let padded = trim::pad_region(region, config.pad_secs, duration);
                sink.log(
                    &job.id,
                    Phase::Detect,
                    &format!(
                        "Trim applied: start={:.3}s end={:.3}s",
                        padded.start, padded.end
                    ),
                );
                Ok(RenderWindow::trimmed(padded, duration))
            }
            None => {
                sink.log(
                    &job.id,
                    Phase::Detect,
                    "No trimming applied: could not detect non-silent region",
                );
                Ok(whole)
            }
        }
    }

    fn analyze(
        &self,
        job: &Job,
        settings: &Settings,
        window: &RenderWindow,
        sink: &dyn ProgressSink,
    ) -> Result<Measurement> {
        match settings.norm_mode {
            NormMode::Peak => {
                let invocation = peak_invocation(&self.tools.ffmpeg, &job.input, window, settings);
                let output = self.supervisor.run(&invocation, &job.id, None, |_| {})?;
                self.ensure_success(&invocation, &output)?;
                let max_volume = parse_max_volume(&output.stderr);
                sink.log(
                    &job.id,
                    Phase::Analyze,
                    &format!(
                        "Peak mode: measuredMax={} dB, target={} dB, gain={:.2} dB, onlyBoost={}",
                        max_volume.map_or_else(|| "n/a".to_string(), |v| v.to_string()),
                        settings.peak_target_db,
                        peak_gain(settings, max_volume),
                        settings.peak_only_boost
                    ),
                );
                Ok(Measurement::Peak(max_volume))
            }
            NormMode::Lufs if settings.fast_normalize => {
                sink.log(&job.id, Phase::Analyze, "Fast normalize: skipping loudness analysis");
                Ok(Measurement::Loudness(None))
            }
            NormMode::Lufs => {
                let invocation =
                    loudness_invocation(&self.tools.ffmpeg, &job.input, window, settings);
                let output = self.supervisor.run(&invocation, &job.id, None, |_| {})?;
                self.ensure_success(&invocation, &output)?;
                let params = parse_loudnorm_report(&output.stderr);
                match &params {
                    Some(p) => sink.log(
                        &job.id,
                        Phase::Analyze,
                        &format!(
                            "Measured I={} LUFS, LRA={}, TP={} dBTP, thresh={}, offset={}",
                            p.input_i, p.input_lra, p.input_tp, p.input_thresh, p.target_offset
                        ),
                    ),
                    None => sink.log(
                        &job.id,
                        Phase::Analyze,
                        "Loudness report missing; rendering single-pass",
                    ),
                }
                Ok(Measurement::Loudness(params))
            }
        }
    }

    fn render(
        &self,
        job: &Job,
        settings: &Settings,
        window: &RenderWindow,
        measurement: &Measurement,
        sink: &dyn ProgressSink,
    ) -> Result<()> {
        let codec = choose_output_codec(settings.target_bit_depth, get_format_info(&job.input).as_ref());
        let filter = render_filter(settings, measurement);
        let invocation =
            render_invocation(&self.tools.ffmpeg, job, window, settings, &filter, codec);
        sink.log(
            &job.id,
            Phase::Render,
            &format!("Filter: {} ({})", filter, codec.ffmpeg_name()),
        );

        let total = window.len();
        let mut reported = 0.0f32;
        let output = self.supervisor.run(&invocation, &job.id, None, |line| {
            if settings.verbose_logs && !line.contains("time=") {
                sink.log(&job.id, Phase::Render, line);
            }
            if total <= 0.0 {
                return;
            }
            if let Some(secs) = parse_progress_time(line) {
                let percent = ((secs / total) * 100.0).clamp(0.0, 100.0) as f32;
                if percent - reported >= 1.0 {
                    reported = percent;
                    sink.phase(&job.id, Phase::Render, PhaseStatus::Progress, percent);
                }
            }
        })?;
        self.ensure_success(&invocation, &output)?;
        sink.log(
            &job.id,
            Phase::Render,
            &format!("Completed: {}", job.output.display()),
        );
        Ok(())
    }

    fn run_phases(&self, job: &Job, settings: &Settings, sink: &dyn ProgressSink) -> Result<JobOutcome> {
        let duration = self.inspector.get_duration(&job.input, &job.id);
        debug!(job_id = %job.id, duration, "Planning {}", job.input.display());

        let mut state = PlanState::Detect;
        loop {
            if job.cancel.is_canceled() {
                info!(job_id = %job.id, "Canceled before {}", state_name(&state));
                return Ok(JobOutcome::Canceled);
            }
            state = match state {
                PlanState::Detect => {
                    sink.phase(&job.id, Phase::Detect, PhaseStatus::Start, 0.0);
                    let window = self.detect(job, settings, duration, sink)?;
                    sink.phase(&job.id, Phase::Detect, PhaseStatus::Done, 100.0);
                    PlanState::Analyze(window)
                }
                PlanState::Analyze(window) => {
                    sink.phase(&job.id, Phase::Analyze, PhaseStatus::Start, 0.0);
                    let measurement = self.analyze(job, settings, &window, sink)?;
                    sink.phase(&job.id, Phase::Analyze, PhaseStatus::Done, 100.0);
                    PlanState::Render(window, measurement)
                }
                PlanState::Render(window, measurement) => {
                    sink.phase(&job.id, Phase::Render, PhaseStatus::Start, 0.0);
                    self.render(job, settings, &window, &measurement, sink)?;
                    sink.phase(&job.id, Phase::Render, PhaseStatus::Done, 100.0);
                    PlanState::Done
                }
                PlanState::Done => return Ok(JobOutcome::Completed),
            };
        }
    }
}

fn state_name(state: &PlanState) -> &'static str {
    match state {
        PlanState::Detect => "detect",
        PlanState::Analyze(_) => "analyze",
        PlanState::Render(..) => "render",
        PlanState::Done => "done",
    }
}

impl FileProcessor for Planner {
    fn process(
        &self,
        job: &Job,
        settings: &Settings,
        sink: &dyn ProgressSink,
    ) -> Result<JobOutcome> {
        let result = self.run_phases(job, settings, sink);
        self.supervisor.cleanup_job(&job.id);
        match result {
            // A spawn refused by cancel/pause is a clean early exit.
            Err(NormalizeError::Canceled) if job.cancel.is_canceled() => Ok(JobOutcome::Canceled),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::process::CancelToken;

    fn job() -> Job {
        Job {
            id: "job-1".into(),
            input: PathBuf::from("/in/take.wav"),
            output: PathBuf::from("/out/take.wav"),
            cancel: CancelToken::default(),
        }
    }

    #[test]
    fn test_peak_gain_clamps() {
        let settings = Settings {
            peak_target_db: -2.0,
            peak_only_boost: true,
            ..Settings::default()
        };
        assert_eq!(peak_gain(&settings, Some(-12.0)), 10.0);
        assert_eq!(peak_gain(&settings, Some(-0.5)), 0.0);
        assert_eq!(peak_gain(&settings, Some(-91.0)), 30.0);
        assert_eq!(peak_gain(&settings, None), 0.0);

        let both_ways = Settings {
            peak_only_boost: false,
            ..settings.clone()
        };
        assert_eq!(peak_gain(&both_ways, Some(-0.5)), -1.5);
        assert_eq!(peak_gain(&both_ways, Some(40.0)), -30.0);
        for measured in [-200.0, -60.0, -2.0, 0.0, 50.0] {
            let gain = peak_gain(&both_ways, Some(measured));
            assert!((-30.0..=30.0).contains(&gain));
            assert!(peak_gain(&settings, Some(measured)) >= 0.0);
        }
    }

    #[test]
    fn test_parses_volumedetect() {
        let stderr = "\
[Parsed_volumedetect_0 @ 0x1] n_samples: 441000
[Parsed_volumedetect_0 @ 0x1] mean_volume: -20.3 dB
[Parsed_volumedetect_0 @ 0x1] max_volume: -6.0 dB
";
        assert_eq!(parse_max_volume(stderr), Some(-6.0));
        assert_eq!(parse_max_volume("max_volume: 0.0 dB"), Some(0.0));
        assert_eq!(parse_max_volume("no report"), None);
    }

    #[test]
    fn test_parses_last_loudnorm_object() {
        let stderr = r#"
[Parsed_loudnorm_0 @ 0x1] { "noise": "ignored" }
[Parsed_loudnorm_0 @ 0x2]
{
	"input_i" : "-27.61",
	"input_tp" : "-4.47",
	"input_lra" : "18.06",
	"input_thresh" : "-39.20",
	"output_i" : "-16.58",
	"normalization_type" : "dynamic",
	"target_offset" : "0.58"
}
"#;
        let params = parse_loudnorm_report(stderr).unwrap();
        assert_eq!(params.input_i, -27.61);
        assert_eq!(params.input_tp, -4.47);
        assert_eq!(params.input_lra, 18.06);
        assert_eq!(params.input_thresh, -39.2);
        assert_eq!(params.target_offset, 0.58);
    }

    #[test]
    fn test_incomplete_loudnorm_report_is_none() {
        assert_eq!(parse_loudnorm_report("no json here"), None);
        assert_eq!(parse_loudnorm_report(r#"{"input_i": "-20"}"#), None);
        let silent = r#"{"input_i":"-inf","input_tp":"-inf","input_lra":"0.00","input_thresh":"-70.00","target_offset":"inf"}"#;
        assert_eq!(parse_loudnorm_report(silent), None);
    }

    #[test]
    fn test_progress_time() {
        assert_eq!(
            parse_progress_time("size=  512kB time=00:01:02.50 bitrate=1411.2kbits/s"),
            Some(62.5)
        );
        assert_eq!(parse_progress_time("time=01:00:00.00"), Some(3600.0));
        assert_eq!(parse_progress_time("time=N/A bitrate=N/A"), None);
    }

    #[test]
    fn test_loudness_filters() {
        let settings = Settings {
            norm_mode: NormMode::Lufs,
            ..Settings::default()
        };
        assert_eq!(
            render_filter(&settings, &Measurement::Loudness(None)),
            "loudnorm=I=-16:TP=-1:LRA=11:print_format=summary,alimiter=limit=0.97:level_in=1.0:level_out=1.0"
        );

        let params = AnalysisParams {
            input_i: -27.61,
            input_lra: 18.06,
            input_tp: -4.47,
            input_thresh: -39.2,
            target_offset: 0.58,
        };
        let filter = render_filter(&settings, &Measurement::Loudness(Some(params)));
        assert!(filter.starts_with(
            "loudnorm=I=-16:TP=-1:LRA=11:measured_I=-27.61:measured_LRA=18.06:measured_TP=-4.47:measured_thresh=-39.2:offset=0.58:linear=true"
        ));
        assert!(filter.ends_with(",alimiter=limit=0.97:level_in=1.0:level_out=1.0"));
    }

    #[test]
    fn test_peak_filter() {
        let settings = Settings::default();
        assert_eq!(render_filter(&settings, &Measurement::Peak(Some(-8.0))), "volume=6.00dB");
        assert_eq!(render_filter(&settings, &Measurement::Peak(None)), "volume=0.00dB");
    }

    #[test]
    fn test_seek_only_when_trimmed() {
        assert!(RenderWindow::whole(10.0).seek_args().is_empty());
        let window = RenderWindow::trimmed(VoiceRegion { start: 1.2, end: 9.8 }, 10.0);
        assert_eq!(window.seek_args(), vec!["-ss", "1.200", "-to", "9.800"]);
        let tail_only = RenderWindow::trimmed(VoiceRegion { start: 0.0, end: 9.0 }, 10.0);
        assert!(tail_only.is_trimmed());
    }

    #[test]
    fn test_render_argv_layout() {
        let settings = Settings {
            ffmpeg_threads: 2,
            ..Settings::default()
        };
        let window = RenderWindow::trimmed(VoiceRegion { start: 1.0, end: 2.0 }, 3.0);
        let invocation = render_invocation(
            Path::new("/usr/bin/ffmpeg"),
            &job(),
            &window,
            &settings,
            "volume=0.00dB",
            OutputCodec::PcmS16,
        );
        assert_eq!(
            invocation.args_lossy(),
            vec![
                "-hide_banner", "-v", "error", "-stats", "-ss", "1.000", "-to", "2.000", "-y",
                "-i", "/in/take.wav", "-threads", "2", "-af", "volume=0.00dB", "-acodec",
                "pcm_s16le", "-map_metadata", "-1", "/out/take.wav",
            ]
        );
        assert_eq!(invocation.stage(), "render");
    }

    #[test]
    fn test_detect_and_analysis_argv() {
        let settings = Settings::default();
        let config = TrimConfig::from_settings(&settings);
        let detect = detect_invocation(Path::new("ffmpeg"), Path::new("a.wav"), &config);
        assert_eq!(
            detect.args_lossy(),
            vec![
                "-hide_banner", "-nostats", "-v", "info", "-i", "a.wav", "-af",
                "silencedetect=n=-50dB:d=0.2", "-f", "null", "-",
            ]
        );

        let whole = RenderWindow::whole(5.0);
        let peak = peak_invocation(Path::new("ffmpeg"), Path::new("a.wav"), &whole, &settings);
        assert_eq!(
            peak.args_lossy(),
            vec!["-hide_banner", "-v", "info", "-i", "a.wav", "-af", "volumedetect", "-f", "null", "-"]
        );

        let loud = loudness_invocation(Path::new("ffmpeg"), Path::new("a.wav"), &whole, &settings);
        assert!(loud
            .args_lossy()
            .contains(&"loudnorm=I=-16:TP=-1:LRA=11:print_format=json".to_string()));
    }

    #[derive(Default)]
    struct RecordingSink {
        phases: std::sync::Mutex<Vec<(Phase, PhaseStatus)>>,
    }

    impl ProgressSink for RecordingSink {
        fn phase(&self, _job_id: &str, phase: Phase, status: PhaseStatus, _percent: f32) {
            self.phases.lock().unwrap().push((phase, status));
        }

        fn log(&self, _job_id: &str, _phase: Phase, _message: &str) {}
    }

    #[test]
    fn test_canceled_job_returns_early() {
        let tools = ToolPaths {
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
            ffprobe: PathBuf::from("/nonexistent/ffprobe"),
        };
        let planner = Planner::new(tools, Arc::new(ProcessSupervisor::new()));
        let job = job();
        job.cancel.cancel();
        let sink = RecordingSink::default();
        let outcome = planner.process(&job, &Settings::default(), &sink).unwrap();
        assert_eq!(outcome, JobOutcome::Canceled);
        assert!(sink.phases.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_ffmpeg_fails_the_job() {
        let tools = ToolPaths {
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
            ffprobe: PathBuf::from("/nonexistent/ffprobe"),
        };
        let planner = Planner::new(tools, Arc::new(ProcessSupervisor::new()));
        let sink = RecordingSink::default();
        let err = planner.process(&job(), &Settings::default(), &sink).unwrap_err();
        assert!(matches!(err, NormalizeError::Spawn { .. }));
        assert_eq!(
            sink.phases.lock().unwrap().as_slice(),
            &[
                (Phase::Detect, PhaseStatus::Start),
                (Phase::Detect, PhaseStatus::Done),
                (Phase::Analyze, PhaseStatus::Start),
            ]
        );
    }
}

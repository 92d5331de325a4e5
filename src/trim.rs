//! Voice-region detection from `silencedetect` output.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::Settings;
use crate::models::VoiceRegion;

static SILENCE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"silence_start: (-?[0-9.]+)").expect("silence_start regex must compile")
});
static SILENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"silence_end: (-?[0-9.]+)").expect("silence_end regex must compile")
});

/// Detection parameters after the conservative clamps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimConfig {
    pub threshold_db: f64,
    pub min_silence_secs: f64,
    pub pad_secs: f64,
    pub high_pass: bool,
    pub conservative: bool,
}

impl TrimConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut threshold_db = settings.trim_threshold_db;
        let mut min_silence_secs = (settings.trim_min_duration_ms as f64 / 1000.0).max(0.01);
        if settings.trim_conservative {
            threshold_db = threshold_db.min(-60.0);
            min_silence_secs = min_silence_secs.max(0.3);
        }
        Self {
            threshold_db,
            min_silence_secs,
            pad_secs: settings.trim_pad_ms as f64 / 1000.0,
            high_pass: settings.trim_hpf,
            conservative: settings.trim_conservative,
        }
    }

    /// The `-af` argument for the detection pass.
    pub fn filter(&self) -> String {
        let detect = format!(
            "silencedetect=n={}dB:d={}",
            self.threshold_db, self.min_silence_secs
        );
        if self.high_pass {
            format!("highpass=f=80,{detect}")
        } else {
            detect
        }
    }

    pub fn describe(&self) -> String {
        let on_off = |b: bool| if b { "on" } else { "off" };
        format!(
            "Detect config: threshold={}dB, minDur={}s, HPF={}, conservative={}",
            self.threshold_db,
            self.min_silence_secs,
            on_off(self.high_pass),
            on_off(self.conservative)
        )
    }
}

/// Whether a file of `duration_secs` is long enough to be trimmed.
pub fn should_trim(settings: &Settings, duration_secs: f64) -> bool {
    settings.auto_trim && duration_secs * 1000.0 >= settings.trim_min_file_ms as f64
}

fn capture_all(re: &Regex, text: &str) -> Vec<f64> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
        .map(|t| t.max(0.0))
        .collect()
}

/// Pair `silence_start`/`silence_end` timestamps positionally. A trailing
/// start without an end runs to `duration`.
pub fn parse_silence_intervals(stderr: &str, duration: f64) -> Vec<(f64, f64)> {
    let starts = capture_all(&SILENCE_START, stderr);
    let ends = capture_all(&SILENCE_END, stderr);

    let mut intervals: Vec<(f64, f64)> = starts.iter().copied().zip(ends.iter().copied()).collect();
    if starts.len() > ends.len() {
        if let Some(&last) = starts.last() {
            intervals.push((last, duration));
        }
    }
    intervals
}

/// Sort by start and merge overlapping or touching intervals.
pub fn merge_intervals(mut intervals: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    intervals.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Complement of merged silence within `[0, duration]`.
pub fn non_silent_spans(merged: &[(f64, f64)], duration: f64) -> Vec<(f64, f64)> {
    let mut spans = Vec::new();
    let mut prev = 0.0f64;
    for &(start, end) in merged {
        if start > prev {
            spans.push((prev, start));
        }
        prev = prev.max(end);
    }
    if prev < duration {
        spans.push((prev, duration));
    }
    spans
}

/// From the first non-silent start to the last non-silent end.
pub fn voice_region(spans: &[(f64, f64)]) -> Option<VoiceRegion> {
    let first = spans.first()?;
    let last = spans.last()?;
    let region = VoiceRegion {
        start: first.0,
        end: last.1,
    };
    (!region.is_empty()).then_some(region)
}

/// Widen both edges by `pad_secs`, clamped to the file.
pub fn pad_region(region: VoiceRegion, pad_secs: f64, duration: f64) -> VoiceRegion {
    VoiceRegion {
        start: (region.start - pad_secs).max(0.0),
        end: (region.end + pad_secs).min(duration),
    }
}

/// Full detection pipeline over a `silencedetect` report, before padding.
pub fn detect_voice_region(stderr: &str, duration: f64) -> Option<VoiceRegion> {
    let merged = merge_intervals(parse_silence_intervals(stderr, duration));
    voice_region(&non_silent_spans(&merged, duration))
}

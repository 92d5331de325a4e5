use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NormalizeError, Result};

/// How the gain for each file is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NormMode {
    /// Flat gain so the loudest sample lands on the peak target.
    #[default]
    Peak,
    /// EBU R128 integrated loudness via the `loudnorm` filter.
    Lufs,
}

/// Bit depth of rendered files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "BitDepthRepr", into = "BitDepthRepr")]
pub enum BitDepth {
    #[default]
    Sixteen,
    TwentyFour,
    Original,
}

/// The settings object accepts `16`, `24`, `"16"`, `"24"` or `"original"`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BitDepthRepr {
    Number(u32),
    Text(String),
}

impl TryFrom<BitDepthRepr> for BitDepth {
    type Error = String;

    fn try_from(value: BitDepthRepr) -> std::result::Result<Self, Self::Error> {
        match value {
            BitDepthRepr::Number(16) => Ok(BitDepth::Sixteen),
            BitDepthRepr::Number(24) => Ok(BitDepth::TwentyFour),
            BitDepthRepr::Number(n) => Err(format!("unsupported bit depth {n}")),
            BitDepthRepr::Text(text) => text.parse(),
        }
    }
}

impl From<BitDepth> for BitDepthRepr {
    fn from(value: BitDepth) -> Self {
        match value {
            BitDepth::Sixteen => BitDepthRepr::Number(16),
            BitDepth::TwentyFour => BitDepthRepr::Number(24),
            BitDepth::Original => BitDepthRepr::Text("original".into()),
        }
    }
}

impl std::str::FromStr for BitDepth {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "16" => Ok(BitDepth::Sixteen),
            "24" => Ok(BitDepth::TwentyFour),
            "original" => Ok(BitDepth::Original),
            other => Err(format!("unsupported bit depth '{other}' (expected 16, 24 or original)")),
        }
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitDepth::Sixteen => write!(f, "16"),
            BitDepth::TwentyFour => write!(f, "24"),
            BitDepth::Original => write!(f, "original"),
        }
    }
}

/// Batch settings, captured once when a run starts and never mutated after.
///
/// Field names follow the JSON settings object of the desktop front-end, so a
/// settings file exported from there loads unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Settings {
    pub norm_mode: NormMode,
    /// Integrated loudness target (LUFS).
    pub lufs_target: f64,
    /// True-peak ceiling handed to `loudnorm` (dBTP).
    pub tp_margin: f64,
    /// Linear ceiling of the final `alimiter`.
    pub limiter_limit: f64,
    pub peak_target_db: f64,
    pub target_bit_depth: BitDepth,
    pub auto_trim: bool,
    pub trim_threshold_db: f64,
    pub trim_min_duration_ms: u32,
    pub trim_pad_ms: u32,
    /// Files shorter than this are never trimmed.
    pub trim_min_file_ms: u32,
    pub trim_conservative: bool,
    #[serde(rename = "trimHPF")]
    pub trim_hpf: bool,
    /// `-threads` hint; 0 lets ffmpeg decide.
    pub ffmpeg_threads: u32,
    /// Skip the loudness measurement pass (single-pass `loudnorm`).
    pub fast_normalize: bool,
    pub peak_only_boost: bool,
    pub verbose_logs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            norm_mode: NormMode::Peak,
            lufs_target: -16.0,
            tp_margin: -1.0,
            limiter_limit: 0.97,
            peak_target_db: -2.0,
            target_bit_depth: BitDepth::Sixteen,
            auto_trim: false,
            trim_threshold_db: -50.0,
            trim_min_duration_ms: 200,
            trim_pad_ms: 800,
            trim_min_file_ms: 800,
            trim_conservative: false,
            trim_hpf: false,
            ffmpeg_threads: 0,
            fast_normalize: false,
            peak_only_boost: true,
            verbose_logs: false,
        }
    }
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(NormalizeError::InvalidSettings(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

impl Settings {
    /// Reject values ffmpeg would refuse or that make no sense for a batch.
    pub fn validate(&self) -> Result<()> {
        check_range("lufsTarget", self.lufs_target, -70.0, -5.0)?;
        check_range("tpMargin", self.tp_margin, -9.0, 0.0)?;
        check_range("limiterLimit", self.limiter_limit, 0.0625, 1.0)?;
        check_range("peakTargetDb", self.peak_target_db, -60.0, 0.0)?;
        check_range("trimThresholdDb", self.trim_threshold_db, -100.0, 0.0)?;
        if self.trim_min_duration_ms > 60_000 {
            return Err(NormalizeError::InvalidSettings(format!(
                "trimMinDurationMs must be at most 60000, got {}",
                self.trim_min_duration_ms
            )));
        }
        if self.trim_pad_ms > 60_000 {
            return Err(NormalizeError::InvalidSettings(format!(
                "trimPadMs must be at most 60000, got {}",
                self.trim_pad_ms
            )));
        }
        if self.ffmpeg_threads > 64 {
            return Err(NormalizeError::InvalidSettings(format!(
                "ffmpegThreads must be at most 64, got {}",
                self.ffmpeg_threads
            )));
        }
        Ok(())
    }
}

/// Load settings from a JSON file. Unknown keys and bad values are errors.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| NormalizeError::io(format!("Failed to read {}", path.display()), e))?;
    let settings: Settings = serde_json::from_str(&data).map_err(|e| {
        NormalizeError::InvalidSettings(format!("{}: {}", path.display(), e))
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Save settings as pretty-printed JSON.
pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| NormalizeError::InvalidSettings(e.to_string()))?;
    std::fs::write(path, json)
        .map_err(|e| NormalizeError::io(format!("Failed to write {}", path.display()), e))
}

//! Duration and PCM format lookup for input files.
//!
//! The fast path parses the RIFF/WAVE header directly. When that fails the
//! lookup falls through an ordered list of strategies; nothing here raises,
//! callers get `0.0` or `None` for "unknown".

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::config::BitDepth;
use crate::process::{Invocation, ProcessSupervisor};

/// Bytes read for the duration fast path.
pub const DURATION_HEADER_BYTES: usize = 512 * 1024;
/// Bytes read when only the format chunk is needed.
pub const FORMAT_HEADER_BYTES: usize = 128;

const FFPROBE_TIMEOUT: Duration = Duration::from_secs(10);

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("not a RIFF/WAVE file")]
    NotWave,
    #[error("truncated or malformed chunk at offset {0}")]
    Malformed(usize),
    #[error("no {0} chunk")]
    MissingChunk(&'static str),
    #[error("zero byte rate or data size")]
    Empty,
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("container probe failed: {0}")]
    Container(String),
    #[error("ffprobe: {0}")]
    Tool(String),
    #[error("no ffprobe available")]
    NoProbeTool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Pcm,
    Float,
    Other(u16),
}

impl SampleFormat {
    fn from_tag(tag: u16) -> Self {
        match tag {
            WAVE_FORMAT_PCM => SampleFormat::Pcm,
            WAVE_FORMAT_IEEE_FLOAT => SampleFormat::Float,
            other => SampleFormat::Other(other),
        }
    }
}

/// Contents of the `fmt ` chunk that matter for codec selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub sample_format: SampleFormat,
    pub bits_per_sample: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FmtChunk {
    pub format: FormatInfo,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
}

/// What a header walk found; either chunk may be missing from a short read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WavHeader {
    pub fmt: Option<FmtChunk>,
    pub data_size: Option<u32>,
}

fn le_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn le_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Walk RIFF chunks from offset 12 until the `data` chunk header.
///
/// `stop_at_fmt` ends the walk once the format chunk has been read.
pub fn parse_wav_header(data: &[u8], stop_at_fmt: bool) -> Result<WavHeader, ProbeError> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return Err(ProbeError::NotWave);
    }

    let mut header = WavHeader::default();
    let mut pos = 12usize;
    while pos + 8 <= data.len() {
        let id = &data[pos..pos + 4];
        let size = le_u32(data, pos + 4).ok_or(ProbeError::Malformed(pos))?;
        let body = pos + 8;

        if id == b"fmt " {
            if size < 16 || body + 16 > data.len() {
                return Err(ProbeError::Malformed(pos));
            }
            let mut tag = le_u16(data, body).ok_or(ProbeError::Malformed(pos))?;
            if tag == WAVE_FORMAT_EXTENSIBLE && size >= 40 {
                // The real format is the first two bytes of the sub-format GUID.
                if let Some(sub) = le_u16(data, body + 24) {
                    tag = sub;
                }
            }
            header.fmt = Some(FmtChunk {
                format: FormatInfo {
                    sample_format: SampleFormat::from_tag(tag),
                    bits_per_sample: le_u16(data, body + 14).ok_or(ProbeError::Malformed(pos))?,
                },
                channels: le_u16(data, body + 2).ok_or(ProbeError::Malformed(pos))?,
                sample_rate: le_u32(data, body + 4).ok_or(ProbeError::Malformed(pos))?,
                byte_rate: le_u32(data, body + 8).ok_or(ProbeError::Malformed(pos))?,
            });
            if stop_at_fmt {
                break;
            }
        } else if id == b"data" {
            header.data_size = Some(size);
            break;
        }

        let padded = size as usize + (size as usize % 2);
        pos = match body.checked_add(padded) {
            Some(next) => next,
            None => return Err(ProbeError::Malformed(pos)),
        };
    }
    Ok(header)
}

/// `data_size / byte_rate` from a header buffer.
pub fn duration_from_header(data: &[u8]) -> Result<f64, ProbeError> {
    let header = parse_wav_header(data, false)?;
    let fmt = header.fmt.ok_or(ProbeError::MissingChunk("fmt "))?;
    let data_size = header.data_size.ok_or(ProbeError::MissingChunk("data"))?;
    if fmt.byte_rate == 0 || data_size == 0 {
        return Err(ProbeError::Empty);
    }
    Ok(data_size as f64 / fmt.byte_rate as f64)
}

fn read_prefix(path: &Path, limit: usize) -> Result<Vec<u8>, ProbeError> {
    let mut buf = Vec::with_capacity(limit.min(64 * 1024));
    File::open(path)?.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Stream properties used by the verification pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Probe the container in-process without decoding any audio.
pub fn container_info(path: &Path) -> Result<StreamInfo, ProbeError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| ProbeError::Container(e.to_string()))?;
    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| ProbeError::Container("no audio track".into()))?;

    let params = &track.codec_params;
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| ProbeError::Container("unknown sample rate".into()))?;
    let frames = params
        .n_frames
        .ok_or_else(|| ProbeError::Container("unknown frame count".into()))?;
    if sample_rate == 0 {
        return Err(ProbeError::Empty);
    }
    Ok(StreamInfo {
        duration_secs: frames as f64 / sample_rate as f64,
        sample_rate,
        channels: params.channels.map(|c| c.count() as u16).unwrap_or(0),
    })
}

/// Duration plus sample rate from the header, then the container probe.
pub fn stream_info(path: &Path) -> Option<StreamInfo> {
    let from_header = read_prefix(path, DURATION_HEADER_BYTES).and_then(|data| {
        let header = parse_wav_header(&data, false)?;
        let fmt = header.fmt.ok_or(ProbeError::MissingChunk("fmt "))?;
        Ok(StreamInfo {
            duration_secs: duration_from_header(&data)?,
            sample_rate: fmt.sample_rate,
            channels: fmt.channels,
        })
    });
    match from_header {
        Ok(info) => Some(info),
        Err(e) => {
            debug!("Header info failed for {}: {}", path.display(), e);
            container_info(path)
                .map_err(|e| debug!("Container info failed for {}: {}", path.display(), e))
                .ok()
        }
    }
}

/// Read the format chunk from the first 128 bytes.
pub fn get_format_info(path: &Path) -> Option<FormatInfo> {
    read_prefix(path, FORMAT_HEADER_BYTES)
        .and_then(|data| parse_wav_header(&data, true))
        .map_err(|e| debug!("Failed to read WAV format of {}: {}", path.display(), e))
        .ok()
        .and_then(|h| h.fmt.map(|f| f.format))
}

/// Ordered duration lookups; the first positive answer wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationStrategy {
    WavHeader,
    Container,
    Ffprobe,
}

pub const DURATION_STRATEGIES: [DurationStrategy; 3] = [
    DurationStrategy::WavHeader,
    DurationStrategy::Container,
    DurationStrategy::Ffprobe,
];

/// Reads file metadata, shelling out to ffprobe only as a last resort.
#[derive(Clone)]
pub struct MediaInspector {
    ffprobe: Option<PathBuf>,
    supervisor: Arc<ProcessSupervisor>,
}

impl MediaInspector {
    pub fn new(ffprobe: Option<PathBuf>, supervisor: Arc<ProcessSupervisor>) -> Self {
        Self {
            ffprobe,
            supervisor,
        }
    }

    /// Duration in seconds, or `0.0` when every strategy fails.
    pub fn get_duration(&self, path: &Path, job_id: &str) -> f64 {
        for strategy in DURATION_STRATEGIES {
            match self.try_duration(strategy, path, job_id) {
                Ok(secs) if secs.is_finite() && secs > 0.0 => return secs,
                Ok(secs) => debug!(?strategy, secs, "Ignoring non-positive duration"),
                Err(e) => debug!(?strategy, "Duration lookup failed for {}: {}", path.display(), e),
            }
        }
        tracing::warn!("Could not determine duration of {}", path.display());
        0.0
    }

    fn try_duration(
        &self,
        strategy: DurationStrategy,
        path: &Path,
        job_id: &str,
    ) -> Result<f64, ProbeError> {
        match strategy {
            DurationStrategy::WavHeader => {
                duration_from_header(&read_prefix(path, DURATION_HEADER_BYTES)?)
            }
            DurationStrategy::Container => container_info(path).map(|i| i.duration_secs),
            DurationStrategy::Ffprobe => self.ffprobe_duration(path, job_id),
        }
    }

    fn ffprobe_duration(&self, path: &Path, job_id: &str) -> Result<f64, ProbeError> {
        let ffprobe = self.ffprobe.as_ref().ok_or(ProbeError::NoProbeTool)?;
        let invocation = Invocation::new(ffprobe, "duration")
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path);
        let output = self
            .supervisor
            .run(&invocation, job_id, Some(FFPROBE_TIMEOUT), |_| {})
            .map_err(|e| ProbeError::Tool(e.to_string()))?;
        parse_duration_output(&output.stdout)
    }
}

/// ffprobe prints a single float (or `N/A`).
pub fn parse_duration_output(stdout: &str) -> Result<f64, ProbeError> {
    stdout
        .trim()
        .parse::<f64>()
        .map_err(|_| ProbeError::Tool(format!("unexpected duration output '{}'", stdout.trim())))
}

/// PCM codec ffmpeg writes the output with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCodec {
    PcmU8,
    PcmS16,
    PcmS24,
    PcmS32,
    PcmF32,
    PcmF64,
}

impl OutputCodec {
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            OutputCodec::PcmU8 => "pcm_u8",
            OutputCodec::PcmS16 => "pcm_s16le",
            OutputCodec::PcmS24 => "pcm_s24le",
            OutputCodec::PcmS32 => "pcm_s32le",
            OutputCodec::PcmF32 => "pcm_f32le",
            OutputCodec::PcmF64 => "pcm_f64le",
        }
    }
}

/// Pick the output codec. Never raises the bit depth of a known input.
pub fn choose_output_codec(target: BitDepth, input: Option<&FormatInfo>) -> OutputCodec {
    match target {
        BitDepth::Original => {
            let Some(info) = input else {
                return OutputCodec::PcmS16;
            };
            let bits = info.bits_per_sample;
            if info.sample_format == SampleFormat::Float {
                return if bits >= 64 {
                    OutputCodec::PcmF64
                } else {
                    OutputCodec::PcmF32
                };
            }
            match bits {
                0..=8 => OutputCodec::PcmU8,
                9..=16 => OutputCodec::PcmS16,
                17..=24 => OutputCodec::PcmS24,
                25..=32 => OutputCodec::PcmS32,
                _ => OutputCodec::PcmS16,
            }
        }
        BitDepth::Sixteen => OutputCodec::PcmS16,
        BitDepth::TwentyFour => match input {
            Some(info) if info.bits_per_sample > 0 && info.bits_per_sample <= 16 => {
                OutputCodec::PcmS16
            }
            _ => OutputCodec::PcmS24,
        },
    }
}

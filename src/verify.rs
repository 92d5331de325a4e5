//! Post-run check that every input produced an output.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::inspect::stream_info;
use crate::scanner::mirror_output_path;

/// Relative duration difference tolerated before a mismatch is logged.
pub const DURATION_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationReport {
    pub matched: usize,
    /// Inputs with no output file. Any entry fails verification.
    pub missing: Vec<PathBuf>,
    /// Informational differences; never a failure.
    pub mismatched: Vec<String>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Compare one input against its rendered output. `None` when they agree
/// or either side could not be read. Sample rates are always compared;
/// durations only when `compare_duration` is set.
pub fn compare_streams(input: &Path, output: &Path, compare_duration: bool) -> Option<String> {
    let (Some(src), Some(dst)) = (stream_info(input), stream_info(output)) else {
        debug!("Skipping stream comparison for {}", input.display());
        return None;
    };
    let mut notes = Vec::new();
    if compare_duration && src.duration_secs > 0.0 {
        let diff = (src.duration_secs - dst.duration_secs).abs() / src.duration_secs;
        if diff > DURATION_TOLERANCE {
            notes.push(format!(
                "duration {:.3}s -> {:.3}s",
                src.duration_secs, dst.duration_secs
            ));
        }
    }
    if src.sample_rate != dst.sample_rate {
        notes.push(format!("sample rate {} -> {}", src.sample_rate, dst.sample_rate));
    }
    (!notes.is_empty()).then(|| format!("{}: {}", input.display(), notes.join(", ")))
}

/// Check every input under `input_root` for an output under `output_root`.
///
/// Sample rates of existing pairs are compared as well. Durations are only
/// compared with `compare_duration`; trimmed runs shorten files on purpose.
pub fn verify_outputs(
    inputs: &[PathBuf],
    input_root: &Path,
    output_root: &Path,
    compare_duration: bool,
) -> VerificationReport {
    let mut report = VerificationReport::default();
    for input in inputs {
        let output = mirror_output_path(input_root, output_root, input);
        if !output.is_file() {
            warn!("Missing output for {}", input.display());
            report.missing.push(input.clone());
            continue;
        }
        report.matched += 1;
        if let Some(note) = compare_streams(input, &output, compare_duration) {
            warn!("Verification mismatch: {}", note);
            report.mismatched.push(note);
        }
    }
    report
}

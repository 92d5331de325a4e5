use std::path::Path;

use serde::Serialize;

use crate::models::{BatchEvent, PreviewEvent, RunOutcome, ScanEntry};

/// Format a duration in seconds as "M:SS".
pub fn format_duration(secs: f64) -> String {
    let total_secs = secs.round() as u64;
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    format!("{}:{:02}", minutes, seconds)
}

fn format_sample_format(entry: &ScanEntry) -> String {
    match entry.bits_per_sample {
        Some(bits) if entry.float => format!("{}-bit float", bits),
        Some(bits) => format!("{}-bit", bits),
        None => "?".to_string(),
    }
}

/// Format a scan listing as a table.
pub fn format_scan_table(entries: &[ScanEntry]) -> String {
    let separator = "\u{2500}".repeat(58);
    let mut output = String::new();

    output.push_str(&format!(
        "{:>8} {:>8} {:>13}  {}\n",
        "Duration", "Rate", "Format", "File"
    ));
    output.push_str(&separator);
    output.push('\n');

    for entry in entries {
        let rate = entry
            .sample_rate
            .map(|r| r.to_string())
            .unwrap_or_else(|| "?".to_string());
        output.push_str(&format!(
            "{:>8} {:>8} {:>13}  {}\n",
            format_duration(entry.duration_secs),
            rate,
            format_sample_format(entry),
            entry.path.display(),
        ));
    }

    output.push_str(&separator);
    output.push('\n');

    let total: f64 = entries.iter().map(|e| e.duration_secs).sum();
    output.push_str(&format!(
        "Number of files: {}\n\
         Total duration:  {}",
        entries.len(),
        format_duration(total),
    ));

    output
}

/// Format any serializable value as pretty-printed JSON.
pub fn format_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// One compact JSON object per line, for `--json` event streams.
pub fn format_json_line<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Human-readable progress line for a batch event, or `None` for events
/// that are too chatty for plain output.
pub fn format_batch_event(event: &BatchEvent, total: usize) -> Option<String> {
    match event {
        BatchEvent::Started {
            total,
            already_processed,
            skipped_dirs,
        } => {
            let mut line = format!("Found {} WAV files", total);
            if *already_processed > 0 {
                line.push_str(&format!(", {} already processed", already_processed));
            }
            if *skipped_dirs > 0 {
                line.push_str(&format!(", {} unreadable entries skipped", skipped_dirs));
            }
            Some(line)
        }
        BatchEvent::FileStarted { path, index, .. } => Some(format!(
            "[{}/{}] Processing: {}",
            index + 1,
            total,
            file_name(path)
        )),
        BatchEvent::FileCompleted {
            completed,
            total,
            percent,
            ..
        } => Some(format!("  done ({}/{}, {:.0}%)", completed, total, percent)),
        BatchEvent::FileInterrupted { .. } => Some("  interrupted, will redo after resume".to_string()),
        BatchEvent::FileFailed { path, message } => {
            Some(format!("  failed: {}: {}", file_name(path), message))
        }
        BatchEvent::Paused => Some("Paused".to_string()),
        BatchEvent::Resumed => Some("Resumed".to_string()),
        BatchEvent::Finished { outcome } => Some(format_outcome(outcome)),
        BatchEvent::Phase { .. } | BatchEvent::Log { .. } => None,
    }
}

pub fn format_preview_event(event: &PreviewEvent) -> String {
    match event {
        PreviewEvent::FileReady {
            relative, rendered, ..
        } => format!("Ready: {} -> {}", relative.display(), rendered.display()),
        PreviewEvent::FileFailed { path, message } => {
            format!("Failed: {}: {}", file_name(path), message)
        }
        PreviewEvent::Done { count, temp_root } => {
            format!("Preview done: {} files in {}", count, temp_root.display())
        }
    }
}

/// Summary line for the end of a batch.
pub fn format_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Verified {
            matched,
            mismatched,
        } => {
            if mismatched.is_empty() {
                format!("Done: {} files processed and verified", matched)
            } else {
                format!(
                    "Done: {} files processed and verified ({} with duration/sample-rate differences)",
                    matched,
                    mismatched.len()
                )
            }
        }
        RunOutcome::VerificationFailed { missing } => {
            format!("Verification failed: {} files not processed", missing.len())
        }
        RunOutcome::Canceled => "Processing canceled".to_string(),
        RunOutcome::Errored { path, message } => match path {
            Some(path) => format!("Error processing {}: {}", file_name(path), message),
            None => format!("Error: {}", message),
        },
    }
}

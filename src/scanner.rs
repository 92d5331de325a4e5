use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{NormalizeError, Result};

const WAV_EXTENSIONS: &[&str] = &["wav", "wave"];

/// Check if a path has a `.wav` or `.wave` extension, ignoring case.
pub fn is_wav_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| WAV_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Files found under an input root, in processing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub files: Vec<PathBuf>,
    /// Directories that could not be read and were left out.
    pub skipped_dirs: usize,
}

/// Recursively collect WAV files, sorted by name within each directory.
///
/// Unreadable directories are skipped and counted, never fatal.
pub fn scan_wav_files(root: &Path) -> ScanReport {
    let mut report = ScanReport::default();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && is_wav_file(entry.path()) {
                    report.files.push(entry.into_path());
                }
            }
            Err(e) => {
                report.skipped_dirs += 1;
                debug!(
                    "Skipping {}: {}",
                    e.path().map(|p| p.display().to_string()).unwrap_or_default(),
                    e
                );
            }
        }
    }
    if report.skipped_dirs > 0 {
        warn!(
            "Skipped {} unreadable entries under {}",
            report.skipped_dirs,
            root.display()
        );
    }
    report
}

/// Map `input` under `input_root` to the same relative path under `output_root`.
pub fn mirror_output_path(input_root: &Path, output_root: &Path, input: &Path) -> PathBuf {
    match input.strip_prefix(input_root) {
        Ok(relative) => output_root.join(relative),
        Err(_) => output_root.join(input.file_name().unwrap_or(input.as_os_str())),
    }
}

/// Create the parent directories of an output file.
pub fn prepare_output(output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            NormalizeError::io(format!("Failed to create {}", parent.display()), e)
        })?;
    }
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// True when `dir` has nothing but dot-files in it (or does not exist).
pub fn output_is_empty(dir: &Path) -> Result<bool> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => {
            return Err(NormalizeError::io(
                format!("Failed to read {}", dir.display()),
                e,
            ))
        }
    };
    for entry in entries.filter_map(|e| e.ok()) {
        if !is_hidden(&entry.path()) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Remove everything in `dir` except dot-files. Returns how many entries went.
pub fn clear_output_dir(dir: &Path) -> Result<usize> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| NormalizeError::io(format!("Failed to read {}", dir.display()), e))?;
    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if is_hidden(&path) {
            continue;
        }
        let result = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        result.map_err(|e| NormalizeError::io(format!("Failed to remove {}", path.display()), e))?;
        removed += 1;
    }
    Ok(removed)
}

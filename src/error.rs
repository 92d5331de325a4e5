use std::path::PathBuf;
use std::time::Duration;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, NormalizeError>;

/// Errors surfaced by the normalization pipeline.
///
/// Parse failures (WAV headers, loudness reports, silence timestamps) never
/// show up here: they degrade to "unknown" values at the call site. What is
/// left is what a run cannot recover from.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// Neither the bundled, packaged nor system copy of a tool was found.
    #[error("{tool} not found; install ffmpeg or place it under {hint}")]
    ToolNotFound { tool: &'static str, hint: String },

    /// A path handed to `start` was missing or not a directory.
    #[error("Invalid path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The external tool ran but exited unsuccessfully.
    #[error("{tool} {stage} failed ({}): {detail}", code.map_or_else(|| "killed".to_string(), |c| format!("exit code {c}")))]
    ToolFailed {
        tool: String,
        stage: &'static str,
        code: Option<i32>,
        detail: String,
    },

    #[error("{tool} {stage} timed out after {}s", timeout.as_secs())]
    ToolTimeout {
        tool: String,
        stage: &'static str,
        timeout: Duration,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    /// Outputs are missing after an otherwise successful run.
    #[error("Verification failed: {} files not processed", missing.len())]
    Verification { missing: Vec<PathBuf> },

    /// Cooperative cancellation; a clean early exit, not a failure.
    #[error("Processing canceled")]
    Canceled,

    #[error("A run is already in progress")]
    Busy,
}

impl NormalizeError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_failed_message_names_exit_code() {
        let err = NormalizeError::ToolFailed {
            tool: "ffmpeg".into(),
            stage: "render",
            code: Some(1),
            detail: "Invalid argument".into(),
        };
        assert_eq!(
            err.to_string(),
            "ffmpeg render failed (exit code 1): Invalid argument"
        );

        let killed = NormalizeError::ToolFailed {
            tool: "ffmpeg".into(),
            stage: "analyze",
            code: None,
            detail: String::new(),
        };
        assert!(killed.to_string().contains("(killed)"));
    }

    #[test]
    fn test_verification_message_counts_missing() {
        let err = NormalizeError::Verification {
            missing: vec![PathBuf::from("a.wav"), PathBuf::from("b.wav")],
        };
        assert_eq!(err.to_string(), "Verification failed: 2 files not processed");
    }
}

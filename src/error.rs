//! Pipeline failure taxonomy.
//!
//! Every failure the pipeline surfaces carries a stable machine-readable
//! reason code plus a human-readable detail. The codes are part of the UI
//! contract: front-ends branch on `code()`, log lines and dialogs show the
//! detail. None of these terminate the process.
//!
//! Code table:
//!
//! - `SOURCE_UNAVAILABLE` - device/file cannot be opened, or a device
//!   disappeared mid-capture after retries were exhausted
//! - `READ_ERROR`         - transient read failure, or a read interrupted
//!   by shutdown
//! - `END_OF_STREAM`      - file playback reached end of media (normal)
//! - `MODEL_UNAVAILABLE`  - detection model could not be loaded
//! - `WRITE_UNAVAILABLE`  - recording output could not be opened
//! - `WRITE_ERROR`        - recording failed mid-segment

use std::fmt;

use thiserror::Error;

// ----------------------------------------------------------------------------
// PipelineError
// ----------------------------------------------------------------------------

/// Everything that can go wrong inside the pipeline, by failure site.
///
/// Source failures are the only ones fatal to a running pipeline instance;
/// detection and recording failures degrade their own stage and leave
/// capture running.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The capture device or media file could not be opened, or a live
    /// device stopped responding and the bounded retries were used up.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A single read failed. The device source retries these internally;
    /// callers normally only see one when a blocked read was interrupted.
    #[error("read error: {0}")]
    ReadError(String),

    /// File playback consumed the last frame. Not an error in the usual
    /// sense; modeled here so `next_frame()` has a single result type.
    #[error("end of stream")]
    EndOfStream,

    /// The detection model could not be loaded at detector construction.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The segment output could not be opened (directory missing, bad
    /// permissions, format needs a backend this build lacks).
    #[error("write unavailable: {0}")]
    WriteUnavailable(String),

    /// Writing or rotating an open segment failed (disk full, I/O error).
    #[error("write error: {0}")]
    WriteError(String),
}

impl PipelineError {
    /// Stable reason code for this failure. Never changes between releases.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
            PipelineError::ReadError(_) => "READ_ERROR",
            PipelineError::EndOfStream => "END_OF_STREAM",
            PipelineError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            PipelineError::WriteUnavailable(_) => "WRITE_UNAVAILABLE",
            PipelineError::WriteError(_) => "WRITE_ERROR",
        }
    }

    /// Snapshot form carried in pipeline status for UI consumption.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, PipelineError::EndOfStream)
    }
}

// ----------------------------------------------------------------------------
// ErrorReport
// ----------------------------------------------------------------------------

/// Owned, cloneable mirror of a [`PipelineError`] for status snapshots.
///
/// The pipeline keeps the last recoverable failure around so a UI polling
/// the status after the fact still sees what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Stable reason code, see the module docs for the table.
    pub code: &'static str,
    /// Human-readable detail for logs and dialogs.
    pub message: String,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorReport {}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        let cases = [
            (
                PipelineError::SourceUnavailable("x".into()),
                "SOURCE_UNAVAILABLE",
            ),
            (PipelineError::ReadError("x".into()), "READ_ERROR"),
            (PipelineError::EndOfStream, "END_OF_STREAM"),
            (
                PipelineError::ModelUnavailable("x".into()),
                "MODEL_UNAVAILABLE",
            ),
            (
                PipelineError::WriteUnavailable("x".into()),
                "WRITE_UNAVAILABLE",
            ),
            (PipelineError::WriteError("x".into()), "WRITE_ERROR"),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn report_carries_code_and_detail() {
        let err = PipelineError::WriteUnavailable("disk gone".into());
        let report = err.report();
        assert_eq!(report.code, "WRITE_UNAVAILABLE");
        assert!(report.message.contains("disk gone"));
        assert_eq!(format!("{report}"), format!("{}: {}", report.code, report.message));
    }

    #[test]
    fn end_of_stream_is_recognized() {
        assert!(PipelineError::EndOfStream.is_end_of_stream());
        assert!(!PipelineError::ReadError("x".into()).is_end_of_stream());
    }
}

//! Error types for the transfer subsystem.

use std::fmt;

use snaparc_core::CoreError;
use thiserror::Error;

/// Result type alias for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// A stage that did not exit cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// Stage role.
    pub stage: &'static str,
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Last bytes the stage wrote to stderr.
    pub stderr: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} exited with {}", self.stage, code)?,
            None => write!(f, "{} was killed by a signal", self.stage)?,
        }
        if !self.stderr.is_empty() {
            write!(f, " ({})", self.stderr)?;
        }
        Ok(())
    }
}

fn join_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error variants for transfer operations.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A precondition of the pipeline does not hold; nothing was spawned.
    #[error("Precondition failed: {reason}")]
    Precondition {
        /// What is missing or already present.
        reason: String,
    },

    /// The rate limit is not a positive size with an optional K/M/G/T suffix.
    #[error("Invalid rate limit: {input:?}")]
    InvalidRateLimit {
        /// The rejected input.
        input: String,
    },

    /// At least one stage exited unsuccessfully; the artifact is invalid.
    #[error("Pipeline failed: {}", join_failures(.failures))]
    PipelineFailure {
        /// Every stage that failed, in pipeline order.
        failures: Vec<StageFailure>,
    },

    /// The unit cannot be named.
    #[error("Naming error: {0}")]
    Naming(#[from] CoreError),

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_failure_message() {
        let err = TransferError::PipelineFailure {
            failures: vec![
                StageFailure {
                    stage: "serializer",
                    code: Some(1),
                    stderr: "ERROR: not a subvolume".to_string(),
                },
                StageFailure {
                    stage: "meter",
                    code: None,
                    stderr: String::new(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "Pipeline failed: serializer exited with 1 (ERROR: not a subvolume); meter was killed by a signal"
        );
    }

    #[test]
    fn test_precondition_message() {
        let err = TransferError::Precondition {
            reason: "/tmp/x already exists".to_string(),
        };
        assert_eq!(err.to_string(), "Precondition failed: /tmp/x already exists");
    }

    #[test]
    fn test_from_core_error() {
        let err: TransferError = CoreError::InvalidName {
            name: "x".to_string(),
            reason: "contains a NUL character",
        }
        .into();
        assert!(matches!(err, TransferError::Naming(_)));
    }
}

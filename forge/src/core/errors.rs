//! Stage error taxonomy.
//!
//! Every failure a stage can hit is returned to the driver as a value. The
//! driver inspects it (or its [`StageError::observation`] text) and decides
//! whether to retry with revised input.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::compact::CompactionError;
use crate::core::types::{ProcessOutput, Stage, StageState};

/// Why an external process produced no usable result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationFailure {
    #[error("failed to spawn: {0}")]
    Spawn(String),
    #[error("timed out after {timeout_secs}s and was killed")]
    TimedOut { timeout_secs: u64 },
    #[error("cancelled and killed")]
    Cancelled,
    #[error("failed while waiting: {0}")]
    Wait(String),
}

#[derive(Debug, Error)]
pub enum StageError {
    /// Stage called before its predecessor succeeded.
    #[error("{stage} requires state '{required}' but the run is '{current}'")]
    Prerequisite {
        stage: Stage,
        required: StageState,
        current: StageState,
    },

    /// The external process could not be run to completion.
    #[error("{stage}: `{command}` {failure}")]
    ProcessInvocation {
        stage: Stage,
        command: String,
        failure: InvocationFailure,
    },

    /// The process succeeded but did not leave the expected artifact.
    #[error("{stage}: expected artifact {} is missing (exit code {:?})", artifact.display(), output.exit_code)]
    ArtifactMissing {
        stage: Stage,
        artifact: PathBuf,
        output: ProcessOutput,
    },

    /// The generator exited non-zero.
    #[error("{stage}: process exited with code {:?}", output.exit_code)]
    ProcessFailed { stage: Stage, output: ProcessOutput },

    #[error("compaction failed: {0}")]
    Compaction(#[from] CompactionError),

    /// Reading or writing a staged file failed.
    #[error("staging I/O on {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StageError {
    pub fn staging(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StageError::Staging {
            path: path.into(),
            source,
        }
    }

    /// True when the stage was rejected before touching disk or spawning.
    pub fn is_prerequisite(&self) -> bool {
        matches!(self, StageError::Prerequisite { .. })
    }

    /// Diagnostic text handed back to the driver in place of the artifact.
    pub fn observation(&self) -> String {
        match self {
            StageError::ArtifactMissing { output, .. } | StageError::ProcessFailed { output, .. } => {
                format!("error: {self}\n{}", output.render())
            }
            _ => format!("error: {self}\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_missing_observation_carries_output() {
        let err = StageError::ArtifactMissing {
            stage: Stage::SubmitSpecification,
            artifact: PathBuf::from("/tmp/run/chisel.hpp"),
            output: ProcessOutput {
                stdout: "filePath: spec.txt".to_string(),
                stderr: "warning: empty grammar".to_string(),
                exit_code: Some(0),
                ..ProcessOutput::default()
            },
        };
        let text = err.observation();
        assert!(text.contains("chisel.hpp is missing"));
        assert!(text.contains("filePath: spec.txt"));
        assert!(text.contains("warning: empty grammar"));
        assert!(text.contains("[exit code 0]"));
    }

    #[test]
    fn timeout_message_names_command() {
        let err = StageError::ProcessInvocation {
            stage: Stage::SubmitInterpreter,
            command: "clang++ main.cpp".to_string(),
            failure: InvocationFailure::TimedOut { timeout_secs: 5 },
        };
        assert_eq!(
            err.to_string(),
            "submit_interpreter: `clang++ main.cpp` timed out after 5s and was killed"
        );
        assert!(!err.is_prerequisite());
    }
}

//! Test-only helpers: a scripted process runner and a hermetic config.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::io::config::ForgeConfig;
use crate::io::process::{CancelToken, CommandOutput, ProcessError};
use crate::io::toolchain::{Invocation, ProcessRunner};

#[derive(Debug, Clone)]
enum ScriptedResult {
    Output(CommandOutput),
    SpawnError(String),
}

/// One queued response for [`ScriptedRunner`].
#[derive(Debug, Clone)]
pub struct ScriptedProcess {
    result: ScriptedResult,
    writes: Vec<(PathBuf, Vec<u8>)>,
}

impl ScriptedProcess {
    /// Process that exits with `code`.
    pub fn exit(code: i32) -> Self {
        Self::from_output(CommandOutput {
            exit_code: Some(code),
            ..CommandOutput::default()
        })
    }

    /// Process that overran its timeout and was killed.
    pub fn timed_out() -> Self {
        Self::from_output(CommandOutput {
            timed_out: true,
            ..CommandOutput::default()
        })
    }

    /// Process killed through the run's cancel token.
    pub fn cancelled() -> Self {
        Self::from_output(CommandOutput {
            cancelled: true,
            ..CommandOutput::default()
        })
    }

    /// Process that could not be spawned at all.
    pub fn spawn_error(message: &str) -> Self {
        Self {
            result: ScriptedResult::SpawnError(message.to_string()),
            writes: Vec::new(),
        }
    }

    fn from_output(output: CommandOutput) -> Self {
        Self {
            result: ScriptedResult::Output(output),
            writes: Vec::new(),
        }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        if let ScriptedResult::Output(output) = &mut self.result {
            output.stdout = text.as_bytes().to_vec();
        }
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        if let ScriptedResult::Output(output) = &mut self.result {
            output.stderr = text.as_bytes().to_vec();
        }
        self
    }

    /// Write `contents` to `path` when the process "runs", like a real tool leaving an artifact.
    pub fn writes(mut self, path: impl Into<PathBuf>, contents: impl AsRef<[u8]>) -> Self {
        self.writes.push((path.into(), contents.as_ref().to_vec()));
        self
    }
}

/// [`ProcessRunner`] that replays queued [`ScriptedProcess`] responses in order
/// and records every invocation it receives.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    queue: RefCell<VecDeque<ScriptedProcess>>,
    calls: RefCell<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, process: ScriptedProcess) {
        self.queue.borrow_mut().push_back(process);
    }

    /// Invocations received so far, oldest first.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(
        &self,
        invocation: &Invocation,
        _cancel: &CancelToken,
    ) -> Result<CommandOutput, ProcessError> {
        self.calls.borrow_mut().push(invocation.clone());
        let next = self
            .queue
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ProcessError::Io {
                context: "scripted runner exhausted",
                source: io::Error::other(format!("no response queued for {}", invocation.program)),
            })?;

        for (path, contents) in &next.writes {
            fs::write(path, contents).map_err(|source| ProcessError::Io {
                context: "scripted artifact write",
                source,
            })?;
        }

        match next.result {
            ScriptedResult::Output(output) => Ok(output),
            ScriptedResult::SpawnError(message) => Err(ProcessError::Spawn {
                program: invocation.program.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, message),
            }),
        }
    }
}

/// Config rooted at `root` with placeholder tool names and short timeouts.
///
/// The generator runs in the staging dir and is invoked as
/// `gen -o {{ header }} {{ spec }}`; the compiler as `cc {{ source }} -o {{ executable }}`.
pub fn test_config(root: &Path) -> ForgeConfig {
    let mut cfg = ForgeConfig {
        staging_root: root.join("runs"),
        output_limit_bytes: 10_000,
        ..ForgeConfig::default()
    };
    cfg.generator.command = ["gen", "-o", "{{ header }}", "{{ spec }}"]
        .map(String::from)
        .to_vec();
    cfg.generator.workdir = None;
    cfg.generator.timeout_secs = 5;
    cfg.compiler.command = ["cc", "{{ source }}", "-o", "{{ executable }}"]
        .map(String::from)
        .to_vec();
    cfg.compiler.timeout_secs = 5;
    cfg.example.timeout_secs = 5;
    cfg
}

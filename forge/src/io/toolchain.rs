//! Process-runner abstraction for the external toolchain.
//!
//! The [`ProcessRunner`] trait decouples stage orchestration from actually
//! spawning the generator, compiler and compiled interpreter. Tests use a
//! scripted runner that returns predetermined outputs without spawning
//! processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument};

use crate::io::process::{CancelToken, CommandOutput, ProcessError, run_command_with_timeout};

/// One fully-rendered external process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the process.
    pub workdir: PathBuf,
    /// Maximum time to wait before the process is killed.
    pub timeout: Duration,
    /// Truncate captured stdout/stderr beyond this many bytes per stream.
    pub output_limit_bytes: usize,
}

impl Invocation {
    /// Human-readable command line for logs and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Abstraction over external process execution.
pub trait ProcessRunner {
    /// Run `invocation` to completion, timeout or cancellation.
    fn run(&self, invocation: &Invocation, cancel: &CancelToken)
    -> Result<CommandOutput, ProcessError>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &R {
    fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancelToken,
    ) -> Result<CommandOutput, ProcessError> {
        (**self).run(invocation, cancel)
    }
}

/// Runner that spawns real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    #[instrument(skip_all, fields(program = %invocation.program, timeout_secs = invocation.timeout.as_secs()))]
    fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancelToken,
    ) -> Result<CommandOutput, ProcessError> {
        info!(workdir = %invocation.workdir.display(), command = %invocation.command_line(), "running toolchain command");
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).current_dir(&invocation.workdir);
        run_command_with_timeout(
            cmd,
            invocation.timeout,
            invocation.output_limit_bytes,
            cancel,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(program: &str, args: &[&str], workdir: PathBuf) -> Invocation {
        Invocation {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            workdir,
            timeout: Duration::from_secs(5),
            output_limit_bytes: 1000,
        }
    }

    #[test]
    fn command_line_joins_program_and_args() {
        let inv = invocation("clang++", &["-g", "main.cpp"], PathBuf::from("."));
        assert_eq!(inv.command_line(), "clang++ -g main.cpp");
    }

    #[test]
    fn system_runner_uses_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "here").expect("write");
        let inv = invocation("cat", &["marker.txt"], temp.path().to_path_buf());

        let out = SystemRunner.run(&inv, &CancelToken::new()).expect("run");
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout, b"here");
    }
}

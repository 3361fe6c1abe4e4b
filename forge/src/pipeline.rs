//! Stage dispatcher for a single pipeline run.
//!
//! A [`Pipeline`] owns one run: its staging directory, its [`StageRecord`] and
//! the cancellation token shared with in-flight processes. The driver calls
//! the three stage operations (directly or through [`Pipeline::invoke`]) one
//! at a time; each call either advances the run's state or returns a
//! [`StageError`] describing why it could not.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, instrument, warn};

use crate::core::compact::compact_bytes;
use crate::core::errors::{InvocationFailure, StageError};
use crate::core::state::{after_build, after_example, after_specification, check_prerequisite};
use crate::core::types::{ProcessOutput, Stage, StageOutput, StageRecord, StageState};
use crate::io::config::ForgeConfig;
use crate::io::process::{CancelToken, ProcessError};
use crate::io::record_store::{load_record, write_record};
use crate::io::staging::{Checkpoint, RunDir, generate_run_id};
use crate::io::template::{CommandVars, DEFAULT_BUILD_SOURCE, render_command};
use crate::io::toolchain::{Invocation, ProcessRunner};

/// One pipeline run and the stage operations offered to the driver.
pub struct Pipeline<R> {
    config: ForgeConfig,
    runner: R,
    run_dir: RunDir,
    record: StageRecord,
    cancel: CancelToken,
}

impl<R: ProcessRunner> Pipeline<R> {
    /// Start a new run with a fresh staging directory.
    #[instrument(skip_all, fields(staging_root = %config.staging_root.display()))]
    pub fn start(config: ForgeConfig, runner: R) -> Result<Self> {
        config.validate()?;
        let template = load_build_source_template(&config)?;
        let run_id = generate_run_id();
        let run_dir = RunDir::create(&config.staging_root, &run_id, &template)?;
        let record = StageRecord::new(&run_id);
        write_record(&run_dir.record_path(), &record)?;
        info!(run_id = %run_id, "run started");
        Ok(Self {
            config,
            runner,
            run_dir,
            record,
            cancel: CancelToken::new(),
        })
    }

    /// Reattach to a run started earlier (possibly by another process).
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub fn resume(config: ForgeConfig, runner: R, run_id: &str) -> Result<Self> {
        config.validate()?;
        let run_dir = RunDir::open(&config.staging_root, run_id)?;
        let record = load_record(&run_dir.record_path())?;
        if record.run_id != run_id {
            bail!(
                "record in {} belongs to run '{}'",
                run_dir.root().display(),
                record.run_id
            );
        }
        info!(state = %record.state, "run resumed");
        Ok(Self {
            config,
            runner,
            run_dir,
            record,
            cancel: CancelToken::new(),
        })
    }

    pub fn run_id(&self) -> &str {
        self.run_dir.run_id()
    }

    pub fn run_dir(&self) -> &RunDir {
        &self.run_dir
    }

    pub fn record(&self) -> &StageRecord {
        &self.record
    }

    pub fn state(&self) -> StageState {
        self.record.state
    }

    /// Token that kills the in-flight process of this run when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Dispatch `input` to the stage named by `stage`.
    pub fn invoke(&mut self, stage: Stage, input: &str) -> Result<StageOutput, StageError> {
        let result = match stage {
            Stage::SubmitSpecification => self.submit_specification(input).map(StageOutput::Parser),
            Stage::SubmitInterpreter => self.submit_interpreter(input).map(StageOutput::Process),
            Stage::RunExample => self.run_example(input).map(StageOutput::Process),
        };
        if let Err(err) = &result {
            warn!(run_id = %self.record.run_id, %stage, err = %err, "stage failed");
        }
        result
    }

    /// Generate a parser from `spec` and return its compacted header.
    #[instrument(skip_all, fields(run_id = %self.record.run_id, spec_bytes = spec.len()))]
    pub fn submit_specification(&mut self, spec: &str) -> Result<String, StageError> {
        let stage = Stage::SubmitSpecification;
        check_prerequisite(stage, self.record.state)?;

        let spec_path = self.run_dir.spec_path();
        let header_path = self.run_dir.parser_header_path();
        let checkpoint = self.checkpoint(&[spec_path.clone(), header_path.clone()])?;
        write_staged(&spec_path, spec)?;

        let mut vars = self.command_vars();
        vars.insert("spec", path_arg(&spec_path));
        vars.insert("header", path_arg(&header_path));
        let workdir = self
            .config
            .generator
            .workdir
            .clone()
            .unwrap_or_else(|| self.run_dir.root().to_path_buf());
        let invocation = self.invocation(
            stage,
            &self.config.generator.command,
            &vars,
            workdir,
            self.config.generator.timeout(),
        )?;
        let output = self.execute(stage, &invocation)?;

        if !output.success() {
            return Err(StageError::ProcessFailed { stage, output });
        }
        if !header_path.is_file() {
            return Err(StageError::ArtifactMissing {
                stage,
                artifact: header_path,
                output,
            });
        }

        let header = fs::read(&header_path).map_err(|err| StageError::staging(&header_path, err))?;
        let header_bytes = header.len();
        let compacted = compact_bytes(header)?;

        let mut next = self.record.clone();
        next.specification = Some(spec.to_string());
        next.parser_artifact = Some(compacted.clone());
        next.state = after_specification();
        self.commit(next, checkpoint)?;

        info!(
            header_bytes,
            compacted_bytes = compacted.len(),
            "parser generated"
        );
        Ok(compacted)
    }

    /// Compile `source` as the interpreter header against the current parser.
    ///
    /// A non-zero compiler exit is returned as data; only an executable
    /// produced by a clean exit moves the run to `Built`.
    #[instrument(skip_all, fields(run_id = %self.record.run_id, source_bytes = source.len()))]
    pub fn submit_interpreter(&mut self, source: &str) -> Result<ProcessOutput, StageError> {
        let stage = Stage::SubmitInterpreter;
        check_prerequisite(stage, self.record.state)?;

        let interpreter_path = self.run_dir.interpreter_path();
        let executable_path = self.run_dir.executable_path();
        let checkpoint = self.checkpoint(&[interpreter_path.clone(), executable_path.clone()])?;
        write_staged(&interpreter_path, source)?;

        let mut vars = self.command_vars();
        vars.insert("source", path_arg(&self.run_dir.build_source_path()));
        vars.insert("executable", path_arg(&executable_path));
        let invocation = self.invocation(
            stage,
            &self.config.compiler.command,
            &vars,
            self.run_dir.root().to_path_buf(),
            self.config.compiler.timeout(),
        )?;
        let output = self.execute(stage, &invocation)?;

        let produced = executable_path.is_file();
        if output.success() && !produced {
            return Err(StageError::ArtifactMissing {
                stage,
                artifact: executable_path,
                output,
            });
        }

        let mut next = self.record.clone();
        next.interpreter_source = Some(source.to_string());
        next.build_log = Some(output.clone());
        next.state = after_build(output.success() && produced);
        self.commit(next, checkpoint)?;

        info!(exit_code = ?output.exit_code, state = %self.record.state, "interpreter compiled");
        Ok(output)
    }

    /// Run the compiled interpreter over `example`.
    #[instrument(skip_all, fields(run_id = %self.record.run_id, example_bytes = example.len()))]
    pub fn run_example(&mut self, example: &str) -> Result<ProcessOutput, StageError> {
        let stage = Stage::RunExample;
        check_prerequisite(stage, self.record.state)?;

        let example_path = self.run_dir.example_path();
        let checkpoint = self.checkpoint(std::slice::from_ref(&example_path))?;
        write_staged(&example_path, example)?;

        let invocation = Invocation {
            program: path_arg(&self.run_dir.executable_path()),
            args: vec![path_arg(&example_path)],
            workdir: self.run_dir.root().to_path_buf(),
            timeout: self.config.example.timeout(),
            output_limit_bytes: self.config.output_limit_bytes,
        };
        let output = self.execute(stage, &invocation)?;

        let mut next = self.record.clone();
        next.example_source = Some(example.to_string());
        next.example_output = Some(output.stdout.clone());
        next.state = after_example(self.record.state);
        self.commit(next, checkpoint)?;

        info!(exit_code = ?output.exit_code, "example executed");
        Ok(output)
    }

    /// Store the driver's free-text summary of the run.
    pub fn record_documentation(&mut self, text: &str) -> Result<()> {
        let mut next = self.record.clone();
        next.documentation = Some(text.to_string());
        write_record(&self.run_dir.record_path(), &next)?;
        self.record = next;
        Ok(())
    }

    /// End the run: remove its staging directory and hand back the final record.
    #[instrument(skip_all, fields(run_id = %self.record.run_id))]
    pub fn finish(self) -> Result<StageRecord> {
        let record = self.record;
        self.run_dir.remove()?;
        info!(state = %record.state, "run finished");
        Ok(record)
    }

    fn checkpoint(&self, paths: &[PathBuf]) -> Result<Checkpoint, StageError> {
        self.run_dir
            .checkpoint(paths)
            .map_err(|err| StageError::staging(self.run_dir.root(), err))
    }

    fn command_vars(&self) -> CommandVars {
        let mut vars = CommandVars::new();
        vars.insert("run_dir", path_arg(self.run_dir.root()));
        vars
    }

    fn invocation(
        &self,
        stage: Stage,
        template: &[String],
        vars: &CommandVars,
        workdir: PathBuf,
        timeout: Duration,
    ) -> Result<Invocation, StageError> {
        let spawn_error = |message: String| StageError::ProcessInvocation {
            stage,
            command: template.join(" "),
            failure: InvocationFailure::Spawn(message),
        };
        let mut rendered = render_command(template, vars)
            .map_err(|err| spawn_error(format!("{err:#}")))?
            .into_iter();
        let program = rendered
            .next()
            .ok_or_else(|| spawn_error("empty command".to_string()))?;
        Ok(Invocation {
            program,
            args: rendered.collect(),
            workdir,
            timeout,
            output_limit_bytes: self.config.output_limit_bytes,
        })
    }

    /// Run `invocation`, turning spawn failures, timeouts and cancellation into errors.
    fn execute(&self, stage: Stage, invocation: &Invocation) -> Result<ProcessOutput, StageError> {
        let command = invocation.command_line();
        let invocation_error = |failure: InvocationFailure| StageError::ProcessInvocation {
            stage,
            command: command.clone(),
            failure,
        };

        let output = self
            .runner
            .run(invocation, &self.cancel)
            .map_err(|err| match err {
                ProcessError::Spawn { source, .. } => {
                    invocation_error(InvocationFailure::Spawn(source.to_string()))
                }
                other => invocation_error(InvocationFailure::Wait(other.to_string())),
            })?;

        if output.timed_out {
            return Err(invocation_error(InvocationFailure::TimedOut {
                timeout_secs: invocation.timeout.as_secs(),
            }));
        }
        if output.cancelled {
            return Err(invocation_error(InvocationFailure::Cancelled));
        }
        Ok(output.into_process_output())
    }

    /// Persist `next`, then keep the staged files that produced it.
    fn commit(&mut self, next: StageRecord, checkpoint: Checkpoint) -> Result<(), StageError> {
        let path = self.run_dir.record_path();
        write_record(&path, &next)
            .map_err(|err| StageError::staging(&path, io::Error::other(format!("{err:#}"))))?;
        checkpoint.commit();
        self.record = next;
        Ok(())
    }
}

fn load_build_source_template(config: &ForgeConfig) -> Result<String> {
    match &config.build_source_template {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("read build source template {}", path.display())),
        None => Ok(DEFAULT_BUILD_SOURCE.to_string()),
    }
}

fn write_staged(path: &Path, contents: &str) -> Result<(), StageError> {
    fs::write(path, contents).map_err(|err| StageError::staging(path, err))
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

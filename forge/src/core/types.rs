//! Shared deterministic types for the stage pipeline.
//!
//! These types define stable contracts between the dispatcher, the persisted
//! run record and the driver. They perform no I/O.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the three driver-invocable pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Generate a parser from a grammar specification.
    SubmitSpecification,
    /// Compile an interpreter against the generated parser.
    SubmitInterpreter,
    /// Run the compiled interpreter over an example program.
    RunExample,
}

impl Stage {
    pub const ALL: [Stage; 3] = [
        Stage::SubmitSpecification,
        Stage::SubmitInterpreter,
        Stage::RunExample,
    ];

    /// Stable capability name exposed to the driver.
    pub fn name(self) -> &'static str {
        match self {
            Stage::SubmitSpecification => "submit_specification",
            Stage::SubmitInterpreter => "submit_interpreter",
            Stage::RunExample => "run_example",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

/// Position of a run in the `Empty → Specified → Built → Executed` machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    /// Nothing submitted yet.
    #[default]
    Empty,
    /// A parser artifact is present.
    Specified,
    /// An executable was produced from the current parser artifact.
    Built,
    /// At least one example ran against the current executable.
    Executed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageState::Empty => "empty",
            StageState::Specified => "specified",
            StageState::Built => "built",
            StageState::Executed => "executed",
        };
        f.write_str(label)
    }
}

/// Captured result of one external process run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout_truncated: usize,
    #[serde(default)]
    pub stderr_truncated: usize,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Observation text in the `=== stdout === / === stderr ===` layout.
    pub fn render(&self) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&self.stdout);
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[stdout truncated {} bytes]",
                self.stdout_truncated
            ));
        }
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&self.stderr);
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[stderr truncated {} bytes]",
                self.stderr_truncated
            ));
        }
        match self.exit_code {
            Some(code) => buf.push_str(&format!("\n[exit code {code}]\n")),
            None => buf.push_str("\n[terminated by signal]\n"),
        }
        buf
    }
}

/// Successful result of a stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StageOutput {
    /// Compacted parser header returned by `submit_specification`.
    Parser(String),
    /// Captured process result returned by the other stages.
    Process(ProcessOutput),
}

impl StageOutput {
    pub fn render(&self) -> String {
        match self {
            StageOutput::Parser(text) => text.clone(),
            StageOutput::Process(output) => output.render(),
        }
    }
}

/// Accumulated stage results for a single run.
///
/// Each field reflects the latest invocation of the stage that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub run_id: String,
    pub state: StageState,
    pub specification: Option<String>,
    pub parser_artifact: Option<String>,
    pub interpreter_source: Option<String>,
    pub build_log: Option<ProcessOutput>,
    pub example_source: Option<String>,
    pub example_output: Option<String>,
    /// Free-text summary supplied by the driver after the run.
    pub documentation: Option<String>,
}

impl StageRecord {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: StageState::Empty,
            specification: None,
            parser_artifact: None,
            interpreter_source: None,
            build_log: None,
            example_source: None,
            example_output: None,
            documentation: None,
        }
    }
}

//! Command-line driver for the forge toolchain pipeline.
//!
//! Each invocation is one step of a run: `start` creates the run, the stage
//! commands resume it from its staging directory, and `finish` removes it.
//! Stage output is printed to stdout; errors and logs go to stderr.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use forge::core::compact::compact_bytes;
use forge::core::errors::StageError;
use forge::core::types::Stage;
use forge::exit_codes;
use forge::io::config::load_config;
use forge::io::toolchain::SystemRunner;
use forge::logging;
use forge::pipeline::Pipeline;
use forge::tools::capabilities;

#[derive(Parser)]
#[command(
    name = "forge",
    version,
    about = "Toolchain pipeline for agent-built language implementations"
)]
struct Cli {
    /// Pipeline configuration file.
    #[arg(long, global = true, default_value = "forge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a run and print its id.
    Start,
    /// Submit a grammar specification and print the compacted parser header.
    Spec(StageArgs),
    /// Submit the interpreter header and print the compiler output.
    Build(StageArgs),
    /// Run an example program through the compiled interpreter.
    Run(StageArgs),
    /// Print the run's record as JSON.
    Record {
        #[arg(long = "run")]
        run_id: String,
    },
    /// Store free-text documentation for the run.
    Document(StageArgs),
    /// Print the final record and remove the run's staging directory.
    Finish {
        #[arg(long = "run")]
        run_id: String,
    },
    /// Strip function bodies from a C++ header.
    Compact {
        /// Input file; stdin when absent or `-`.
        file: Option<PathBuf>,
    },
    /// Print the capability definitions offered to a driver.
    Tools,
}

#[derive(clap::Args)]
struct StageArgs {
    #[arg(long = "run")]
    run_id: String,
    /// Input file; stdin when absent or `-`.
    file: Option<PathBuf>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = cli.config.as_path();
    match cli.command {
        Command::Start => cmd_start(config),
        Command::Spec(args) => cmd_stage(config, Stage::SubmitSpecification, &args),
        Command::Build(args) => cmd_stage(config, Stage::SubmitInterpreter, &args),
        Command::Run(args) => cmd_stage(config, Stage::RunExample, &args),
        Command::Record { run_id } => cmd_record(config, &run_id),
        Command::Document(args) => cmd_document(config, &args),
        Command::Finish { run_id } => cmd_finish(config, &run_id),
        Command::Compact { file } => cmd_compact(file.as_deref()),
        Command::Tools => {
            print_json(&capabilities())?;
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_start(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let pipeline = Pipeline::start(config, SystemRunner)?;
    println!("{}", pipeline.run_id());
    Ok(exit_codes::OK)
}

fn cmd_stage(config_path: &Path, stage: Stage, args: &StageArgs) -> Result<i32> {
    let config = load_config(config_path)?;
    let mut pipeline = Pipeline::resume(config, SystemRunner, &args.run_id)?;
    let input = read_input(args.file.as_deref())?;
    match pipeline.invoke(stage, &input) {
        Ok(output) => {
            print!("{}", output.render());
            Ok(exit_codes::OK)
        }
        Err(err) => {
            print!("{}", err.observation());
            eprintln!("{err}");
            Ok(stage_exit_code(&err))
        }
    }
}

fn cmd_record(config_path: &Path, run_id: &str) -> Result<i32> {
    let config = load_config(config_path)?;
    let pipeline = Pipeline::resume(config, SystemRunner, run_id)?;
    print_json(pipeline.record())?;
    Ok(exit_codes::OK)
}

fn cmd_document(config_path: &Path, args: &StageArgs) -> Result<i32> {
    let config = load_config(config_path)?;
    let mut pipeline = Pipeline::resume(config, SystemRunner, &args.run_id)?;
    let text = read_input(args.file.as_deref())?;
    pipeline.record_documentation(&text)?;
    Ok(exit_codes::OK)
}

fn cmd_finish(config_path: &Path, run_id: &str) -> Result<i32> {
    let config = load_config(config_path)?;
    let pipeline = Pipeline::resume(config, SystemRunner, run_id)?;
    let record = pipeline.finish()?;
    print_json(&record)?;
    Ok(exit_codes::OK)
}

fn cmd_compact(file: Option<&Path>) -> Result<i32> {
    let bytes = read_input_bytes(file)?;
    let compacted = compact_bytes(bytes).context("compact input")?;
    print!("{compacted}");
    Ok(exit_codes::OK)
}

fn stage_exit_code(err: &StageError) -> i32 {
    match err {
        StageError::Prerequisite { .. } => exit_codes::PREREQUISITE,
        StageError::Staging { .. } => exit_codes::INVALID,
        StageError::ProcessInvocation { .. }
        | StageError::ArtifactMissing { .. }
        | StageError::ProcessFailed { .. }
        | StageError::Compaction(_) => exit_codes::STAGE_FAILED,
    }
}

fn read_input(file: Option<&Path>) -> Result<String> {
    let bytes = read_input_bytes(file)?;
    String::from_utf8(bytes).context("input is not valid UTF-8")
}

/// Read `file`, or stdin when it is absent or `-`.
fn read_input_bytes(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) if path != Path::new("-") => {
            fs::read(path).with_context(|| format!("read {}", path.display()))
        }
        _ => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("read stdin")?;
            Ok(buf)
        }
    }
}

/// Print `value` as pretty JSON with a trailing newline.
fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

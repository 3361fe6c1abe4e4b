//! Pipeline configuration stored in `forge.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::template::{CommandVars, render_command};

/// Pipeline configuration (TOML).
///
/// Missing fields fall back to the toolchain layout the generator and the
/// combined build source expect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Parent directory of the per-run staging directories.
    pub staging_root: PathBuf,

    /// Truncate captured stdout/stderr beyond this many bytes per stream.
    pub output_limit_bytes: usize,

    /// Optional minijinja template replacing the embedded `main.cpp`.
    pub build_source_template: Option<PathBuf>,

    pub generator: GeneratorConfig,
    pub compiler: CompilerConfig,
    pub example: ExampleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Generator command. Placeholders: `{{ spec }}`, `{{ header }}`, `{{ run_dir }}`.
    pub command: Vec<String>,
    /// Working directory for the generator; the run's staging dir when unset.
    pub workdir: Option<PathBuf>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompilerConfig {
    /// Compiler command. Placeholders: `{{ source }}`, `{{ executable }}`, `{{ run_dir }}`.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExampleConfig {
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: ["go", "run", "main.go", "-o", "{{ header }}", "{{ spec }}"]
                .map(String::from)
                .to_vec(),
            workdir: Some(PathBuf::from("chisel")),
            timeout_secs: 120,
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            command: [
                "clang++",
                "-std=c++20",
                "-g",
                "{{ source }}",
                "-o",
                "{{ executable }}",
            ]
            .map(String::from)
            .to_vec(),
            timeout_secs: 300,
        }
    }
}

impl Default for ExampleConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from(".forge/runs"),
            output_limit_bytes: 100_000,
            build_source_template: None,
            generator: GeneratorConfig::default(),
            compiler: CompilerConfig::default(),
            example: ExampleConfig::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CompilerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ExampleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.compiler.timeout_secs == 0 {
            return Err(anyhow!("compiler.timeout_secs must be > 0"));
        }
        if self.example.timeout_secs == 0 {
            return Err(anyhow!("example.timeout_secs must be > 0"));
        }
        validate_command(
            "generator.command",
            &self.generator.command,
            &["spec", "header", "run_dir"],
        )?;
        validate_command(
            "compiler.command",
            &self.compiler.command,
            &["source", "executable", "run_dir"],
        )?;
        Ok(())
    }

    /// Resolve relative paths against the directory the config was loaded from.
    fn resolve_relative_to(&mut self, base: &Path) {
        if self.staging_root.is_relative() {
            self.staging_root = base.join(&self.staging_root);
        }
        if let Some(workdir) = &self.generator.workdir
            && workdir.is_relative()
        {
            self.generator.workdir = Some(base.join(workdir));
        }
        if let Some(template) = &self.build_source_template
            && template.is_relative()
        {
            self.build_source_template = Some(base.join(template));
        }
    }
}

/// Commands must be non-empty and only reference placeholders their stage provides.
fn validate_command(field: &str, command: &[String], placeholders: &[&'static str]) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(anyhow!("{field} must be a non-empty array"));
    }
    let vars: CommandVars = placeholders
        .iter()
        .map(|name| (*name, format!("<{name}>")))
        .collect();
    render_command(command, &vars).with_context(|| format!("invalid {field}"))?;
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForgeConfig::default()`. Relative paths
/// are resolved against the config file's directory.
pub fn load_config(path: &Path) -> Result<ForgeConfig> {
    let base = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str::<ForgeConfig>(&contents)
            .with_context(|| format!("parse {}", path.display()))?
    } else {
        ForgeConfig::default()
    };
    cfg.validate()?;
    cfg.resolve_relative_to(base);
    Ok(cfg)
}

//! Per-run staging directories.
//!
//! Every run owns `<staging_root>/<run_id>/`. Stage inputs and the toolchain's
//! outputs live there under fixed names, so concurrent runs never touch each
//! other's artifacts. The directory is created when a run starts and removed
//! when it finishes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, info, warn};

use crate::io::template::render_build_source;

pub const SPEC_FILE: &str = "spec.txt";
pub const PARSER_HEADER: &str = "chisel.hpp";
pub const INTERPRETER_HEADER: &str = "int.hpp";
pub const BUILD_SOURCE: &str = "main.cpp";
pub const EXECUTABLE: &str = "a.out";
pub const EXAMPLE_FILE: &str = "example.txt";
pub const RECORD_FILE: &str = "record.json";

const BACKUP_SUFFIX: &str = "bak";

/// Generate a fresh run id: `run-<UTC timestamp>-<6 random chars>`.
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("run-{timestamp}-{suffix}")
}

/// Validate that `id` is safe to use as a single path component.
pub fn validate_run_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("run id must not be empty"));
    }
    if id.contains('/') {
        return Err(anyhow!("run id must not contain '/'"));
    }
    if id == "." || id == ".." {
        return Err(anyhow!("run id must not be '.' or '..'"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("run id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    Ok(())
}

/// Staging directory owned by a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDir {
    run_id: String,
    root: PathBuf,
}

impl RunDir {
    /// Create the staging directory for `run_id` and seed the combined build source.
    ///
    /// Fails if the directory already exists.
    pub fn create(staging_root: &Path, run_id: &str, build_source_template: &str) -> Result<Self> {
        validate_run_id(run_id)?;
        fs::create_dir_all(staging_root)
            .with_context(|| format!("create staging root {}", staging_root.display()))?;
        let root = staging_root.join(run_id);
        fs::create_dir(&root)
            .with_context(|| format!("create staging dir {}", root.display()))?;

        let dir = Self {
            run_id: run_id.to_string(),
            root,
        };
        let source = render_build_source(build_source_template, PARSER_HEADER, INTERPRETER_HEADER)?;
        let source_path = dir.build_source_path();
        fs::write(&source_path, source)
            .with_context(|| format!("write {}", source_path.display()))?;

        info!(run_id, root = %dir.root.display(), "staging dir created");
        Ok(dir)
    }

    /// Open the existing staging directory for `run_id`.
    pub fn open(staging_root: &Path, run_id: &str) -> Result<Self> {
        validate_run_id(run_id)?;
        let root = staging_root.join(run_id);
        if !root.is_dir() {
            bail!("unknown run '{run_id}' (no staging dir {})", root.display());
        }
        Ok(Self {
            run_id: run_id.to_string(),
            root,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn spec_path(&self) -> PathBuf {
        self.root.join(SPEC_FILE)
    }

    pub fn parser_header_path(&self) -> PathBuf {
        self.root.join(PARSER_HEADER)
    }

    pub fn interpreter_path(&self) -> PathBuf {
        self.root.join(INTERPRETER_HEADER)
    }

    pub fn build_source_path(&self) -> PathBuf {
        self.root.join(BUILD_SOURCE)
    }

    pub fn executable_path(&self) -> PathBuf {
        self.root.join(EXECUTABLE)
    }

    pub fn example_path(&self) -> PathBuf {
        self.root.join(EXAMPLE_FILE)
    }

    pub fn record_path(&self) -> PathBuf {
        self.root.join(RECORD_FILE)
    }

    /// Move the current versions of `paths` aside so a failed stage can restore them.
    pub fn checkpoint(&self, paths: &[PathBuf]) -> io::Result<Checkpoint> {
        let mut checkpoint = Checkpoint {
            entries: Vec::with_capacity(paths.len()),
            committed: false,
        };
        for path in paths {
            let backup = path.with_extension(backup_extension(path));
            let had_original = match fs::rename(path, &backup) {
                Ok(()) => true,
                Err(err) if err.kind() == io::ErrorKind::NotFound => false,
                Err(err) => return Err(err),
            };
            checkpoint.entries.push(CheckpointEntry {
                path: path.clone(),
                backup: had_original.then_some(backup),
            });
        }
        Ok(checkpoint)
    }

    /// Delete the staging directory and everything in it.
    pub fn remove(self) -> Result<()> {
        fs::remove_dir_all(&self.root)
            .with_context(|| format!("remove staging dir {}", self.root.display()))?;
        info!(run_id = %self.run_id, "staging dir removed");
        Ok(())
    }
}

fn backup_extension(path: &Path) -> String {
    match path.extension() {
        Some(ext) => format!("{}.{BACKUP_SUFFIX}", ext.to_string_lossy()),
        None => BACKUP_SUFFIX.to_string(),
    }
}

#[derive(Debug)]
struct CheckpointEntry {
    path: PathBuf,
    backup: Option<PathBuf>,
}

/// Prior versions of staged files, restored on drop unless committed.
///
/// A stage takes a checkpoint before overwriting its inputs and deleting
/// stale outputs. Returning early with an error rolls the files back, so the
/// staging directory stays consistent with the run record.
#[derive(Debug)]
#[must_use = "dropping a checkpoint rolls the staged files back"]
pub struct Checkpoint {
    entries: Vec<CheckpointEntry>,
    committed: bool,
}

impl Checkpoint {
    /// Keep the new files and discard the backups.
    pub fn commit(mut self) {
        self.committed = true;
        for entry in &self.entries {
            if let Some(backup) = &entry.backup
                && let Err(err) = fs::remove_file(backup)
            {
                warn!(err = %err, backup = %backup.display(), "failed to remove backup");
            }
        }
    }

    fn rollback(&self) {
        for entry in &self.entries {
            match fs::remove_file(&entry.path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(err = %err, path = %entry.path.display(), "failed to remove new file");
                }
            }
            if let Some(backup) = &entry.backup
                && let Err(err) = fs::rename(backup, &entry.path)
            {
                warn!(err = %err, path = %entry.path.display(), "failed to restore backup");
            }
        }
        debug!(files = self.entries.len(), "staged files rolled back");
    }
}

impl Drop for Checkpoint {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::template::DEFAULT_BUILD_SOURCE;

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert!(a.starts_with("run-"));
        validate_run_id(&a).expect("valid id");
        assert_ne!(a, b);
    }

    #[test]
    fn validate_run_id_rejects_traversal() {
        assert!(validate_run_id("../other").is_err());
        assert!(validate_run_id("..").is_err());
        assert!(validate_run_id("run 1").is_err());
        assert!(validate_run_id("").is_err());
    }

    #[test]
    fn create_seeds_build_source_and_refuses_reuse() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = RunDir::create(temp.path(), "run-a", DEFAULT_BUILD_SOURCE).expect("create");
        let source = fs::read_to_string(dir.build_source_path()).expect("read main.cpp");
        assert!(source.contains("#include \"chisel.hpp\""));
        assert!(source.contains("#include \"int.hpp\""));

        assert!(RunDir::create(temp.path(), "run-a", DEFAULT_BUILD_SOURCE).is_err());
        let reopened = RunDir::open(temp.path(), "run-a").expect("open");
        assert_eq!(reopened, dir);
    }

    #[test]
    fn open_unknown_run_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = RunDir::open(temp.path(), "run-missing").unwrap_err();
        assert!(err.to_string().contains("unknown run"));
    }

    #[test]
    fn remove_deletes_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = RunDir::create(temp.path(), "run-b", DEFAULT_BUILD_SOURCE).expect("create");
        let root = dir.root().to_path_buf();
        dir.remove().expect("remove");
        assert!(!root.exists());
    }

    #[test]
    fn dropped_checkpoint_restores_previous_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = RunDir::create(temp.path(), "run-c", DEFAULT_BUILD_SOURCE).expect("create");
        fs::write(dir.spec_path(), "old spec").expect("write");

        {
            let _checkpoint = dir
                .checkpoint(&[dir.spec_path(), dir.parser_header_path()])
                .expect("checkpoint");
            assert!(!dir.spec_path().exists());
            fs::write(dir.spec_path(), "new spec").expect("write");
            fs::write(dir.parser_header_path(), "partial").expect("write");
        }

        assert_eq!(fs::read_to_string(dir.spec_path()).expect("read"), "old spec");
        assert!(!dir.parser_header_path().exists());
    }

    #[test]
    fn committed_checkpoint_keeps_new_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = RunDir::create(temp.path(), "run-d", DEFAULT_BUILD_SOURCE).expect("create");
        fs::write(dir.executable_path(), "old").expect("write");

        let checkpoint = dir.checkpoint(&[dir.executable_path()]).expect("checkpoint");
        fs::write(dir.executable_path(), "new").expect("write");
        checkpoint.commit();

        assert_eq!(fs::read_to_string(dir.executable_path()).expect("read"), "new");
        assert!(!dir.root().join("a.out.bak").exists());
    }
}

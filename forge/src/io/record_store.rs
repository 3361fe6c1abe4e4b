//! Persistence for the per-run [`StageRecord`] (`<run_dir>/record.json`).
//!
//! The record lives in memory for the duration of a run; it is mirrored to
//! disk after every state change so a run can be resumed by a later process.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::types::StageRecord;

const RECORD_SCHEMA: &str = include_str!("../../schemas/stage_record.schema.json");

/// Load and schema-validate a record from disk.
pub fn load_record(path: &Path) -> Result<StageRecord> {
    debug!(path = %path.display(), "loading stage record");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read record {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse record {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate record {}", path.display()))?;
    let record: StageRecord = serde_json::from_value(value)
        .with_context(|| format!("deserialize record {}", path.display()))?;
    debug!(run_id = %record.run_id, state = %record.state, "stage record loaded");
    Ok(record)
}

/// Atomically write a record to disk (temp file + rename).
pub fn write_record(path: &Path, record: &StageRecord) -> Result<()> {
    debug!(path = %path.display(), run_id = %record.run_id, state = %record.state, "writing stage record");
    let mut buf = serde_json::to_string_pretty(record)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(RECORD_SCHEMA).context("parse record schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    let messages: Vec<String> = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "record schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("record path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp record {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace record {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ProcessOutput, StageState};

    #[test]
    fn record_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("record.json");

        let mut record = StageRecord::new("run-123");
        record.state = StageState::Built;
        record.specification = Some("PROGRAM := STMT*".to_string());
        record.parser_artifact = Some("namespace chisel {\n}".to_string());
        record.interpreter_source = Some("void interpreter(Node *n);".to_string());
        record.build_log = Some(ProcessOutput {
            stdout: String::new(),
            stderr: "warning: unused".to_string(),
            exit_code: Some(0),
            ..ProcessOutput::default()
        });

        write_record(&path, &record).expect("write");
        let loaded = load_record(&path).expect("load");
        assert_eq!(loaded, record);
        assert!(!temp.path().join("record.json.tmp").exists());
    }

    /// Ensures an empty record serializes to a known, stable JSON format.
    #[test]
    fn empty_record_format_is_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("record.json");

        write_record(&path, &StageRecord::new("run-1")).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        let expected = "{\n  \"run_id\": \"run-1\",\n  \"state\": \"empty\",\n  \"specification\": null,\n  \"parser_artifact\": null,\n  \"interpreter_source\": null,\n  \"build_log\": null,\n  \"example_source\": null,\n  \"example_output\": null,\n  \"documentation\": null\n}\n";
        assert_eq!(contents, expected);
    }

    #[test]
    fn load_rejects_unknown_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("record.json");
        let mut value = serde_json::to_value(StageRecord::new("run-1")).expect("to value");
        value["state"] = Value::String("compiled".to_string());
        fs::write(&path, value.to_string()).expect("write");

        let err = load_record(&path).unwrap_err();
        assert!(format!("{err:#}").contains("record schema validation failed"));
    }
}

//! Stable exit codes for forge CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid config, usage, unknown run or other I/O errors.
pub const INVALID: i32 = 1;
/// A stage ran but failed (process, artifact or compaction error).
pub const STAGE_FAILED: i32 = 2;
/// A stage was invoked before its prerequisite stage succeeded.
pub const PREREQUISITE: i32 = 3;

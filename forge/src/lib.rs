//! Toolchain orchestration for agent-built language implementations.
//!
//! An external driver builds a small programming language in three stages:
//! it submits a grammar specification (a parser is generated and returned
//! compacted), submits an interpreter (compiled against that parser), and
//! runs example programs through the result. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (compaction, stage ordering, types).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, staging directories,
//!   record persistence, process execution). Isolated to enable mocking in tests.
//!
//! [`pipeline`] coordinates core logic with I/O to implement the stage
//! operations; [`tools`] describes them to the driver.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;

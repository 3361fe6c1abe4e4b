//! I/O helpers for the pipeline: config, staging, persistence and processes.

pub mod config;
pub mod process;
pub mod record_store;
pub mod staging;
pub mod template;
pub mod toolchain;

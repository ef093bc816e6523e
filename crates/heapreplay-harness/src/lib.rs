//! Command-line driver for heapreplay.
//!
//! This crate provides:
//! - Runner: load a trace, replay it under one mode, write outputs
//! - Structured logging: JSONL lifecycle records with schema validation
//! - Summary: human-readable replay report for stdout
//! - Provenance: trace content digests for the JSON report

#![forbid(unsafe_code)]

pub mod provenance;
pub mod runner;
pub mod structured_log;
pub mod summary;

pub use runner::{HarnessError, RunArtifacts, RunOptions, execute};
pub use structured_log::{LogEmitter, LogEntry, LogLevel, validate_log_file, validate_log_line};
pub use summary::render_summary;

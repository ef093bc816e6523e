//! Error types for trace ingestion and session setup.
//!
//! Only input and configuration problems are `Err` values. Allocation failures
//! and references to unknown objects are counted in
//! [`Statistics`](crate::stats::Statistics) and logged instead.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors: replay does not start.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("cannot read trace {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown replay mode `{0}` (expected explicit, gc or oracle)")]
    UnknownMode(String),
}

/// A single malformed trace record. Recoverable: the line is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown record tag `{0}`")]
    UnknownTag(String),
    #[error("unknown event type `{0}`")]
    UnknownEventType(String),
    #[error("expected {expected} fields, found {found}")]
    Arity { expected: usize, found: usize },
    #[error("field `{field}` is not an unsigned integer: `{value}`")]
    InvalidField { field: &'static str, value: String },
}

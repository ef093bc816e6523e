//! # heapreplay-core
//!
//! Replays a recorded allocation/death history against a live allocator
//! backend under one of three reclamation policies:
//!
//! - **explicit**: release on the death event
//! - **gc**: mark dead, sweep when a byte or allocation-count threshold trips
//! - **oracle**: queue frees, drain the queue before every allocation
//!
//! Trace ingestion lives in [`trace`], the policies in [`manager`], and the
//! driver that ties them together in [`session`]. All state is scoped to one
//! [`ReplaySession`]; nothing is global.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod event;
pub mod log;
pub mod manager;
pub mod report;
pub mod session;
pub mod stats;
pub mod table;
pub mod trace;

pub use config::{GcConfig, ReplayConfig, ReplayMode};
pub use error::{ParseError, ReplayError};
pub use event::{Event, EventKind, ObjectId, SiteId};
pub use log::{ReplayLogLevel, ReplayLogRecord};
pub use manager::{AllocRequest, ExplicitManager, GcManager, MemoryManager, OracleManager};
pub use report::{BackendInfo, ReplayReport};
pub use session::{ReplayOutcome, ReplaySession, replay};
pub use stats::{SiteStats, Statistics};
pub use trace::{IngestSummary, Trace, TraceFormat, load_trace, parse_trace, read_trace};

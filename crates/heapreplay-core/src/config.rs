//! Replay configuration.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ReplayError;
use crate::log::ReplayLogLevel;

/// Default GC byte threshold (10 MiB).
pub const DEFAULT_GC_BYTE_THRESHOLD: u64 = 10 * 1024 * 1024;
/// Default GC allocation-count threshold.
pub const DEFAULT_GC_ALLOC_COUNT_THRESHOLD: u64 = 1000;

/// Default cap on replay log records retained between drains.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// Reclamation policy for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
    /// Release on the death event.
    Explicit,
    /// Defer into a dead set; sweep on threshold.
    Gc,
    /// Queue frees; drain before each allocation.
    Oracle,
}

impl ReplayMode {
    pub const ALL: [Self; 3] = [Self::Explicit, Self::Gc, Self::Oracle];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Gc => "gc",
            Self::Oracle => "oracle",
        }
    }
}

impl fmt::Display for ReplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplayMode {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit" => Ok(Self::Explicit),
            "gc" => Ok(Self::Gc),
            "oracle" => Ok(Self::Oracle),
            other => Err(ReplayError::UnknownMode(other.to_string())),
        }
    }
}

/// Collection trigger thresholds. Either one being exceeded triggers a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GcConfig {
    pub byte_threshold: u64,
    pub alloc_count_threshold: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            byte_threshold: DEFAULT_GC_BYTE_THRESHOLD,
            alloc_count_threshold: DEFAULT_GC_ALLOC_COUNT_THRESHOLD,
        }
    }
}

/// Everything a session needs besides the trace and the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayConfig {
    pub mode: ReplayMode,
    pub gc: GcConfig,
    /// Records below this level are not kept.
    pub log_level: ReplayLogLevel,
    /// Records kept before further ones are only counted.
    pub log_capacity: usize,
    /// Sample the working set every N successful allocations; 0 disables.
    pub working_set_sample_interval: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            mode: ReplayMode::Explicit,
            gc: GcConfig::default(),
            log_level: ReplayLogLevel::Debug,
            log_capacity: DEFAULT_LOG_CAPACITY,
            working_set_sample_interval: 0,
        }
    }
}

impl ReplayConfig {
    #[must_use]
    pub fn new(mode: ReplayMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_gc_byte_threshold(mut self, bytes: u64) -> Self {
        self.gc.byte_threshold = bytes;
        self
    }

    #[must_use]
    pub fn with_gc_alloc_count_threshold(mut self, count: u64) -> Self {
        self.gc.alloc_count_threshold = count;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: ReplayLogLevel) -> Self {
        self.log_level = level;
        self
    }

    #[must_use]
    pub fn with_log_capacity(mut self, records: usize) -> Self {
        self.log_capacity = records;
        self
    }

    #[must_use]
    pub fn with_working_set_sampling(mut self, every: u64) -> Self {
        self.working_set_sample_interval = every;
        self
    }
}

//! Named backend registry.
//!
//! Maps a backend name to a constructor. Unknown names fall back to
//! [`BASELINE_BACKEND`] without signaling an error; the returned
//! [`BackendSelection`] records that it happened.

use crate::backend::{AllocatorBackend, BoundedBackend, LibcBackend, SystemBackend};

/// Name of the backend used when a lookup misses.
pub const BASELINE_BACKEND: &str = "standard";

type Constructor = fn() -> Box<dyn AllocatorBackend>;

/// Registry errors. Only raised by explicit registration, never by lookup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("backend `{0}` is already registered")]
    Duplicate(String),
    #[error("backend name must be non-empty and contain no whitespace: {0:?}")]
    InvalidName(String),
}

/// Result of resolving a backend name.
pub struct BackendSelection {
    pub backend: Box<dyn AllocatorBackend>,
    /// Name the caller asked for.
    pub requested: String,
    /// Registry key that was actually constructed.
    pub resolved: &'static str,
    /// True when `requested` was unknown and the baseline was used instead.
    pub fell_back: bool,
}

impl BackendSelection {
    /// Wrap the selected backend in a [`BoundedBackend`] with `capacity` bytes.
    #[must_use]
    pub fn bounded(self, capacity: u64) -> Self {
        Self {
            backend: Box::new(BoundedBackend::new(self.backend, capacity)),
            ..self
        }
    }
}

impl std::fmt::Debug for BackendSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSelection")
            .field("backend", &self.backend.name())
            .field("requested", &self.requested)
            .field("resolved", &self.resolved)
            .field("fell_back", &self.fell_back)
            .finish()
    }
}

/// Small open registry of backend constructors, in registration order.
pub struct BackendRegistry {
    entries: Vec<(&'static str, Constructor)>,
}

impl BackendRegistry {
    /// Registry preloaded with every backend compiled into this build.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut entries: Vec<(&'static str, Constructor)> = Vec::new();
        entries.push((BASELINE_BACKEND, baseline_ctor));
        entries.push(("system", system_ctor));
        #[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
        entries.push(("jemalloc", jemalloc_ctor));
        #[cfg(feature = "mimalloc")]
        entries.push(("mimalloc", mimalloc_ctor));
        Self { entries }
    }

    /// Add a backend under `name`.
    pub fn register(&mut self, name: &'static str, ctor: Constructor) -> Result<(), RegistryError> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if self.contains(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.entries.push((name, ctor));
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| *key == name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }

    /// Construct the backend registered as `name`, or the baseline.
    #[must_use]
    pub fn select(&self, name: &str) -> BackendSelection {
        let hit = self.entries.iter().find(|(key, _)| *key == name);
        let (resolved, ctor, fell_back) = match hit {
            Some((key, ctor)) => (*key, *ctor, false),
            None => {
                let baseline = self
                    .entries
                    .iter()
                    .find(|(key, _)| *key == BASELINE_BACKEND)
                    .map(|(_, ctor)| *ctor)
                    .unwrap_or(baseline_ctor);
                (BASELINE_BACKEND, baseline, true)
            }
        };
        BackendSelection {
            backend: ctor(),
            requested: name.to_string(),
            resolved,
            fell_back,
        }
    }
}

fn baseline_ctor() -> Box<dyn AllocatorBackend> {
    Box::new(LibcBackend::new())
}

fn system_ctor() -> Box<dyn AllocatorBackend> {
    Box::new(SystemBackend::new())
}

#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
fn jemalloc_ctor() -> Box<dyn AllocatorBackend> {
    Box::new(crate::backend::JemallocBackend::new())
}

#[cfg(feature = "mimalloc")]
fn mimalloc_ctor() -> Box<dyn AllocatorBackend> {
    Box::new(crate::backend::MimallocBackend::new())
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Resolve `name` against the builtin registry.
#[must_use]
pub fn select_backend(name: &str) -> BackendSelection {
    BackendRegistry::with_builtin().select(name)
}

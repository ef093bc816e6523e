//! Typed trace events.

use serde::Serialize;

pub type ObjectId = u64;
pub type SiteId = u64;

/// What happened at one point of the recorded history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Alloc {
        size: u64,
        site_id: SiteId,
        type_id: u64,
        is_array: bool,
        /// Element count for arrays, 0 otherwise.
        length: u64,
    },
    /// Free (CSV) or death record (structured trace).
    Free,
    /// `object_id` received a reference to `source_id`.
    FieldUpdate { source_id: ObjectId, field_id: u64 },
    MethodEntry { method_id: u64 },
    MethodExit { method_id: u64 },
}

/// One trace record after parsing.
///
/// `object_id` is the allocated/freed object, the update target, or the
/// method receiver (0 for method exits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Event {
    pub time: u64,
    pub object_id: ObjectId,
    pub thread_id: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    #[must_use]
    pub fn alloc(time: u64, object_id: ObjectId, size: u64, site_id: SiteId) -> Self {
        Self {
            time,
            object_id,
            thread_id: 0,
            kind: EventKind::Alloc {
                size,
                site_id,
                type_id: 0,
                is_array: false,
                length: 0,
            },
        }
    }

    #[must_use]
    pub fn free(time: u64, object_id: ObjectId) -> Self {
        Self {
            time,
            object_id,
            thread_id: 0,
            kind: EventKind::Free,
        }
    }

    #[must_use]
    pub fn field_update(time: u64, target: ObjectId, source: ObjectId) -> Self {
        Self {
            time,
            object_id: target,
            thread_id: 0,
            kind: EventKind::FieldUpdate {
                source_id: source,
                field_id: 0,
            },
        }
    }

    #[must_use]
    pub fn with_thread(mut self, thread_id: u64) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Short label used in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self.kind {
            EventKind::Alloc { .. } => "alloc",
            EventKind::Free => "free",
            EventKind::FieldUpdate { .. } => "field_update",
            EventKind::MethodEntry { .. } => "method_entry",
            EventKind::MethodExit { .. } => "method_exit",
        }
    }
}

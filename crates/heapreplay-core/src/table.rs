//! Live object table: object id to tracked allocation.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use heapreplay_alloc::Region;

use crate::event::{ObjectId, SiteId};

/// A tracked, allocated, not yet reclaimed object.
#[derive(Debug)]
pub struct AllocatedObject {
    pub id: ObjectId,
    pub region: Region,
    /// Recorded size. May differ from `region.len()` for zero-size requests.
    pub size: u64,
    pub alloc_time: u64,
    pub site_id: SiteId,
}

impl AllocatedObject {
    /// `free_time - alloc_time`, clamped at zero.
    #[must_use]
    pub fn lifetime_at(&self, free_time: u64) -> u64 {
        free_time.saturating_sub(self.alloc_time)
    }
}

/// At most one entry per id.
#[derive(Debug, Default)]
pub struct LiveObjectTable {
    objects: HashMap<ObjectId, AllocatedObject>,
    live_bytes: u64,
}

impl LiveObjectTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new live entry. An occupied id hands the object back.
    pub fn insert(&mut self, object: AllocatedObject) -> Result<(), AllocatedObject> {
        match self.objects.entry(object.id) {
            Entry::Occupied(_) => Err(object),
            Entry::Vacant(slot) => {
                self.live_bytes = self.live_bytes.saturating_add(object.size);
                slot.insert(object);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<AllocatedObject> {
        let object = self.objects.remove(&id)?;
        self.live_bytes = self.live_bytes.saturating_sub(object.size);
        Some(object)
    }

    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<&AllocatedObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut AllocatedObject> {
        self.objects.get_mut(&id)
    }

    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Sum of recorded sizes of live entries.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    /// Live ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn values(&self) -> impl Iterator<Item = &AllocatedObject> {
        self.objects.values()
    }

    /// Remove every entry, ascending by id.
    pub fn drain_sorted(&mut self) -> Vec<AllocatedObject> {
        let mut objects: Vec<AllocatedObject> = self.objects.drain().map(|(_, o)| o).collect();
        objects.sort_unstable_by_key(|o| o.id);
        self.live_bytes = 0;
        objects
    }
}

//! Zones: named execution contexts, each with its own event store.

use std::fmt;

use crate::db::ancillary::{update_lists, AncillaryList};
use crate::db::frames::FrameList;
use crate::db::marks::MarkList;
use crate::db::store::EventStore;
use crate::db::time_range::TimeRangeList;

/// Kind of execution context, as written by the recorder (`script`,
/// `native`, `gpu` and so on).
pub const DEFAULT_ZONE_TYPE: &str = "script";

pub struct Zone {
    pub id: usize,
    pub name: String,
    pub zone_type: String,
    pub location: String,
    store: EventStore,
    time_ranges: TimeRangeList,
    marks: MarkList,
    frames: FrameList,
    placeholder: bool,
}

impl Zone {
    pub(crate) fn new(
        id: usize,
        name: &str,
        zone_type: &str,
        location: &str,
        chunk_capacity: usize,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            zone_type: zone_type.to_string(),
            location: location.to_string(),
            store: EventStore::new(chunk_capacity),
            time_ranges: TimeRangeList::new(),
            marks: MarkList::new(),
            frames: FrameList::new(),
            placeholder: false,
        }
    }

    /// Registry key. Zones from different sources with the same key merge.
    pub fn key(&self) -> String {
        zone_key(&self.name, &self.zone_type, &self.location)
    }

    /// Whether the zone was created implicitly, before any `zone#create`.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub(crate) fn set_placeholder(&mut self, value: bool) {
        self.placeholder = value;
    }

    pub(crate) fn rename(&mut self, name: &str, zone_type: &str, location: &str) {
        self.name = name.to_string();
        self.zone_type = zone_type.to_string();
        self.location = location.to_string();
        self.placeholder = false;
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EventStore {
        &mut self.store
    }

    pub fn time_ranges(&self) -> &TimeRangeList {
        &self.time_ranges
    }

    pub fn marks(&self) -> &MarkList {
        &self.marks
    }

    pub fn frames(&self) -> &FrameList {
        &self.frames
    }

    /// Settle the store and bring the lists derived from it up to date with
    /// the newly placed events.
    pub fn reconcile(&mut self) {
        if !self.store.is_dirty() {
            return;
        }
        let fresh = self.store.reconcile();
        let mut lists: [&mut dyn AncillaryList; 3] =
            [&mut self.time_ranges, &mut self.marks, &mut self.frames];
        update_lists(&self.store, fresh, &mut lists);
        tracing::debug!(
            "Zone '{}' reconciled: {} events, {} time ranges, {} marks, {} frames",
            self.name,
            self.store.len(),
            self.time_ranges.len(),
            self.marks.len(),
            self.frames.len()
        );
    }
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.zone_type)
            .field("location", &self.location)
            .field("events", &self.store.len())
            .finish()
    }
}

pub fn zone_key(name: &str, zone_type: &str, location: &str) -> String {
    format!("{name}:{zone_type}:{location}")
}

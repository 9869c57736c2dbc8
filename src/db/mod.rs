//! The trace database: event types, zones, sources and the summary index.
//!
//! All mutation happens between [`Database::begin_batch`] and
//! [`Database::end_batch`]. Ending a batch reconciles every zone, after which
//! the read-only query surface is valid until the next batch opens.

pub mod ancillary;
pub mod cursor;
pub mod frames;
pub mod marks;
pub mod query;
pub mod source;
pub mod statistics;
pub mod store;
pub mod summary;
pub mod time_range;
pub mod type_table;
pub mod zone;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::data::args::ArgumentData;
use crate::data::event_type::EventType;
use crate::error::{Result, TraceError};
use crate::filter::Filter;

pub use cursor::{EventCursor, EventIter};
pub use frames::{Frame, FrameList};
pub use marks::{Mark, MarkList};
pub use query::{QueryResult, ZoneMatches};
pub use source::{Resource, SourceHeader, SourceInfo, SourceStatus, Unit};
pub use statistics::{SortMode, StatisticsEntry, StatisticsTable};
pub use store::{Event, EventStore};
pub use summary::{SummaryData, SummaryIndex, SummaryNode};
pub use time_range::{TimeRange, TimeRangeList};
pub use type_table::EventTypeTable;
pub use zone::{zone_key, Zone, DEFAULT_ZONE_TYPE};

/// What an open batch has added, so it can be taken back.
#[derive(Debug)]
struct BatchLog {
    zone_count: usize,
    summary_bounds: (u64, u64),
    inserted_times: Vec<u64>,
    /// Placeholder zone named during the batch.
    named_placeholder: Option<usize>,
}

pub struct Database {
    chunk_capacity: usize,
    types: EventTypeTable,
    summary: SummaryIndex,
    zones: Vec<Zone>,
    zone_keys: HashMap<String, usize>,
    default_zone: Option<usize>,
    sources: Vec<SourceInfo>,
    units: Option<Unit>,
    /// Timebase of the first initialised source, in milliseconds.
    common_timebase: Option<f64>,
    next_time_range_id: i64,
    resources: Vec<Resource>,
    in_batch: bool,
    batch: Option<BatchLog>,
    first_event_time: u64,
    last_event_time: u64,
}

impl Default for Database {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl Database {
    pub fn new(config: &Config) -> Self {
        Self {
            chunk_capacity: config.chunk_capacity,
            types: EventTypeTable::new(),
            summary: SummaryIndex::new(
                config.summary_root_granularity,
                config.summary_finest_granularity,
            ),
            zones: Vec::new(),
            zone_keys: HashMap::new(),
            default_zone: None,
            sources: Vec::new(),
            units: None,
            common_timebase: None,
            next_time_range_id: 0,
            resources: Vec::new(),
            in_batch: false,
            batch: None,
            first_event_time: 0,
            last_event_time: 0,
        }
    }

    /// Open an insertion batch. Opening a batch twice is a programming error.
    pub fn begin_batch(&mut self) {
        assert!(!self.in_batch, "insertion batch already open");
        self.in_batch = true;
        for zone in &mut self.zones {
            zone.store_mut().checkpoint();
        }
        self.batch = Some(BatchLog {
            zone_count: self.zones.len(),
            summary_bounds: self.summary.bounds(),
            inserted_times: Vec::new(),
            named_placeholder: None,
        });
    }

    /// Close the batch and reconcile every zone.
    pub fn end_batch(&mut self) {
        assert!(self.in_batch, "no insertion batch open");
        self.in_batch = false;
        self.batch = None;

        let mut first = u64::MAX;
        let mut last = 0;
        for zone in &mut self.zones {
            zone.reconcile();
            zone.store_mut().commit();
            let store = zone.store();
            if !store.is_empty() {
                first = first.min(store.first_event_time());
                last = last.max(store.last_event_time());
            }
        }
        if first == u64::MAX {
            first = 0;
        }
        self.first_event_time = first;
        self.last_event_time = last;
        tracing::debug!(
            "Batch ended: {} zones, events in [{}, {}]",
            self.zones.len(),
            first,
            last
        );
    }

    /// Close the batch, discarding everything it inserted. Zones created
    /// during the batch are removed and a placeholder zone it named becomes
    /// a placeholder again; event types it defined stay registered.
    pub fn abort_batch(&mut self) {
        assert!(self.in_batch, "no insertion batch open");
        self.in_batch = false;
        let Some(batch) = self.batch.take() else {
            return;
        };
        for zone in &mut self.zones[..batch.zone_count] {
            zone.store_mut().rollback();
        }
        self.zones.truncate(batch.zone_count);
        self.zone_keys.retain(|_, id| *id < batch.zone_count);
        if let Some(id) = batch.named_placeholder.filter(|&id| id < batch.zone_count) {
            let key = self.zones[id].key();
            self.zone_keys.remove(&key);
            self.zones[id].rename("", "", "");
            self.zones[id].set_placeholder(true);
        }
        if self.default_zone.is_some_and(|id| id >= batch.zone_count) {
            self.default_zone = None;
        }
        self.summary
            .undo_inserts(&batch.inserted_times, batch.summary_bounds);
        tracing::debug!(
            "Batch aborted: {} events discarded",
            batch.inserted_times.len()
        );
    }

    pub fn is_batch_open(&self) -> bool {
        self.in_batch
    }

    fn assert_readable(&self) {
        assert!(!self.in_batch, "database queried while a batch is open");
    }

    pub fn types(&self) -> &EventTypeTable {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut EventTypeTable {
        &mut self.types
    }

    pub fn get_event_type(&self, name: &str) -> Option<&Arc<EventType>> {
        self.types.get_by_name(name)
    }

    pub fn summary(&self) -> &SummaryIndex {
        &self.summary
    }

    pub fn query_summary(&self, start: u64, end: u64) -> SummaryData {
        self.assert_readable();
        self.summary.query_summary(start, end)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zone(&self, id: usize) -> Option<&Zone> {
        self.zones.get(id)
    }

    pub fn zone_mut(&mut self, id: usize) -> Option<&mut Zone> {
        self.zones.get_mut(id)
    }

    pub fn find_zone(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.name == name)
    }

    fn push_zone(&mut self, name: &str, zone_type: &str, location: &str) -> usize {
        let id = self.zones.len();
        self.zones
            .push(Zone::new(id, name, zone_type, location, self.chunk_capacity));
        id
    }

    /// Zone receiving events before any zone is created. Created on first use
    /// as a nameless placeholder.
    pub fn default_zone(&mut self) -> usize {
        if let Some(id) = self.default_zone {
            return id;
        }
        let id = self.push_zone("", "", "");
        self.zones[id].set_placeholder(true);
        self.default_zone = Some(id);
        id
    }

    /// Find the zone with this identity or create it. A still-unnamed
    /// placeholder default zone takes the identity instead of a new zone
    /// being made.
    pub fn create_or_get_zone(&mut self, name: &str, zone_type: &str, location: &str) -> usize {
        let key = zone_key(name, zone_type, location);
        if let Some(id) = self.default_zone.filter(|&id| self.zones[id].is_placeholder()) {
            self.zones[id].rename(name, zone_type, location);
            self.zone_keys.insert(key, id);
            if let Some(batch) = self.batch.as_mut() {
                batch.named_placeholder = Some(id);
            }
            return id;
        }
        if let Some(&id) = self.zone_keys.get(&key) {
            return id;
        }
        let id = self.push_zone(name, zone_type, location);
        tracing::debug!("Created zone {} '{}'", id, key);
        self.zone_keys.insert(key, id);
        if self.default_zone.is_none() {
            self.default_zone = Some(id);
        }
        id
    }

    /// Store an event in `zone` and count it in the summary index.
    pub fn insert_event(
        &mut self,
        zone: usize,
        event_type: Arc<EventType>,
        time: u64,
        args: Option<ArgumentData>,
    ) -> u64 {
        assert!(self.in_batch, "event inserted outside an insertion batch");
        let id = self.zones[zone].store_mut().insert(event_type, time, args);
        self.summary.insert(time);
        if let Some(batch) = self.batch.as_mut() {
            batch.inserted_times.push(time);
        }
        id
    }

    /// Close the innermost open scope of `zone`.
    pub fn leave_scope(&mut self, zone: usize, time: u64) -> bool {
        assert!(self.in_batch, "scope left outside an insertion batch");
        self.zones[zone].store_mut().leave(time)
    }

    pub fn append_scope_data(&mut self, zone: usize, data: &ArgumentData) -> bool {
        assert!(self.in_batch, "scope data appended outside an insertion batch");
        self.zones[zone].store_mut().append_scope_data(data)
    }

    pub fn add_source(&mut self, name: &str) -> usize {
        let id = self.sources.len();
        self.sources.push(SourceInfo::new(id, name));
        id
    }

    /// Record a source's header. Fixes the common timebase on the first call
    /// and rejects sources whose units differ from those already loaded.
    pub fn initialize_source(&mut self, source: usize, header: SourceHeader) -> Result<i64> {
        let units = Unit::from_metadata(&header.metadata).ok_or_else(|| {
            TraceError::source(
                "Unknown units",
                format!("Unrecognised measurement units in {:?}", header.metadata.get("units")),
            )
        })?;
        match self.units {
            None => self.units = Some(units),
            Some(existing) if existing != units => {
                return Err(TraceError::source(
                    "Mixing measurement units is not supported.",
                    format!(
                        "All sources loaded must be of the same type ({existing} loaded, {units} offered)."
                    ),
                ));
            }
            Some(_) => {}
        }

        let time_offset = self.compute_time_offset(header.timebase);
        let info = &mut self.sources[source];
        info.units = units;
        info.timebase = header.timebase;
        info.time_offset = time_offset;
        info.flags = header.flags;
        info.context_info = header.context_info;
        info.metadata = header.metadata;
        tracing::info!(
            "Source '{}' initialised: timebase {}ms, offset {}us, units {}",
            info.name,
            info.timebase,
            time_offset,
            units
        );
        Ok(time_offset)
    }

    /// Microseconds to add to a source's times so they line up with the
    /// first source. The first timebase seen becomes the common one.
    pub fn compute_time_offset(&mut self, timebase: f64) -> i64 {
        let common = *self.common_timebase.get_or_insert(timebase);
        ((timebase - common) * 1000.0).round() as i64
    }

    pub fn source_loaded(&mut self, source: usize) {
        if let Some(info) = self.sources.get_mut(source) {
            if !info.is_failed() {
                info.status = SourceStatus::Loaded;
            }
        }
    }

    pub fn source_failed(&mut self, source: usize, error: &TraceError) {
        tracing::warn!("Source {} failed: {}", source, error);
        if let Some(info) = self.sources.get_mut(source) {
            info.status = SourceStatus::Failed(error.to_string());
        }
    }

    pub fn sources(&self) -> &[SourceInfo] {
        &self.sources
    }

    /// Units shared by every loaded source. Time when nothing is loaded.
    pub fn units(&self) -> Unit {
        self.units.unwrap_or_default()
    }

    /// Wall-clock zero of the database, in milliseconds.
    pub fn timebase(&self) -> Option<f64> {
        self.common_timebase
    }

    /// Fresh database-wide time range id.
    pub fn allocate_time_range_id(&mut self) -> i64 {
        let id = self.next_time_range_id;
        self.next_time_range_id += 1;
        id
    }

    pub fn add_resource(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn first_event_time(&self) -> u64 {
        self.first_event_time
    }

    pub fn last_event_time(&self) -> u64 {
        self.last_event_time
    }

    /// Visible events across all zones.
    pub fn total_event_count(&self) -> usize {
        self.zones.iter().map(|z| z.store().total_event_count()).sum()
    }

    /// Frames of the first zone that has any.
    pub fn get_first_frame_list(&self) -> Option<&FrameList> {
        self.zones
            .iter()
            .map(|z| z.frames())
            .find(|frames| !frames.is_empty())
    }

    pub fn query(&self, expression: &str) -> Result<QueryResult> {
        self.assert_readable();
        QueryResult::execute(&self.types, &self.zones, expression)
    }

    pub fn statistics(&self, start: u64, end: u64, filter: Option<&Filter>) -> Result<StatisticsTable> {
        self.assert_readable();
        StatisticsTable::build(&self.types, &self.zones, start, end, filter)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("types", &self.types.len())
            .field("zones", &self.zones)
            .field("sources", &self.sources.len())
            .field("in_batch", &self.in_batch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::event_type::{EventClass, EventFlags};
    use serde_json::json;

    fn scope(db: &mut Database, name: &str) -> Arc<EventType> {
        db.types_mut()
            .define_type(name, EventClass::Scope, EventFlags::NONE)
            .unwrap()
    }

    #[test]
    fn test_nested_scopes() {
        let mut db = Database::default();
        let a = scope(&mut db, "A");
        let b = scope(&mut db, "B");
        db.begin_batch();
        let zone = db.default_zone();
        db.insert_event(zone, a, 0, None);
        db.insert_event(zone, b, 5, None);
        db.leave_scope(zone, 10);
        db.leave_scope(zone, 20);
        db.end_batch();

        let store = db.zone(zone).unwrap().store();
        let outer = EventCursor::new(store, 0).unwrap();
        let inner = EventCursor::new(store, 1).unwrap();
        assert_eq!((outer.depth(), outer.end_time()), (0, 20));
        assert_eq!((inner.depth(), inner.time(), inner.end_time()), (1, 5, 10));
        assert_eq!(inner.parent().map(|p| p.id()), Some(outer.id()));
        assert_eq!((db.first_event_time(), db.last_event_time()), (0, 20));
        assert_eq!(db.summary().len(), 2);
    }

    #[test]
    fn test_abort_batch_discards_batch() {
        let mut db = Database::default();
        let a = scope(&mut db, "A");
        db.begin_batch();
        let main = db.create_or_get_zone("main", "script", "");
        db.insert_event(main, a.clone(), 0, None);
        db.end_batch();

        db.begin_batch();
        db.leave_scope(main, 8);
        db.insert_event(main, a.clone(), 9, None);
        let worker = db.create_or_get_zone("worker", "script", "");
        db.insert_event(worker, a.clone(), 12, None);
        db.abort_batch();

        assert!(!db.is_batch_open());
        assert_eq!(db.zones().len(), 1);
        assert!(db.find_zone("worker").is_none());
        assert_eq!(db.total_event_count(), 1);
        assert_eq!(db.summary().len(), 1);
        assert_eq!(db.zone(main).unwrap().store().open_scope_depth(), 1);

        db.begin_batch();
        db.leave_scope(main, 20);
        db.end_batch();
        let outer = EventCursor::new(db.zone(main).unwrap().store(), 0).unwrap();
        assert_eq!(outer.end_time(), 20);
        assert_eq!(db.last_event_time(), 20);
    }

    #[test]
    fn test_abort_batch_restores_placeholder() {
        let mut db = Database::default();
        let tick = db
            .types_mut()
            .define_type("tick", EventClass::Instance, EventFlags::NONE)
            .unwrap();
        db.begin_batch();
        let placeholder = db.default_zone();
        db.insert_event(placeholder, tick.clone(), 1, None);
        db.end_batch();

        db.begin_batch();
        assert_eq!(db.create_or_get_zone("main", "script", ""), placeholder);
        db.abort_batch();
        assert!(db.zone(placeholder).unwrap().is_placeholder());
        assert!(db.find_zone("main").is_none());

        db.begin_batch();
        assert_eq!(db.create_or_get_zone("worker", "script", ""), placeholder);
        db.end_batch();
        assert_eq!(db.zone(placeholder).unwrap().key(), "worker:script:");
        assert_eq!(db.total_event_count(), 1);
    }

    #[test]
    fn test_placeholder_zone_is_reused() {
        let mut db = Database::default();
        let placeholder = db.default_zone();
        assert!(db.zone(placeholder).unwrap().is_placeholder());
        let named = db.create_or_get_zone("main", "script", "http://x");
        assert_eq!(named, placeholder);
        assert_eq!(db.zone(named).unwrap().key(), "main:script:http://x");

        let worker = db.create_or_get_zone("worker", "script", "");
        assert_ne!(worker, named);
        assert_eq!(db.create_or_get_zone("main", "script", "http://x"), named);
        assert_eq!(db.zones().len(), 2);
    }

    #[test]
    fn test_mixed_units_rejected() {
        let mut db = Database::default();
        let first = db.add_source("a");
        let second = db.add_source("b");
        let header = |units: &str, timebase: f64| SourceHeader {
            timebase,
            metadata: json!({ "units": units }),
            ..Default::default()
        };
        assert_eq!(db.initialize_source(first, header("", 1000.0)).unwrap(), 0);
        let err = db.initialize_source(second, header("bytes", 1000.0)).unwrap_err();
        assert!(matches!(err, TraceError::Source { .. }));
        db.source_failed(second, &err);
        db.source_loaded(first);
        assert_eq!(db.sources()[first].status, SourceStatus::Loaded);
        assert!(db.sources()[second].is_failed());
        assert_eq!(db.units(), Unit::Time);
    }

    #[test]
    fn test_time_offsets_follow_first_timebase() {
        let mut db = Database::default();
        assert_eq!(db.compute_time_offset(5000.0), 0);
        assert_eq!(db.compute_time_offset(5002.5), 2500);
        assert_eq!(db.compute_time_offset(4999.0), -1000);
        assert_eq!(db.timebase(), Some(5000.0));
    }

    #[test]
    #[should_panic(expected = "already open")]
    fn test_double_begin_panics() {
        let mut db = Database::default();
        db.begin_batch();
        db.begin_batch();
    }

    #[test]
    #[should_panic(expected = "batch is open")]
    fn test_query_during_batch_panics() {
        let mut db = Database::default();
        db.begin_batch();
        let _ = db.query("a");
    }

    #[test]
    fn test_query_and_statistics() {
        let mut db = Database::default();
        let draw = scope(&mut db, "draw");
        db.begin_batch();
        let zone = db.create_or_get_zone("main", DEFAULT_ZONE_TYPE, "");
        for t in [0, 100, 200] {
            db.insert_event(zone, draw.clone(), t, None);
            db.leave_scope(zone, t + 10);
        }
        db.end_batch();

        assert_eq!(db.query("draw(@duration == 10)").unwrap().len(), 3);
        let table = db.statistics(0, 150, None).unwrap();
        assert_eq!(table.get_event_type_entry("draw").map(|e| e.count), Some(2));
        assert_eq!(db.total_event_count(), 3);
        assert!(db.get_first_frame_list().is_none());
    }
}

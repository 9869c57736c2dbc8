//! Per-event-type statistics over a time range.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::data::event_type::{EventFlags, EventType};
use crate::db::cursor::{EventCursor, EventIter};
use crate::db::type_table::EventTypeTable;
use crate::db::zone::Zone;
use crate::error::Result;
use crate::filter::Filter;

/// Number of one-millisecond buckets in a scope's duration histogram. The
/// last bucket collects everything at or above 999ms.
pub const HISTOGRAM_BUCKETS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    #[default]
    Any,
    Count,
    TotalTime,
    MeanTime,
    OwnTime,
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "any" => Ok(SortMode::Any),
            "count" => Ok(SortMode::Count),
            "total" => Ok(SortMode::TotalTime),
            "mean" => Ok(SortMode::MeanTime),
            "own" => Ok(SortMode::OwnTime),
            other => Err(format!("unknown sort mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeTimes {
    pub total_time: u64,
    pub own_time: u64,
    pub user_time: u64,
    #[serde(skip)]
    pub buckets: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatisticsEntry {
    #[serde(rename = "name")]
    #[serde(serialize_with = "serialize_type_name")]
    pub event_type: Arc<EventType>,
    pub count: u64,
    /// Present for scope types.
    #[serde(flatten)]
    pub scope: Option<ScopeTimes>,
}

fn serialize_type_name<S: serde::Serializer>(
    event_type: &Arc<EventType>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&event_type.name)
}

impl StatisticsEntry {
    fn new(event_type: Arc<EventType>) -> Self {
        let scope = event_type.is_scope().then(|| ScopeTimes {
            total_time: 0,
            own_time: 0,
            user_time: 0,
            buckets: vec![0; HISTOGRAM_BUCKETS],
        });
        Self {
            event_type,
            count: 0,
            scope,
        }
    }

    fn append(&mut self, event: &EventCursor<'_>) {
        self.count += 1;
        let Some(times) = self.scope.as_mut() else {
            return;
        };
        let user = event.user_duration();
        times.total_time += event.total_duration();
        times.own_time += event.own_duration();
        times.user_time += user;
        let bucket = ((user + 500) / 1000).min(HISTOGRAM_BUCKETS as u64 - 1) as usize;
        times.buckets[bucket] += 1;
    }

    pub fn name(&self) -> &str {
        &self.event_type.name
    }

    pub fn is_scope(&self) -> bool {
        self.scope.is_some()
    }

    /// Mean of the user time, or of the total time for system-time scopes.
    pub fn mean_time(&self) -> f64 {
        let Some(times) = &self.scope else {
            return 0.0;
        };
        if self.count == 0 {
            return 0.0;
        }
        let sum = if self.event_type.flags.contains(EventFlags::SYSTEM_TIME) {
            times.total_time
        } else {
            times.user_time
        };
        sum as f64 / self.count as f64
    }

    /// User-duration histogram in milliseconds.
    pub fn distribution(&self) -> Option<&[u32]> {
        self.scope.as_ref().map(|t| t.buckets.as_slice())
    }
}

#[derive(Debug, Clone)]
pub struct StatisticsTable {
    start_time: u64,
    end_time: u64,
    event_count: u64,
    entries: Vec<StatisticsEntry>,
    by_name: HashMap<String, usize>,
    sort_mode: SortMode,
}

impl StatisticsTable {
    /// Count events starting in `[start, end)` across `zones`, skipping
    /// internal and builtin types.
    pub fn build<'z>(
        types: &EventTypeTable,
        zones: impl IntoIterator<Item = &'z Zone>,
        start: u64,
        end: u64,
        filter: Option<&Filter>,
    ) -> Result<Self> {
        let filter = filter.filter(|f| f.is_active());
        let mask = filter.map(|f| f.type_mask(types));
        let mut slots: HashMap<u32, usize> = HashMap::new();
        let mut entries = Vec::new();
        for event_type in types.get_all() {
            if event_type.is_hidden() {
                continue;
            }
            if mask.as_ref().is_some_and(|m| !m.contains(event_type.id)) {
                continue;
            }
            slots.insert(event_type.id, entries.len());
            entries.push(StatisticsEntry::new(event_type.clone()));
        }

        let mut event_count = 0;
        for zone in zones {
            let store = zone.store();
            for event in EventIter::new(store, store.range(start, end)?) {
                let Some(&slot) = slots.get(&event.type_id()) else {
                    continue;
                };
                if filter.is_some_and(|f| !f.matches_arguments(&event)) {
                    continue;
                }
                entries[slot].append(&event);
                event_count += 1;
            }
        }

        entries.retain(|e| e.count > 0);
        let by_name = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.event_type.name.clone(), i))
            .collect();
        tracing::debug!(
            "Built statistics for [{}, {}): {} events over {} types",
            start,
            end,
            event_count,
            entries.len()
        );
        Ok(Self {
            start_time: start,
            end_time: end,
            event_count,
            entries,
            by_name,
            sort_mode: SortMode::Any,
        })
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn end_time(&self) -> u64 {
        self.end_time
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn entries(&self) -> &[StatisticsEntry] {
        &self.entries
    }

    pub fn get_event_type_entry(&self, name: &str) -> Option<&StatisticsEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Reorder entries. Scopes rank ahead of instances for the time-based
    /// modes; instances fall back to count.
    pub fn sort(&mut self, mode: SortMode) {
        if mode == SortMode::Any || mode == self.sort_mode {
            return;
        }
        self.sort_mode = mode;
        let key = |e: &StatisticsEntry| -> f64 {
            match (mode, &e.scope) {
                (SortMode::TotalTime, Some(t)) => t.total_time as f64,
                (SortMode::OwnTime, Some(t)) => t.own_time as f64,
                (SortMode::MeanTime, Some(_)) => e.mean_time(),
                _ => e.count as f64,
            }
        };
        self.entries.sort_by(|a, b| {
            let scopes_first = mode != SortMode::Count;
            if scopes_first && a.is_scope() != b.is_scope() {
                return b.is_scope().cmp(&a.is_scope());
            }
            key(b).total_cmp(&key(a))
        });
        for (i, entry) in self.entries.iter().enumerate() {
            self.by_name.insert(entry.event_type.name.clone(), i);
        }
    }

    /// Narrow by a type-only filter without rescanning events. Filters with
    /// argument comparisons need [`StatisticsTable::build`].
    pub fn filter_types(&self, filter: &Filter) -> Self {
        let entries: Vec<StatisticsEntry> = self
            .entries
            .iter()
            .filter(|e| filter.matches_type(&e.event_type))
            .cloned()
            .collect();
        Self {
            start_time: self.start_time,
            end_time: self.end_time,
            event_count: entries.iter().map(|e| e.count).sum(),
            by_name: entries
                .iter()
                .enumerate()
                .map(|(i, e)| (e.event_type.name.clone(), i))
                .collect(),
            entries,
            sort_mode: self.sort_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::data::args::{ArgValue, ArgumentData};
    use crate::data::event_type::{Builtin, EventClass};
    use crate::filter::CompiledFilter;

    fn zone_with_events(table: &mut EventTypeTable) -> Zone {
        let draw = table
            .define_type("draw(uint32 n)", EventClass::Scope, EventFlags::NONE)
            .unwrap();
        let gc = table
            .define_type("gc", EventClass::Scope, EventFlags::SYSTEM_TIME)
            .unwrap();
        let tick = table
            .define_type("tick", EventClass::Instance, EventFlags::NONE)
            .unwrap();
        let mark = table.define_builtin(Builtin::TraceMark).unwrap();

        let mut zone = Zone::new(0, "main", "script", "", 64);
        let store = zone.store_mut();
        let n = |v| -> Option<ArgumentData> { Some([("n", ArgValue::Int(v))].into_iter().collect()) };
        store.insert(draw.clone(), 0, n(1));
        store.insert(gc.clone(), 1_000, None);
        store.leave(3_000);
        store.leave(10_000);
        store.insert(draw, 20_000, n(2));
        store.leave(22_000);
        store.insert(tick.clone(), 30_000, None);
        store.insert(tick, 31_000, None);
        store.insert(mark, 32_000, None);
        zone.reconcile();
        zone
    }

    #[test]
    fn test_table_entries() {
        let mut types = EventTypeTable::new();
        let zone = zone_with_events(&mut types);
        let table = StatisticsTable::build(&types, [&zone], 0, u64::MAX, None).unwrap();

        assert_eq!(table.event_count(), 5);
        assert!(table.get_event_type_entry("wtf.trace#mark").is_none());
        let draw = table.get_event_type_entry("draw").unwrap();
        let times = draw.scope.as_ref().unwrap();
        assert_eq!((draw.count, times.total_time, times.own_time, times.user_time), (2, 12_000, 10_000, 10_000));
        assert_eq!(draw.mean_time(), 5_000.0);
        let buckets = draw.distribution().unwrap();
        assert_eq!((buckets[8], buckets[2]), (1, 1));

        let gc = table.get_event_type_entry("gc").unwrap();
        assert_eq!(gc.mean_time(), 2_000.0);
        assert_eq!(table.get_event_type_entry("tick").map(|e| e.count), Some(2));
    }

    #[test]
    fn test_sorting() {
        let mut types = EventTypeTable::new();
        let zone = zone_with_events(&mut types);
        let mut table = StatisticsTable::build(&types, [&zone], 0, u64::MAX, None).unwrap();

        table.sort(SortMode::TotalTime);
        let names: Vec<&str> = table.entries().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["draw", "gc", "tick"]);

        table.sort(SortMode::Count);
        assert_eq!(table.entries()[0].count, 2);
        assert_eq!(table.entries()[2].name(), "gc");
        assert_eq!(table.get_event_type_entry("gc").map(|e| e.count), Some(1));
    }

    #[test]
    fn test_filtered_and_ranged() {
        let mut types = EventTypeTable::new();
        let zone = zone_with_events(&mut types);

        let mut filter = Filter::new();
        filter.set_from_string("draw(n == 2)");
        let table = StatisticsTable::build(&types, [&zone], 0, u64::MAX, Some(&filter)).unwrap();
        assert_eq!(table.entries().len(), 1);
        assert_eq!(table.event_count(), 1);

        let table = StatisticsTable::build(&types, [&zone], 15_000, 31_000, None).unwrap();
        assert_eq!(table.event_count(), 2);

        let full = StatisticsTable::build(&types, [&zone], 0, u64::MAX, None).unwrap();
        let mut type_only = Filter::new();
        type_only.set_from_string("/^(gc|tick)$/");
        let narrowed = full.filter_types(&type_only);
        assert_eq!(narrowed.event_count(), 3);
    }

    #[test]
    fn test_filter_type_checked_once_per_type() {
        let mut types = EventTypeTable::new();
        let zone = zone_with_events(&mut types);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let compiled = CompiledFilter {
            type_predicate: Box::new(move |t: &EventType| {
                counter.fetch_add(1, Ordering::Relaxed);
                t.name == "tick"
            }),
            arg_predicate: None,
        };
        let filter = Filter::with_compiled("tick", compiled);
        let table = StatisticsTable::build(&types, [&zone], 0, u64::MAX, Some(&filter)).unwrap();
        assert_eq!(table.event_count(), 2);
        assert_eq!(calls.load(Ordering::Relaxed), types.len());
    }
}

//! Named time ranges built from `wtf.timeRange#begin`/`#end` events.

use std::collections::HashMap;

use crate::data::args::ArgValue;
use crate::data::event_type::Builtin;
use crate::db::ancillary::AncillaryList;
use crate::db::cursor::EventCursor;
use crate::db::store::EventStore;

#[derive(Debug, Clone, PartialEq)]
pub struct TimeRange {
    /// Database-wide range id.
    pub id: i64,
    pub name: String,
    pub value: Option<ArgValue>,
    pub time: u64,
    /// `None` while the range is still open.
    pub end_time: Option<u64>,
    /// First free display slot among ranges open at `time`.
    pub level: u32,
    /// Number of ranges already open at `time`.
    pub overlap: u32,
    pub begin_event: u64,
    pub end_event: Option<u64>,
}

impl TimeRange {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn duration(&self) -> Option<u64> {
        self.end_time.map(|end| end.saturating_sub(self.time))
    }

    fn intersects(&self, start: u64, end: u64) -> bool {
        self.time <= end && self.end_time.map_or(true, |e| e >= start)
    }
}

#[derive(Debug, Default)]
pub struct TimeRangeList {
    ranges: Vec<TimeRange>,
    by_id: HashMap<i64, usize>,
    maximum_level: u32,
    levels: Vec<Option<i64>>,
    overlap: u32,
}

impl TimeRangeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of display levels used by the ranges.
    pub fn maximum_level(&self) -> u32 {
        self.maximum_level
    }

    /// Ranges in begin-time order.
    pub fn get_all_time_ranges(&self) -> &[TimeRange] {
        &self.ranges
    }

    pub fn get_time_range(&self, id: i64) -> Option<&TimeRange> {
        self.by_id.get(&id).map(|&index| &self.ranges[index])
    }

    pub fn get_time_ranges_at_time(&self, time: u64) -> Vec<&TimeRange> {
        let mut matches = Vec::new();
        self.for_each_intersecting(time, time, |range| matches.push(range));
        matches
    }

    /// Visit ranges intersecting the closed interval `[start, end]` in begin
    /// order. Open ranges extend to infinity.
    pub fn for_each_intersecting<'a, F: FnMut(&'a TimeRange)>(&'a self, start: u64, end: u64, mut f: F) {
        if self.ranges.is_empty() {
            return;
        }
        let mut index = self
            .ranges
            .partition_point(|r| r.time <= start)
            .saturating_sub(1);
        // Back up to a range that began with nothing else open.
        while index > 0 && self.ranges[index].overlap > 0 {
            index -= 1;
        }
        for range in &self.ranges[index..] {
            if range.time > end {
                break;
            }
            if range.intersects(start, end) {
                f(range);
            }
        }
    }
}

impl AncillaryList for TimeRangeList {
    fn event_types(&self) -> &'static [Builtin] {
        &[Builtin::TimeRangeBegin, Builtin::TimeRangeEnd]
    }

    fn reset(&mut self) {
        self.ranges.clear();
        self.by_id.clear();
        self.levels.clear();
        self.overlap = 0;
        self.maximum_level = 0;
    }

    fn handle_event(&mut self, builtin: Builtin, event: &EventCursor<'_>) {
        let Some(id) = event.argument("id").and_then(ArgValue::as_i64) else {
            tracing::warn!("Time range event at {} has no id, ignoring", event.time());
            return;
        };
        match builtin {
            Builtin::TimeRangeBegin => {
                if self.by_id.contains_key(&id) {
                    tracing::warn!("Time range {} began twice, keeping the first", id);
                    return;
                }
                let level = match self.levels.iter().position(Option::is_none) {
                    Some(slot) => slot,
                    None => {
                        self.levels.push(None);
                        self.levels.len() - 1
                    }
                };
                self.levels[level] = Some(id);
                self.by_id.insert(id, self.ranges.len());
                self.ranges.push(TimeRange {
                    id,
                    name: event
                        .argument("name")
                        .and_then(ArgValue::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    value: event.argument("value").filter(|v| !v.is_null()).cloned(),
                    time: event.time(),
                    end_time: None,
                    level: level as u32,
                    overlap: self.overlap,
                    begin_event: event.id(),
                    end_event: None,
                });
                self.overlap += 1;
            }
            Builtin::TimeRangeEnd => {
                let Some(&index) = self.by_id.get(&id) else {
                    tracing::warn!("Time range {} ended without a begin, ignoring", id);
                    return;
                };
                let range = &mut self.ranges[index];
                if range.end_time.is_some() {
                    return;
                }
                range.end_time = Some(event.time().max(range.time));
                range.end_event = Some(event.id());
                let level = range.level as usize;
                if self.levels.get(level) == Some(&Some(id)) {
                    self.levels[level] = None;
                    self.overlap = self.overlap.saturating_sub(1);
                }
            }
            _ => {}
        }
    }

    fn end_update(&mut self, _store: &EventStore) {
        self.maximum_level = self.levels.len() as u32;
    }
}

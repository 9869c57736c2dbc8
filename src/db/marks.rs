//! Timeline marks from `wtf.trace#mark`. Each mark lasts until the next one;
//! the last lasts until the zone's last event.

use crate::data::args::ArgValue;
use crate::data::event_type::Builtin;
use crate::db::ancillary::AncillaryList;
use crate::db::cursor::EventCursor;
use crate::db::store::EventStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    pub event_id: u64,
    pub name: String,
    pub value: Option<ArgValue>,
    pub time: u64,
    pub end_time: u64,
}

impl Mark {
    pub fn duration(&self) -> u64 {
        self.end_time.saturating_sub(self.time)
    }
}

#[derive(Debug, Default)]
pub struct MarkList {
    marks: Vec<Mark>,
}

impl MarkList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn get_all_marks(&self) -> &[Mark] {
        &self.marks
    }

    pub fn get_mark_at_time(&self, time: u64) -> Option<&Mark> {
        let index = self.marks.partition_point(|m| m.time <= time).checked_sub(1)?;
        let mark = &self.marks[index];
        (mark.end_time >= time).then_some(mark)
    }

    /// Visit marks intersecting `[start, end]` in time order.
    pub fn for_each_intersecting<'a, F: FnMut(&'a Mark)>(&'a self, start: u64, end: u64, mut f: F) {
        let index = self
            .marks
            .partition_point(|m| m.time <= start)
            .saturating_sub(1);
        for mark in self.marks.iter().skip(index) {
            if mark.end_time < start {
                continue;
            }
            if mark.time > end {
                break;
            }
            f(mark);
        }
    }
}

impl AncillaryList for MarkList {
    fn event_types(&self) -> &'static [Builtin] {
        &[Builtin::TraceMark]
    }

    fn reset(&mut self) {
        self.marks.clear();
    }

    fn handle_event(&mut self, _builtin: Builtin, event: &EventCursor<'_>) {
        if let Some(previous) = self.marks.last_mut() {
            previous.end_time = event.time();
        }
        self.marks.push(Mark {
            event_id: event.id(),
            name: event
                .argument("name")
                .and_then(ArgValue::as_str)
                .unwrap_or_default()
                .to_string(),
            value: event.argument("value").filter(|v| !v.is_null()).cloned(),
            time: event.time(),
            end_time: u64::MAX,
        });
    }

    fn end_update(&mut self, store: &EventStore) {
        if let Some(last) = self.marks.last_mut() {
            last.end_time = store.last_event_time().max(last.time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::args::ArgumentData;
    use crate::data::event_type::{EventClass, EventFlags};
    use crate::db::ancillary::rebuild_lists;
    use crate::db::type_table::EventTypeTable;

    #[test]
    fn test_marks_span_to_next() {
        let mut table = EventTypeTable::new();
        let mark = table.define_builtin(Builtin::TraceMark).unwrap();
        let tick = table
            .define_type("tick", EventClass::Instance, EventFlags::NONE)
            .unwrap();
        let mut store = EventStore::new(8);
        for (time, name) in [(10, "load"), (40, "run")] {
            let args: ArgumentData = [("name", ArgValue::String(name.into()))]
                .into_iter()
                .collect();
            store.insert(mark.clone(), time, Some(args));
        }
        store.insert(tick, 90, None);
        store.reconcile();

        let mut list = MarkList::new();
        rebuild_lists(&store, &mut [&mut list as &mut dyn AncillaryList]);
        let marks = list.get_all_marks();
        assert_eq!((marks[0].time, marks[0].end_time), (10, 40));
        assert_eq!((marks[1].time, marks[1].end_time), (40, 90));
        assert_eq!(list.get_mark_at_time(20).map(|m| m.name.as_str()), Some("load"));
        assert_eq!(list.get_mark_at_time(5), None);
        assert_eq!(list.get_mark_at_time(95), None);

        let mut seen = Vec::new();
        list.for_each_intersecting(45, 100, |m| seen.push(m.name.clone()));
        assert_eq!(seen, vec!["run".to_string()]);
    }
}

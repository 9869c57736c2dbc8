//! Read-only views over stored events.

use std::sync::Arc;

use crate::data::args::{ArgValue, ArgumentData};
use crate::data::event_type::{Builtin, EventType};
use crate::db::store::{Event, EventStore};

/// A positioned view of one reconciled event. Times are microseconds.
#[derive(Clone, Copy)]
pub struct EventCursor<'a> {
    store: &'a EventStore,
    index: usize,
    event: &'a Event,
}

impl<'a> EventCursor<'a> {
    pub fn new(store: &'a EventStore, index: usize) -> Option<Self> {
        store.get(index).map(|event| Self {
            store,
            index,
            event,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> u64 {
        self.event.id
    }

    pub fn event(&self) -> &'a Event {
        self.event
    }

    pub fn event_type(&self) -> &'a Arc<EventType> {
        &self.event.event_type
    }

    pub fn type_id(&self) -> u32 {
        self.event.event_type.id
    }

    pub fn name(&self) -> &'a str {
        &self.event.event_type.name
    }

    pub fn is_scope(&self) -> bool {
        self.event.is_scope()
    }

    pub fn depth(&self) -> u32 {
        self.event.depth
    }

    pub fn time(&self) -> u64 {
        self.event.time
    }

    /// End time for scopes, start time for instances.
    pub fn end_time(&self) -> u64 {
        self.event.end_time.unwrap_or(self.event.time)
    }

    pub fn tag(&self) -> u32 {
        self.event.tag
    }

    pub fn total_duration(&self) -> u64 {
        self.end_time() - self.event.time
    }

    /// Total duration minus time attributed to system scopes.
    pub fn user_duration(&self) -> u64 {
        self.total_duration().saturating_sub(self.event.system_time)
    }

    /// Total duration minus time spent in child scopes.
    pub fn own_duration(&self) -> u64 {
        self.total_duration().saturating_sub(self.event.child_time)
    }

    pub fn system_time(&self) -> u64 {
        self.event.system_time
    }

    pub fn child_time(&self) -> u64 {
        self.event.child_time
    }

    pub fn parent(&self) -> Option<EventCursor<'a>> {
        self.store
            .parent_index(self.event)
            .and_then(|index| EventCursor::new(self.store, index))
    }

    pub fn next_sibling(&self) -> Option<EventCursor<'a>> {
        self.event
            .next_sibling
            .and_then(|index| EventCursor::new(self.store, index))
    }

    /// First direct child, if any.
    pub fn first_child(&self) -> Option<EventCursor<'a>> {
        let next = EventCursor::new(self.store, self.index + 1)?;
        (next.event.parent_id() == Some(self.event.id)).then_some(next)
    }

    pub fn children(&self) -> impl Iterator<Item = EventCursor<'a>> {
        std::iter::successors(self.first_child(), |c| c.next_sibling())
    }

    pub fn args(&self) -> Option<&'a ArgumentData> {
        self.event.args.as_ref()
    }

    pub fn argument(&self, name: &str) -> Option<&'a ArgValue> {
        self.event.args.as_ref().and_then(|args| args.get(name))
    }

    /// Id of the first flow event (branch, extend or terminate) directly
    /// inside this scope.
    pub fn flow_id(&self) -> Option<i64> {
        self.children()
            .find(|child| {
                matches!(
                    child.event_type().builtin,
                    Some(Builtin::FlowBranch | Builtin::FlowExtend | Builtin::FlowTerminate)
                )
            })
            .and_then(|child| child.argument("id").and_then(ArgValue::as_i64))
    }
}

impl std::fmt::Debug for EventCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCursor")
            .field("index", &self.index)
            .field("name", &self.name())
            .field("time", &self.time())
            .field("end_time", &self.event.end_time)
            .field("depth", &self.depth())
            .finish()
    }
}

/// Time-ordered iteration over a span of event indices.
pub struct EventIter<'a> {
    store: &'a EventStore,
    next: usize,
    end: usize,
}

impl<'a> EventIter<'a> {
    pub fn new(store: &'a EventStore, range: std::ops::Range<usize>) -> Self {
        Self {
            store,
            next: range.start,
            end: range.end.min(store.len()),
        }
    }
}

impl<'a> Iterator for EventIter<'a> {
    type Item = EventCursor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let cursor = EventCursor::new(self.store, self.next);
        self.next += 1;
        cursor
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::event_type::{EventClass, EventFlags};
    use crate::db::type_table::EventTypeTable;

    #[test]
    fn test_durations_and_navigation() {
        let mut table = EventTypeTable::new();
        let outer = table
            .define_type("outer", EventClass::Scope, EventFlags::NONE)
            .unwrap();
        let inner = table
            .define_type("inner", EventClass::Scope, EventFlags::SYSTEM_TIME)
            .unwrap();
        let branch = table.define_builtin(Builtin::FlowBranch).unwrap();

        let mut store = EventStore::new(16);
        store.insert(outer, 0, None);
        store.insert(
            branch,
            1,
            Some([("id", ArgValue::Int(42))].into_iter().collect()),
        );
        store.insert(inner, 10, None);
        store.leave(30);
        store.leave(100);
        store.reconcile();

        let root = EventCursor::new(&store, 0).unwrap();
        assert_eq!(root.total_duration(), 100);
        assert_eq!(root.own_duration(), 80);
        assert_eq!(root.user_duration(), 80);
        assert_eq!(root.flow_id(), Some(42));
        assert_eq!(root.children().count(), 2);

        let child = EventCursor::new(&store, 2).unwrap();
        assert_eq!(child.parent().map(|p| p.index()), Some(0));
        assert_eq!(child.flow_id(), None);

        let names: Vec<&str> = EventIter::new(&store, 0..store.len())
            .map(|c| c.name())
            .collect();
        assert_eq!(names, vec!["outer", "wtf.flow#branch", "inner"]);
    }
}

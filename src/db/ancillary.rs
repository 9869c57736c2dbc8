//! Secondary lists derived from specific builtin events of a zone.

use std::ops::Range;

use crate::data::event_type::Builtin;
use crate::db::cursor::{EventCursor, EventIter};
use crate::db::store::EventStore;

/// A list kept in step with its zone's store. After each reconcile it is fed
/// the events that are new to their position; a resort of the store resets
/// it and feeds everything again.
pub trait AncillaryList {
    /// Builtin event types the list consumes.
    fn event_types(&self) -> &'static [Builtin];

    fn reset(&mut self);

    /// Called for every matching event in time order.
    fn handle_event(&mut self, builtin: Builtin, event: &EventCursor<'_>);

    /// Called once the events of an update have all been handled.
    fn end_update(&mut self, store: &EventStore);
}

/// Feed the events at `range` to each list that asked for them. A range
/// starting at 0 resets the lists first.
pub fn update_lists(store: &EventStore, range: Range<usize>, lists: &mut [&mut dyn AncillaryList]) {
    if range.start == 0 {
        for list in lists.iter_mut() {
            list.reset();
        }
    }
    let wanted: Vec<&'static [Builtin]> = lists.iter().map(|l| l.event_types()).collect();
    if wanted.iter().any(|w| !w.is_empty()) {
        for cursor in EventIter::new(store, range) {
            let Some(builtin) = cursor.event_type().builtin else {
                continue;
            };
            for (list, types) in lists.iter_mut().zip(&wanted) {
                if types.contains(&builtin) {
                    list.handle_event(builtin, &cursor);
                }
            }
        }
    }
    for list in lists.iter_mut() {
        list.end_update(store);
    }
}

/// Rebuild the lists from every event of `store`.
pub fn rebuild_lists(store: &EventStore, lists: &mut [&mut dyn AncillaryList]) {
    update_lists(store, 0..store.len(), lists);
}

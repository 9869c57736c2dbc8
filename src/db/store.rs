//! Per-zone event storage with scope-tree reconstruction.
//!
//! Insertion is two-phase. While a batch is open, events are appended to
//! fixed-capacity pending chunks and an explicit open-scope stack assigns
//! parents and depths and closes scopes as `leave` events arrive. At batch end
//! [`EventStore::reconcile`] merges the pending chunks into the sorted event
//! list and relinks sibling pointers in final time order.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use crate::data::args::ArgumentData;
use crate::data::event_type::{EventFlags, EventType};
use crate::error::{Result, TraceError};

/// A stored event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Store-local id in arrival order. Dense from 0.
    pub id: u64,
    pub event_type: Arc<EventType>,
    parent: Option<u64>,
    pub depth: u32,
    pub time: u64,
    /// Present iff the event is a scope.
    pub end_time: Option<u64>,
    pub args: Option<ArgumentData>,
    /// Application scratch value.
    pub tag: u32,
    pub next_sibling: Option<usize>,
    pub system_time: u64,
    pub child_time: u64,
}

impl Event {
    pub fn type_id(&self) -> u32 {
        self.event_type.id
    }

    pub fn is_scope(&self) -> bool {
        self.end_time.is_some()
    }

    /// Id of the enclosing scope.
    pub fn parent_id(&self) -> Option<u64> {
        self.parent
    }
}

/// A scope that has been entered but not yet left.
#[derive(Debug, Clone, Copy)]
struct OpenScope {
    id: u64,
    time: u64,
    system: bool,
    child_time: u64,
    system_time: u64,
}

/// Store state at the start of a batch, plus the reconciled events the batch
/// has modified since, so a failed batch can be undone.
#[derive(Debug)]
struct Checkpoint {
    next_id: u64,
    stack: Vec<OpenScope>,
    last_event_time: u64,
    touched: HashMap<usize, Event>,
}

pub struct EventStore {
    chunk_capacity: usize,
    events: Vec<Event>,
    /// Event id to index in `events`, for reconciled events.
    positions: Vec<usize>,
    /// Per event index, the index of the last child seen so far.
    last_child: Vec<Option<usize>>,
    last_root: Option<usize>,
    pending: Vec<Vec<Event>>,
    pending_base: u64,
    next_id: u64,
    stack: Vec<OpenScope>,
    dirty: bool,
    first_event_time: u64,
    last_event_time: u64,
    hidden_count: usize,
    maximum_scope_depth: u32,
    checkpoint: Option<Checkpoint>,
}

impl EventStore {
    pub fn new(chunk_capacity: usize) -> Self {
        Self {
            chunk_capacity: chunk_capacity.max(1),
            events: Vec::new(),
            positions: Vec::new(),
            last_child: Vec::new(),
            last_root: None,
            pending: Vec::new(),
            pending_base: 0,
            next_id: 0,
            stack: Vec::new(),
            dirty: false,
            first_event_time: 0,
            last_event_time: 0,
            hidden_count: 0,
            maximum_scope_depth: 0,
            checkpoint: None,
        }
    }

    /// Remember the current state so [`EventStore::rollback`] can return to
    /// it. The store must be reconciled.
    pub fn checkpoint(&mut self) {
        assert!(!self.dirty, "checkpoint taken on an unreconciled store");
        self.checkpoint = Some(Checkpoint {
            next_id: self.next_id,
            stack: self.stack.clone(),
            last_event_time: self.last_event_time,
            touched: HashMap::new(),
        });
    }

    /// Drop the checkpoint, keeping everything inserted since.
    pub fn commit(&mut self) {
        self.checkpoint = None;
    }

    /// Discard every change made since the last checkpoint: pending events,
    /// scope enters and leaves, and data appended to stored scopes. A store
    /// without a checkpoint only loses its pending events.
    pub fn rollback(&mut self) {
        let discarded: usize = self.pending.iter().map(Vec::len).sum();
        self.pending.clear();
        if let Some(checkpoint) = self.checkpoint.take() {
            self.next_id = checkpoint.next_id;
            self.stack = checkpoint.stack;
            self.last_event_time = checkpoint.last_event_time;
            for (index, event) in checkpoint.touched {
                self.events[index] = event;
            }
        } else {
            self.next_id = self.pending_base;
            self.stack.retain(|s| s.id < self.pending_base);
        }
        self.pending_base = self.next_id;
        self.dirty = false;
        tracing::debug!("Rolled back {} pending events", discarded);
    }

    /// Append an event. Scope-class types open a new scope that stays on the
    /// stack until a matching [`EventStore::leave`]. Returns the event id.
    pub fn insert(
        &mut self,
        event_type: Arc<EventType>,
        time: u64,
        args: Option<ArgumentData>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let is_scope = event_type.is_scope();
        let event = Event {
            id,
            parent: self.stack.last().map(|s| s.id),
            depth: self.stack.len() as u32,
            time,
            end_time: is_scope.then_some(time),
            args,
            tag: 0,
            next_sibling: None,
            system_time: 0,
            child_time: 0,
            event_type,
        };
        if is_scope {
            self.stack.push(OpenScope {
                id,
                time,
                system: event.event_type.flags.contains(EventFlags::SYSTEM_TIME),
                child_time: 0,
                system_time: 0,
            });
        }

        match self.pending.last_mut() {
            Some(chunk) if chunk.len() < self.chunk_capacity => chunk.push(event),
            _ => {
                let mut chunk = Vec::with_capacity(self.chunk_capacity);
                chunk.push(event);
                self.pending.push(chunk);
            }
        }
        self.dirty = true;
        id
    }

    /// Close the innermost open scope at `time`. Returns false, after logging,
    /// when no scope is open.
    pub fn leave(&mut self, time: u64) -> bool {
        let Some(scope) = self.stack.pop() else {
            tracing::warn!("Scope leave at {} with no open scope, ignoring", time);
            return false;
        };
        let end_time = time.max(scope.time);
        let duration = end_time - scope.time;
        if let Some(event) = self.event_by_id_mut(scope.id) {
            event.end_time = Some(end_time);
            event.child_time = scope.child_time.min(duration);
            event.system_time = scope.system_time.min(duration);
        }
        if let Some(parent) = self.stack.last_mut() {
            parent.child_time += duration;
            parent.system_time += if scope.system {
                duration
            } else {
                scope.system_time
            };
        }
        self.last_event_time = self.last_event_time.max(end_time);
        self.dirty = true;
        true
    }

    /// Merge `data` into the arguments of the innermost open scope. Returns
    /// false when no scope is open.
    pub fn append_scope_data(&mut self, data: &ArgumentData) -> bool {
        let Some(scope) = self.stack.last().copied() else {
            tracing::warn!("Scope data appended with no open scope, ignoring");
            return false;
        };
        match self.event_by_id_mut(scope.id) {
            Some(event) => {
                event.args.get_or_insert_with(ArgumentData::new).merge(data);
                true
            }
            None => false,
        }
    }

    fn event_by_id_mut(&mut self, id: u64) -> Option<&mut Event> {
        if id >= self.pending_base {
            let offset = (id - self.pending_base) as usize;
            self.pending
                .get_mut(offset / self.chunk_capacity)
                .and_then(|chunk| chunk.get_mut(offset % self.chunk_capacity))
        } else {
            let index = *self.positions.get(id as usize)?;
            if let Some(checkpoint) = self.checkpoint.as_mut() {
                if let Some(event) = self.events.get(index) {
                    checkpoint.touched.entry(index).or_insert_with(|| event.clone());
                }
            }
            self.events.get_mut(index)
        }
    }

    /// Whether events are waiting for [`EventStore::reconcile`].
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn open_scope_depth(&self) -> usize {
        self.stack.len()
    }

    /// Merge pending chunks into the time-ordered event list and rebuild the
    /// derived links. Returns the indices whose events are new to their
    /// position: only the appended tail, unless out-of-order arrivals forced
    /// a full resort.
    pub fn reconcile(&mut self) -> Range<usize> {
        if !self.dirty {
            return self.events.len()..self.events.len();
        }
        let old_len = self.events.len();
        let mut in_order = true;
        let mut previous = self.events.last().map(|e| e.time);
        for chunk in self.pending.drain(..) {
            for event in chunk {
                if previous.is_some_and(|t| event.time < t) {
                    in_order = false;
                }
                previous = Some(event.time);
                if event.event_type.is_hidden() {
                    self.hidden_count += 1;
                }
                let reach = event.depth + event.is_scope() as u32;
                self.maximum_scope_depth = self.maximum_scope_depth.max(reach);
                self.last_event_time = self
                    .last_event_time
                    .max(event.end_time.unwrap_or(event.time));
                self.events.push(event);
            }
        }
        self.pending_base = self.next_id;
        let added = self.events.len() - old_len;

        if in_order {
            self.positions.resize(self.events.len(), 0);
            for index in old_len..self.events.len() {
                self.positions[self.events[index].id as usize] = index;
            }
            self.link_siblings(old_len);
        } else {
            // Ties keep arrival order.
            self.events.sort_by_key(|e| (e.time, e.id));
            self.positions.resize(self.events.len(), 0);
            for (index, event) in self.events.iter().enumerate() {
                self.positions[event.id as usize] = index;
            }
            self.last_child.clear();
            self.last_root = None;
            self.link_siblings(0);
        }

        // Scopes still open run to the latest event seen so far.
        let latest = self.events.last().map_or(0, |e| e.time);
        for open in &self.stack {
            if let Some(&index) = self.positions.get(open.id as usize) {
                let event = &mut self.events[index];
                event.end_time = Some(latest.max(event.time));
            }
        }

        if let Some(first) = self.events.first() {
            self.first_event_time = first.time;
        }
        self.dirty = false;
        tracing::debug!(
            "Reconciled {} new events ({} total, {} open scopes, resorted: {})",
            added,
            self.events.len(),
            self.stack.len(),
            !in_order
        );
        if in_order {
            old_len..self.events.len()
        } else {
            0..self.events.len()
        }
    }

    /// Link `next_sibling` for every event from `start` on, continuing the
    /// chains recorded for earlier events.
    fn link_siblings(&mut self, start: usize) {
        self.last_child.resize(self.events.len(), None);
        for index in start..self.events.len() {
            self.events[index].next_sibling = None;
            let parent_index = self.events[index]
                .parent
                .and_then(|id| self.positions.get(id as usize).copied());
            let slot = match parent_index {
                Some(p) => &mut self.last_child[p],
                None => &mut self.last_root,
            };
            if let Some(previous) = slot.replace(index) {
                self.events[previous].next_sibling = Some(index);
            }
        }
    }

    fn ensure_reconciled(&self) -> Result<()> {
        if self.dirty {
            return Err(TraceError::Unreconciled);
        }
        Ok(())
    }

    /// Number of stored events, including hidden ones.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Event> {
        self.events.get_mut(index)
    }

    pub fn index_of_id(&self, id: u64) -> Option<usize> {
        if id >= self.pending_base {
            return None;
        }
        self.positions.get(id as usize).copied()
    }

    pub fn parent_index(&self, event: &Event) -> Option<usize> {
        event.parent.and_then(|id| self.index_of_id(id))
    }

    pub fn first_event_time(&self) -> u64 {
        self.first_event_time
    }

    /// Latest time covered by any event, including scope ends.
    pub fn last_event_time(&self) -> u64 {
        self.last_event_time
    }

    /// Events excluding hidden (internal or builtin) ones.
    pub fn total_event_count(&self) -> usize {
        self.events.len() - self.hidden_count
    }

    pub fn maximum_scope_depth(&self) -> u32 {
        self.maximum_scope_depth
    }

    /// Index of the last event at or before `time`, or of the first event when
    /// every event is later. `None` only for an empty store.
    pub fn get_index_of_event_near_time(&self, time: u64) -> Result<Option<usize>> {
        self.ensure_reconciled()?;
        if self.events.is_empty() {
            return Ok(None);
        }
        let after = self.events.partition_point(|e| e.time <= time);
        Ok(Some(after.saturating_sub(1)))
    }

    /// Shorthand for [`EventStore::get_index_of_event_near_time`].
    pub fn find_near(&self, time: u64) -> Result<Option<usize>> {
        self.get_index_of_event_near_time(time)
    }

    /// Index of the root scope that contains `time`, falling back to the event
    /// near `time` when no root scope spans it.
    pub fn get_index_of_root_scope_including_time(&self, time: u64) -> Result<Option<usize>> {
        let Some(near) = self.get_index_of_event_near_time(time)? else {
            return Ok(None);
        };
        let mut cursor = Some(near);
        while let Some(index) = cursor {
            let root = self.root_of(index);
            let event = &self.events[root];
            if let Some(end_time) = event.end_time {
                return Ok(Some(if end_time < time { near } else { root }));
            }
            cursor = root.checked_sub(1);
        }
        Ok(Some(near))
    }

    fn root_of(&self, mut index: usize) -> usize {
        while let Some(parent) = self.parent_index(&self.events[index]) {
            index = parent;
        }
        index
    }

    /// Indices of the events whose start time lies in `[start, end)`.
    pub fn range(&self, start: u64, end: u64) -> Result<Range<usize>> {
        self.ensure_reconciled()?;
        let lo = self.events.partition_point(|e| e.time < start);
        let hi = self.events.partition_point(|e| e.time < end).max(lo);
        Ok(lo..hi)
    }

    /// Visit the events whose start time lies in `[start, end)` in time order.
    pub fn for_each_in_range<F>(&self, start: u64, end: u64, mut f: F) -> Result<()>
    where
        F: FnMut(usize, &Event),
    {
        for index in self.range(start, end)? {
            f(index, &self.events[index]);
        }
        Ok(())
    }

    /// Inclusive index span covering `[start, end]`, optionally widened back to
    /// the root scope enclosing `start`.
    pub fn begin_time_range(&self, start: u64, end: u64, start_at_root: bool) -> Result<Range<usize>> {
        let first = if start_at_root {
            self.get_index_of_root_scope_including_time(start)?
        } else {
            self.get_index_of_event_near_time(start)?
        };
        let Some(first) = first else {
            return Ok(0..0);
        };
        let last = self.get_index_of_event_near_time(end)?.unwrap_or(first);
        Ok(first..last.max(first) + 1)
    }
}

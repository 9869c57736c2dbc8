//! Frames from `wtf.timing#frameStart`/`#frameEnd`. Only frames with both a
//! start and an end are kept.

use std::collections::HashMap;

use crate::data::args::ArgValue;
use crate::data::event_type::Builtin;
use crate::db::ancillary::AncillaryList;
use crate::db::cursor::EventCursor;
use crate::db::store::EventStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position among complete frames.
    pub ordinal: usize,
    pub number: i64,
    pub time: u64,
    pub end_time: u64,
    pub start_event: u64,
    pub end_event: u64,
}

impl Frame {
    pub fn duration(&self) -> u64 {
        self.end_time.saturating_sub(self.time)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PartialFrame {
    start: Option<(u64, u64)>,
    end: Option<(u64, u64)>,
}

#[derive(Debug, Default)]
pub struct FrameList {
    frames: Vec<Frame>,
    by_number: HashMap<i64, usize>,
    building: Vec<(i64, PartialFrame)>,
    building_index: HashMap<i64, usize>,
}

impl FrameList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get_all_frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn get_frame(&self, number: i64) -> Option<&Frame> {
        self.by_number.get(&number).map(|&i| &self.frames[i])
    }

    pub fn get_previous_frame(&self, frame: &Frame) -> Option<&Frame> {
        frame.ordinal.checked_sub(1).and_then(|i| self.frames.get(i))
    }

    pub fn get_next_frame(&self, frame: &Frame) -> Option<&Frame> {
        self.frames.get(frame.ordinal + 1)
    }

    pub fn get_frame_at_time(&self, time: u64) -> Option<&Frame> {
        let index = self.frames.partition_point(|f| f.time <= time).checked_sub(1)?;
        let frame = &self.frames[index];
        (frame.end_time >= time).then_some(frame)
    }

    /// The frames before and after `time`, for times between frames.
    pub fn get_intra_frame_at_time(&self, time: u64) -> (Option<&Frame>, Option<&Frame>) {
        match self.frames.partition_point(|f| f.time <= time).checked_sub(1) {
            None => (None, self.frames.first()),
            Some(index) => {
                let previous = &self.frames[index];
                (Some(previous), self.get_next_frame(previous))
            }
        }
    }

    /// Visit frames intersecting `[start, end]` in time order.
    pub fn for_each_intersecting<'a, F: FnMut(&'a Frame)>(&'a self, start: u64, end: u64, mut f: F) {
        let index = self
            .frames
            .partition_point(|fr| fr.time <= start)
            .saturating_sub(1);
        for frame in self.frames.iter().skip(index) {
            if frame.end_time < start {
                continue;
            }
            if frame.time > end {
                break;
            }
            f(frame);
        }
    }
}

impl AncillaryList for FrameList {
    fn event_types(&self) -> &'static [Builtin] {
        &[Builtin::FrameStart, Builtin::FrameEnd]
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.by_number.clear();
        self.building.clear();
        self.building_index.clear();
    }

    fn handle_event(&mut self, builtin: Builtin, event: &EventCursor<'_>) {
        let Some(number) = event.argument("number").and_then(ArgValue::as_i64) else {
            return;
        };
        if self.by_number.contains_key(&number) {
            tracing::debug!("Frame {} already complete, ignoring", number);
            return;
        }
        let slot = *self.building_index.entry(number).or_insert_with(|| {
            self.building.push((number, PartialFrame::default()));
            self.building.len() - 1
        });
        let partial = &mut self.building[slot].1;
        let mark = Some((event.time(), event.id()));
        match builtin {
            Builtin::FrameStart => partial.start = mark,
            Builtin::FrameEnd => partial.end = mark,
            _ => {}
        }
    }

    /// Move frames that now have both ends into the list. Frames still
    /// missing an end wait for a later update.
    fn end_update(&mut self, _store: &EventStore) {
        let mut resort = false;
        let mut waiting = Vec::new();
        for (number, partial) in self.building.drain(..) {
            let (Some((time, start_event)), Some((end_time, end_event))) = (partial.start, partial.end)
            else {
                waiting.push((number, partial));
                continue;
            };
            resort |= self.frames.last().is_some_and(|f| f.time > time);
            self.by_number.insert(number, self.frames.len());
            self.frames.push(Frame {
                ordinal: self.frames.len(),
                number,
                time,
                end_time: end_time.max(time),
                start_event,
                end_event,
            });
        }
        self.building_index = waiting
            .iter()
            .enumerate()
            .map(|(slot, (number, _))| (*number, slot))
            .collect();
        self.building = waiting;

        if resort {
            self.frames.sort_by_key(|f| (f.time, f.number));
            self.by_number.clear();
            for (ordinal, frame) in self.frames.iter_mut().enumerate() {
                frame.ordinal = ordinal;
                self.by_number.insert(frame.number, ordinal);
            }
        }
        if !self.building.is_empty() {
            tracing::debug!("{} frames still incomplete", self.building.len());
        }
    }
}

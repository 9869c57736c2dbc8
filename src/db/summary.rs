//! Hierarchical base-10 time index over event start times.
//!
//! The root starts at a configured granularity and grows upward by wrapping
//! itself in a 10x coarser node whenever an event lands outside it, so
//! existing leaves are never re-bucketed. Nodes split lazily into ten equal
//! children until they reach the finest granularity.

/// Aggregate over a span of time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryData {
    pub time_start: u64,
    pub time_end: u64,
    pub total_event_count: u64,
}

#[derive(Debug)]
pub struct SummaryNode {
    time_start: u64,
    time_end: u64,
    total_event_count: u64,
    children: Option<Box<[SummaryNode; 10]>>,
}

impl SummaryNode {
    fn new(time_start: u64, time_end: u64) -> Self {
        Self {
            time_start,
            time_end,
            total_event_count: 0,
            children: None,
        }
    }

    pub fn time_start(&self) -> u64 {
        self.time_start
    }

    pub fn time_end(&self) -> u64 {
        self.time_end
    }

    pub fn granularity(&self) -> u64 {
        self.time_end - self.time_start
    }

    pub fn total_event_count(&self) -> u64 {
        self.total_event_count
    }

    pub fn children(&self) -> Option<&[SummaryNode; 10]> {
        self.children.as_deref()
    }

    fn expand(&mut self, finest: u64) {
        if self.children.is_some() || self.granularity() <= finest {
            return;
        }
        let step = self.granularity() / 10;
        let start = self.time_start;
        self.children = Some(Box::new(std::array::from_fn(|n| {
            let t = start + step * n as u64;
            SummaryNode::new(t, t + step)
        })));
    }

    fn child_slot(&self, time: u64) -> usize {
        let step = self.granularity() / 10;
        (((time - self.time_start) / step) as usize).min(9)
    }

    fn insert(&mut self, time: u64, finest: u64) {
        self.total_event_count += 1;
        self.expand(finest);
        if self.children.is_some() {
            let slot = self.child_slot(time);
            if let Some(children) = self.children.as_mut() {
                children[slot].insert(time, finest);
            }
        }
    }

    fn remove(&mut self, time: u64) {
        self.total_event_count = self.total_event_count.saturating_sub(1);
        if self.children.is_some() {
            let slot = self.child_slot(time);
            if let Some(children) = self.children.as_mut() {
                children[slot].remove(time);
            }
        }
    }

    /// Report nodes intersecting `[start, end)`, descending only into nodes
    /// the range covers partially.
    fn walk_shallow_range<F: FnMut(&SummaryNode)>(&self, start: u64, end: u64, f: &mut F) {
        if end <= self.time_start || start >= self.time_end {
            return;
        }
        let covered = start <= self.time_start && end >= self.time_end;
        match &self.children {
            Some(children) if !covered => {
                for child in children.iter() {
                    child.walk_shallow_range(start, end, f);
                }
            }
            _ => f(self),
        }
    }
}

pub struct SummaryIndex {
    root: Option<SummaryNode>,
    root_granularity: u64,
    finest_granularity: u64,
    first_event_time: u64,
    last_event_time: u64,
    inserted_event_count: u64,
}

impl SummaryIndex {
    /// Both granularities are in microseconds and must be powers of ten with
    /// `finest <= root`.
    pub fn new(root_granularity: u64, finest_granularity: u64) -> Self {
        let finest_granularity = finest_granularity.max(1);
        Self {
            root: None,
            root_granularity: root_granularity.max(finest_granularity),
            finest_granularity,
            first_event_time: u64::MAX,
            last_event_time: 0,
            inserted_event_count: 0,
        }
    }

    pub fn root(&self) -> Option<&SummaryNode> {
        self.root.as_ref()
    }

    pub fn first_event_time(&self) -> u64 {
        if self.root.is_some() {
            self.first_event_time
        } else {
            0
        }
    }

    pub fn last_event_time(&self) -> u64 {
        self.last_event_time
    }

    pub fn len(&self) -> u64 {
        self.inserted_event_count
    }

    pub fn is_empty(&self) -> bool {
        self.inserted_event_count == 0
    }

    pub fn insert(&mut self, time: u64) {
        let root = match self.root.take() {
            Some(root) => Self::grow_to_include(root, time, self.finest_granularity),
            None => {
                let start = time - time % self.root_granularity;
                SummaryNode::new(start, start + self.root_granularity)
            }
        };
        let root = self.root.insert(root);
        root.insert(time, self.finest_granularity);

        self.first_event_time = self.first_event_time.min(time);
        self.last_event_time = self.last_event_time.max(time);
        self.inserted_event_count += 1;
    }

    /// First and last inserted times, for [`SummaryIndex::undo_inserts`].
    pub(crate) fn bounds(&self) -> (u64, u64) {
        (self.first_event_time, self.last_event_time)
    }

    /// Take back inserts of `times`, restoring the bounds recorded before
    /// them. Nodes grown or split for those inserts stay, with their counts
    /// back where they were.
    pub(crate) fn undo_inserts(&mut self, times: &[u64], bounds: (u64, u64)) {
        if let Some(root) = self.root.as_mut() {
            for &time in times {
                root.remove(time);
            }
        }
        self.inserted_event_count = self.inserted_event_count.saturating_sub(times.len() as u64);
        if self.inserted_event_count == 0 {
            self.root = None;
        }
        (self.first_event_time, self.last_event_time) = bounds;
    }

    fn grow_to_include(mut root: SummaryNode, time: u64, finest: u64) -> SummaryNode {
        while time < root.time_start || time >= root.time_end {
            let granularity = root.granularity() * 10;
            // The old root is aligned to a tenth of the new granularity, so
            // the aligned wrapper always contains it.
            let start = root.time_start - root.time_start % granularity;
            let mut wrapper = SummaryNode::new(start, start + granularity);
            wrapper.expand(finest);
            wrapper.total_event_count = root.total_event_count;
            let slot = wrapper.child_slot(root.time_start);
            if let Some(children) = wrapper.children.as_mut() {
                children[slot] = root;
            }
            tracing::debug!(
                "Summary index grew to [{}, {}) at granularity {}",
                wrapper.time_start,
                wrapper.time_end,
                granularity
            );
            root = wrapper;
        }
        root
    }

    /// Visit the shallowest nodes that together cover the intersection of
    /// `[start, end)` with the tree: fully covered nodes and leaves.
    pub fn walk_shallow_range<F: FnMut(&SummaryNode)>(&self, start: u64, end: u64, mut f: F) {
        if let Some(root) = &self.root {
            root.walk_shallow_range(start, end, &mut f);
        }
    }

    /// Events counted in nodes lying entirely inside `[start, end)`. Exact when
    /// both bounds fall on finest-granularity boundaries; otherwise an
    /// under-count of the events in the partially covered leaves.
    pub fn query_summary(&self, start: u64, end: u64) -> SummaryData {
        let mut data = SummaryData {
            time_start: u64::MAX,
            time_end: 0,
            total_event_count: 0,
        };
        self.walk_shallow_range(start, end, |node| {
            if node.time_start >= start && node.time_end <= end {
                data.time_start = data.time_start.min(node.time_start);
                data.time_end = data.time_end.max(node.time_end);
                data.total_event_count += node.total_event_count;
            }
        });
        if data.time_start == u64::MAX {
            data.time_start = 0;
            data.time_end = 0;
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_aligned_to_granularity() {
        let mut index = SummaryIndex::new(1_000_000, 1_000);
        index.insert(2_500_000);
        let root = index.root().unwrap();
        assert_eq!((root.time_start(), root.time_end()), (2_000_000, 3_000_000));
        assert_eq!(root.children().unwrap()[5].total_event_count(), 1);
    }

    #[test]
    fn test_grows_upward_and_keeps_counts() {
        let mut index = SummaryIndex::new(1_000, 10);
        index.insert(1_500);
        index.insert(1_600);
        index.insert(25_000);
        let root = index.root().unwrap();
        assert_eq!((root.time_start(), root.time_end()), (0, 100_000));
        assert_eq!(root.total_event_count(), 3);
        assert_eq!(index.query_summary(0, 100_000).total_event_count, 3);
        assert_eq!(index.query_summary(1_000, 2_000).total_event_count, 2);
        assert_eq!(index.first_event_time(), 1_500);
        assert_eq!(index.last_event_time(), 25_000);
    }

    #[test]
    fn test_grows_downward_in_time() {
        let mut index = SummaryIndex::new(1_000, 10);
        index.insert(10_500);
        index.insert(3_000);
        let root = index.root().unwrap();
        assert!(root.time_start() <= 3_000 && root.time_end() > 10_500);
        assert_eq!(index.query_summary(0, 1_000_000).total_event_count, 2);
    }

    #[test]
    fn test_undo_inserts_restores_counts() {
        let mut index = SummaryIndex::new(1_000, 10);
        index.insert(150);
        let bounds = index.bounds();
        index.insert(420);
        index.insert(25_000);
        index.undo_inserts(&[420, 25_000], bounds);
        assert_eq!(index.len(), 1);
        assert_eq!(index.query_summary(0, 1_000_000).total_event_count, 1);
        assert_eq!(index.query_summary(400, 500).total_event_count, 0);
        assert_eq!((index.first_event_time(), index.last_event_time()), (150, 150));

        index.undo_inserts(&[150], (u64::MAX, 0));
        assert!(index.root().is_none());
        assert_eq!(index.first_event_time(), 0);
    }

    #[test]
    fn test_leaves_stop_at_finest() {
        let mut index = SummaryIndex::new(1_000, 100);
        index.insert(150);
        let root = index.root().unwrap();
        let leaf = &root.children().unwrap()[1];
        assert_eq!(leaf.granularity(), 100);
        assert!(leaf.children().is_none());
    }

    #[test]
    fn test_partial_leaf_is_reported_by_walk_but_not_counted() {
        let mut index = SummaryIndex::new(1_000, 100);
        index.insert(150);
        index.insert(420);
        let mut visited = Vec::new();
        index.walk_shallow_range(120, 500, |n| visited.push((n.time_start(), n.time_end())));
        assert_eq!(visited, vec![(100, 200), (200, 300), (300, 400), (400, 500)]);
        assert_eq!(index.query_summary(120, 500).total_event_count, 1);
        assert_eq!(index.query_summary(100, 500).total_event_count, 2);
        assert_eq!(index.query_summary(5_000, 6_000), SummaryData::default());
    }
}

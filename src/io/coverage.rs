//! Bookkeeping of which byte ranges of a remote object are already local.

use std::ops::Range;

/// Closed byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
}

impl Interval {
    /// Returns `None` when `start > end`.
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset <= self.end
    }
}

/// What has to be downloaded to cover a requested interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    /// Uncovered sub-intervals of the request, ascending.
    pub gaps: Vec<Interval>,
    /// Indices of the entries that overlap or touch the request.
    pub overlap: Range<usize>,
    /// The single entry that replaces `overlap` once the gaps are fetched.
    pub merged: Interval,
}

/// Ordered set of non-overlapping, non-adjacent covered intervals.
///
/// Starts and ends live in two parallel ascending vectors so both can be
/// binary searched.
#[derive(Debug, Clone, Default)]
pub struct CoverageTracker {
    starts: Vec<u64>,
    ends: Vec<u64>,
}

impl CoverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn intervals(&self) -> impl Iterator<Item = Interval> + '_ {
        self.starts
            .iter()
            .zip(&self.ends)
            .map(|(&start, &end)| Interval { start, end })
    }

    /// Whether every byte of `interval` is already covered.
    pub fn covers(&self, interval: Interval) -> bool {
        let idx = self.ends.partition_point(|&end| end < interval.start);
        idx < self.starts.len() && self.starts[idx] <= interval.start && interval.end <= self.ends[idx]
    }

    /// Compute the gaps of `requested` and the entries a commit would merge.
    pub fn plan_fetch(&self, requested: Interval) -> FetchPlan {
        // Entries ending right before the request touch it and are merged too.
        let left = self
            .ends
            .partition_point(|&end| end.saturating_add(1) < requested.start);
        let right = self
            .starts
            .partition_point(|&start| start <= requested.end.saturating_add(1));
        let right = right.max(left);

        let starts = &self.starts[left..right];
        let ends = &self.ends[left..right];

        let merged_start = starts.first().map_or(requested.start, |&s| s.min(requested.start));
        let merged_end = ends.last().map_or(requested.end, |&e| e.max(requested.end));

        let mut gaps = Vec::new();
        let mut cursor = requested.start;
        let mut exhausted = false;
        for (&start, &end) in starts.iter().zip(ends) {
            if start > cursor {
                gaps.push(Interval {
                    start: cursor,
                    end: start - 1,
                });
            }
            if end >= requested.end {
                exhausted = true;
                break;
            }
            cursor = cursor.max(end + 1);
        }
        if !exhausted && cursor <= requested.end {
            gaps.push(Interval {
                start: cursor,
                end: requested.end,
            });
        }

        FetchPlan {
            gaps,
            overlap: left..right,
            merged: Interval {
                start: merged_start,
                end: merged_end,
            },
        }
    }

    /// Replace the overlapping entries of `plan` with its merged entry.
    pub fn commit(&mut self, plan: &FetchPlan) {
        let FetchPlan { overlap, merged, .. } = plan;
        self.starts
            .splice(overlap.clone(), std::iter::once(merged.start));
        self.ends.splice(overlap.clone(), std::iter::once(merged.end));
    }

    /// Mark `interval` as covered without fetching anything.
    pub fn insert(&mut self, interval: Interval) {
        let plan = self.plan_fetch(interval);
        self.commit(&plan);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn iv(start: u64, end: u64) -> Interval {
        Interval::new(start, end).unwrap()
    }

    fn entries(tracker: &CoverageTracker) -> Vec<(u64, u64)> {
        tracker.intervals().map(|i| (i.start, i.end)).collect()
    }

    #[test]
    fn empty_tracker_fetches_everything() {
        let tracker = CoverageTracker::new();
        let plan = tracker.plan_fetch(iv(10, 20));
        assert_eq!(plan.gaps, vec![iv(10, 20)]);
        assert_eq!(plan.overlap, 0..0);
        assert_eq!(plan.merged, iv(10, 20));
    }

    #[test]
    fn covered_request_has_no_gaps() {
        let mut tracker = CoverageTracker::new();
        tracker.insert(iv(0, 99));
        let plan = tracker.plan_fetch(iv(10, 20));
        assert!(plan.gaps.is_empty());
        assert_eq!(plan.merged, iv(0, 99));
        assert!(tracker.covers(iv(10, 20)));
    }

    #[test]
    fn partial_overlap_only_fetches_missing_bytes() {
        let mut tracker = CoverageTracker::new();
        tracker.insert(iv(10, 19));
        tracker.insert(iv(30, 39));

        let plan = tracker.plan_fetch(iv(5, 45));
        assert_eq!(plan.gaps, vec![iv(5, 9), iv(20, 29), iv(40, 45)]);
        assert_eq!(plan.overlap, 0..2);

        tracker.commit(&plan);
        assert_eq!(entries(&tracker), vec![(5, 45)]);
    }

    #[test]
    fn request_inside_hole_between_entries() {
        let mut tracker = CoverageTracker::new();
        tracker.insert(iv(0, 9));
        tracker.insert(iv(50, 59));

        let plan = tracker.plan_fetch(iv(20, 30));
        assert_eq!(plan.gaps, vec![iv(20, 30)]);
        assert_eq!(plan.overlap, 1..1);

        tracker.commit(&plan);
        assert_eq!(entries(&tracker), vec![(0, 9), (20, 30), (50, 59)]);
    }

    #[test]
    fn adjacent_entries_are_merged() {
        let mut tracker = CoverageTracker::new();
        tracker.insert(iv(0, 9));
        tracker.insert(iv(20, 29));
        tracker.insert(iv(10, 19));
        assert_eq!(entries(&tracker), vec![(0, 29)]);
    }

    #[test]
    fn request_ending_inside_entry() {
        let mut tracker = CoverageTracker::new();
        tracker.insert(iv(100, 199));

        let plan = tracker.plan_fetch(iv(50, 150));
        assert_eq!(plan.gaps, vec![iv(50, 99)]);
        tracker.commit(&plan);
        assert_eq!(entries(&tracker), vec![(50, 199)]);
    }

    #[test]
    fn mixed_requests_fetch_each_byte_once() {
        let requests = [
            (40, 60),
            (0, 5),
            (55, 80),
            (7, 7),
            (6, 6),
            (3, 45),
            (90, 95),
            (81, 89),
            (0, 100),
        ];
        let mut tracker = CoverageTracker::new();
        let mut fetched = vec![0u32; 101];

        for (start, end) in requests {
            let plan = tracker.plan_fetch(iv(start, end));
            for gap in &plan.gaps {
                for b in gap.start..=gap.end {
                    fetched[b as usize] += 1;
                }
            }
            tracker.commit(&plan);
        }

        assert!(fetched.iter().all(|&count| count == 1));
        assert_eq!(entries(&tracker), vec![(0, 100)]);
    }

    const SPACE: u64 = 256;

    proptest! {
        /// Bytes are tracked individually and compared with the tracker after
        /// every commit.
        #[test]
        fn gaps_plus_coverage_equal_requests(
            requests in prop::collection::vec((0..SPACE - 40, 0u64..40), 1..40)
        ) {
            let mut tracker = CoverageTracker::new();
            let mut fetched = vec![0u32; SPACE as usize];
            let mut requested = vec![false; SPACE as usize];

            for (start, len) in requests {
                let end = start + len;
                let plan = tracker.plan_fetch(iv(start, end));

                let mut in_gap = vec![false; SPACE as usize];
                for (i, gap) in plan.gaps.iter().enumerate() {
                    prop_assert!(start <= gap.start && gap.end <= end);
                    if i > 0 {
                        prop_assert!(plan.gaps[i - 1].end < gap.start);
                    }
                    for b in gap.start..=gap.end {
                        in_gap[b as usize] = true;
                        fetched[b as usize] += 1;
                    }
                }
                // Every requested byte is either already covered or in a gap.
                for b in start..=end {
                    prop_assert_ne!(tracker.covers(iv(b, b)), in_gap[b as usize]);
                }

                tracker.commit(&plan);
                requested[start as usize..=end as usize].fill(true);

                let list = entries(&tracker);
                for pair in list.windows(2) {
                    prop_assert!(pair[0].1 + 1 < pair[1].0, "entries overlap or touch: {:?}", list);
                }
                for b in 0..SPACE {
                    prop_assert_eq!(tracker.covers(iv(b, b)), requested[b as usize]);
                }
            }

            for b in 0..SPACE as usize {
                prop_assert_eq!(fetched[b], u32::from(requested[b]));
            }
        }
    }
}

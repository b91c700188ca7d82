use crate::model::{Ms, TimeRange};

/// Ordered set of non-overlapping time ranges. Touching ranges are merged,
/// so for all i: `ranges[i].end < ranges[i+1].start`.
///
/// Construction goes through `normalize`; the set operations preserve the
/// invariant without re-sorting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    ranges: Vec<TimeRange>,
}

impl IntervalSet {
    pub fn empty() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Sort by start and merge overlapping/touching ranges. O(n log n).
    pub fn normalize(mut raw: Vec<TimeRange>) -> Self {
        raw.sort_by_key(|r| r.start);
        let mut merged: Vec<TimeRange> = Vec::with_capacity(raw.len());
        for range in raw {
            if let Some(last) = merged.last_mut()
                && range.start <= last.end {
                    last.end = last.end.max(range.end);
                    continue;
                }
            merged.push(range);
        }
        Self { ranges: merged }
    }

    pub fn ranges(&self) -> &[TimeRange] {
        &self.ranges
    }

    pub fn into_ranges(self) -> Vec<TimeRange> {
        self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total covered time.
    pub fn total_ms(&self) -> Ms {
        self.ranges.iter().map(|r| r.duration_ms()).sum()
    }

    /// Time in `self` not covered by `other`. Single synchronized sweep,
    /// O(|self| + |other|).
    pub fn subtract(&self, other: &IntervalSet) -> IntervalSet {
        let to_remove = &other.ranges;
        let mut result = Vec::new();
        let mut ri = 0;

        for &b in &self.ranges {
            let mut current_start = b.start;
            let current_end = b.end;

            while ri < to_remove.len() && to_remove[ri].end <= current_start {
                ri += 1;
            }

            let mut j = ri;
            while j < to_remove.len() && to_remove[j].start < current_end {
                let r = &to_remove[j];
                if r.start > current_start {
                    result.push(TimeRange::new(current_start, r.start));
                }
                current_start = current_start.max(r.end);
                j += 1;
            }

            if current_start < current_end {
                result.push(TimeRange::new(current_start, current_end));
            }
        }

        IntervalSet { ranges: result }
    }

    /// Overlap of `self` and `other`, same sweep technique.
    pub fn intersect(&self, other: &IntervalSet) -> IntervalSet {
        let a = &self.ranges;
        let b = &other.ranges;
        let mut result = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < a.len() && j < b.len() {
            let start = a[i].start.max(b[j].start);
            let end = a[i].end.min(b[j].end);
            if start < end {
                result.push(TimeRange::new(start, end));
            }
            // Advance whichever range ends first.
            if a[i].end <= b[j].end {
                i += 1;
            } else {
                j += 1;
            }
        }

        IntervalSet { ranges: result }
    }

    /// The range of this set that fully contains `needle`, if any. Since the
    /// set is disjoint, only the last range starting at or before
    /// `needle.start` can qualify.
    pub fn containing(&self, needle: &TimeRange) -> Option<&TimeRange> {
        let idx = self.ranges.partition_point(|r| r.start <= needle.start);
        if idx == 0 {
            return None;
        }
        let candidate = &self.ranges[idx - 1];
        if candidate.contains_range(needle) {
            Some(candidate)
        } else {
            None
        }
    }
}

impl From<Vec<TimeRange>> for IntervalSet {
    fn from(raw: Vec<TimeRange>) -> Self {
        Self::normalize(raw)
    }
}

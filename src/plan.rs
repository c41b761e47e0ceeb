use std::num::NonZeroUsize;

use crate::domain::RecordIdentifierSet;

// Half-open: [start, end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: usize,
    pub end: usize,
}

impl ChunkRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn bounds(&self, ids: &RecordIdentifierSet) -> Option<(i64, i64)> {
        let slice = ids.ids().get(self.start..self.end)?;
        Some((*slice.first()?, *slice.last()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPlan {
    Ranges(Vec<ChunkRange>),
    Rejected { chunks: usize, threshold: usize },
}

pub fn chunk_count(len: usize, chunk_size: NonZeroUsize) -> usize {
    len.div_ceil(chunk_size.get())
}

pub fn plan_chunks(
    len: usize,
    chunk_size: NonZeroUsize,
    threshold: usize,
    force: bool,
) -> ChunkPlan {
    let chunks = chunk_count(len, chunk_size);
    if chunks > threshold && !force {
        return ChunkPlan::Rejected { chunks, threshold };
    }
    let size = chunk_size.get();
    let ranges = (0..chunks)
        .map(|index| {
            let start = index * size;
            ChunkRange {
                start,
                end: (start + size).min(len),
            }
        })
        .collect();
    ChunkPlan::Ranges(ranges)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn size(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).unwrap()
    }

    fn ranges(len: usize, chunk: usize) -> Vec<ChunkRange> {
        match plan_chunks(len, size(chunk), usize::MAX, false) {
            ChunkPlan::Ranges(ranges) => ranges,
            ChunkPlan::Rejected { .. } => panic!("unexpected rejection"),
        }
    }

    #[test]
    fn empty_set_has_no_chunks() {
        assert!(ranges(0, 500).is_empty());
    }

    #[test]
    fn exact_and_remainder_boundaries() {
        assert_eq!(ranges(500, 500), vec![ChunkRange { start: 0, end: 500 }]);
        assert_eq!(
            ranges(501, 500),
            vec![
                ChunkRange { start: 0, end: 500 },
                ChunkRange { start: 500, end: 501 }
            ]
        );
    }

    #[test]
    fn ranges_partition_every_index_once() {
        for len in [1, 2, 7, 99, 100, 101, 1234] {
            for chunk in [1, 3, 10, 100, 5000] {
                let plan = ranges(len, chunk);
                assert_eq!(plan.len(), chunk_count(len, size(chunk)));
                let mut next = 0;
                for range in &plan {
                    assert_eq!(range.start, next);
                    assert!(!range.is_empty() && range.len() <= chunk);
                    next = range.end;
                }
                assert_eq!(next, len);
            }
        }
    }

    #[test]
    fn threshold_gate() {
        assert_matches!(
            plan_chunks(5001, size(500), 10, false),
            ChunkPlan::Rejected { chunks: 11, threshold: 10 }
        );
        assert_matches!(plan_chunks(5000, size(500), 10, false), ChunkPlan::Ranges(r) if r.len() == 10);
        assert_matches!(plan_chunks(5001, size(500), 10, true), ChunkPlan::Ranges(r) if r.len() == 11);
        assert_matches!(plan_chunks(10, size(1), 0, true), ChunkPlan::Ranges(r) if r.len() == 10);
    }

    #[test]
    fn planning_is_deterministic() {
        assert_eq!(
            plan_chunks(777, size(50), 100, false),
            plan_chunks(777, size(50), 100, false)
        );
    }

    #[test]
    fn bounds_use_identifier_values() {
        let ids = RecordIdentifierSet::new("OBJECTID", vec![40, 10, 30, 20, 50]);
        let plan = ranges(ids.len(), 2);
        let bounds = plan
            .iter()
            .map(|range| range.bounds(&ids).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(bounds, vec![(10, 20), (30, 40), (50, 50)]);
    }
}

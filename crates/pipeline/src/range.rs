use serde::{Deserialize, Serialize};

use cpq_common::RangeId;

/// One contiguous key-space slice served by a backend partition at a point in
/// time. Bounds are min-inclusive / max-exclusive over the effective
/// partition-key order; ranges sort by their min bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRange {
    pub id: RangeId,
    pub min_inclusive: String,
    pub max_exclusive: String,
}

impl PartitionRange {
    pub fn new(
        id: impl Into<String>,
        min_inclusive: impl Into<String>,
        max_exclusive: impl Into<String>,
    ) -> Self {
        Self {
            id: RangeId(id.into()),
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
        }
    }

    /// Whether `children`, sorted by min bound, exactly tile this range with
    /// no gaps or overlaps. Split handling rejects child sets that do not.
    pub fn children_cover(&self, children: &[PartitionRange]) -> bool {
        if children.is_empty() {
            return false;
        }
        let mut sorted: Vec<&PartitionRange> = children.iter().collect();
        sorted.sort_by(|a, b| a.min_inclusive.cmp(&b.min_inclusive));
        if sorted[0].min_inclusive != self.min_inclusive {
            return false;
        }
        for pair in sorted.windows(2) {
            if pair[0].max_exclusive != pair[1].min_inclusive {
                return false;
            }
        }
        sorted[sorted.len() - 1].max_exclusive == self.max_exclusive
    }
}

//! Range Planner
//!
//! Normalizes a requested (start, count, end) triple into an inclusive
//! [`NodeRange`]. The count is authoritative; an explicit end beyond
//! `start + count - 1` is advisory and gets clamped with a warning.

use crate::config::MAX_NODE_COUNT;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// Node Range
// =============================================================================

/// Inclusive range of node indices, `end >= start >= 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRange {
    start: u32,
    end: u32,
}

impl NodeRange {
    /// Build a range, rejecting empty ones
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start == 0 {
            return Err(Error::Configuration("node indices start at 1".into()));
        }
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of nodes, `end - start + 1`
    pub fn count(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Zero-padding width shared by every identity in this range
    pub fn width(&self) -> usize {
        crate::fleet::naming::padding_width(self.end)
    }

    /// Indices in ascending order
    pub fn indices(&self) -> std::ops::RangeInclusive<u32> {
        self.start..=self.end
    }

    pub fn contains(&self, index: u32) -> bool {
        (self.start..=self.end).contains(&index)
    }
}

impl std::fmt::Display for NodeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// =============================================================================
// Planning
// =============================================================================

/// Adjustment applied while resolving a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeAdjustment {
    /// Count above [`MAX_NODE_COUNT`] was lowered
    CountClamped { requested: u32, applied: u32 },
    /// Explicit end exceeded what the count allows
    EndClamped { requested: u32, applied: u32 },
}

impl std::fmt::Display for RangeAdjustment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeAdjustment::CountClamped { requested, applied } => {
                write!(f, "count {} exceeds limit, using {}", requested, applied)
            }
            RangeAdjustment::EndClamped { requested, applied } => {
                write!(f, "end {} exceeds node count, limiting to {}", requested, applied)
            }
        }
    }
}

/// Resolved range plus the adjustments it took to get there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRange {
    pub range: NodeRange,
    pub adjustments: Vec<RangeAdjustment>,
}

/// Resolve a request into a concrete range
pub fn plan(start: u32, count: u32, end: Option<u32>) -> Result<NodeRange> {
    plan_detailed(start, count, end).map(|planned| planned.range)
}

/// Resolve a request, reporting every clamp that was applied
pub fn plan_detailed(start: u32, count: u32, end: Option<u32>) -> Result<PlannedRange> {
    if start == 0 {
        return Err(Error::Configuration("start index must be at least 1".into()));
    }

    let mut adjustments = Vec::new();

    let applied_count = count.min(MAX_NODE_COUNT);
    if applied_count != count {
        let adjustment = RangeAdjustment::CountClamped {
            requested: count,
            applied: applied_count,
        };
        warn!("{}", adjustment);
        adjustments.push(adjustment);
    }

    // start >= 1, so the bound never underflows; it can overflow u32
    let bound = u64::from(start) + u64::from(applied_count) - 1;
    let bound = u32::try_from(bound).map_err(|_| {
        Error::Configuration(format!(
            "range starting at {} with {} nodes overflows the index space",
            start, applied_count
        ))
    })?;

    let resolved_end = match end {
        None => bound,
        Some(requested) if requested > bound => {
            let adjustment = RangeAdjustment::EndClamped {
                requested,
                applied: bound,
            };
            warn!("{}", adjustment);
            adjustments.push(adjustment);
            bound
        }
        Some(requested) => requested,
    };

    let range = NodeRange::new(start, resolved_end)?;
    Ok(PlannedRange { range, adjustments })
}

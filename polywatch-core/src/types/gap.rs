use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::worker::WorkerId;

/// The data kind a registered gap refers to.
///
/// The discriminant order is the Gapfiller's fixed drain priority.
#[derive(
    Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, IntoStaticStr, PartialEq,
)]
#[strum(serialize_all = "snake_case")]
pub enum GapKind {
    /// Missing block heights.
    Block,
    /// Missing milestone sequence numbers.
    Milestone,
    /// Blocks present in the store but not yet stamped with finality.
    Finality,
    /// Blocks stored without receipt-derived priority-fee stats.
    PriorityFee,
}

/// Lifecycle state of a registered gap.
#[derive(
    Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, IntoStaticStr, PartialEq,
)]
#[strum(serialize_all = "snake_case")]
pub enum GapStatus {
    /// Registered, not yet claimed by a Gapfiller.
    Pending,
    /// Claimed by exactly one Gapfiller; its range shrinks as batches land.
    Filling,
    /// Fully drained (`start > end`).
    Filled,
}

/// A registered missing range, inclusive on both ends.
#[derive(Clone, Debug, PartialEq)]
pub struct Gap {
    /// Database id, the claim key.
    pub id: i64,
    /// What the range counts: block heights or milestone sequence numbers.
    pub kind: GapKind,
    /// First missing identity.
    pub start: u64,
    /// Last missing identity, inclusive.
    pub end: u64,
    /// Worker that detected and registered the gap.
    pub source: WorkerId,
    /// Lifecycle state.
    pub status: GapStatus,
}

impl Gap {
    /// Number of identities the gap still covers.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start) + 1
    }

    /// True once the range has been drained past empty.
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

/// Aggregate view over the gap registry for one kind, for observability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GapStats {
    /// Number of pending gaps.
    pub pending_count: u64,
    /// Total identities covered by pending gaps.
    pub pending_size: u64,
    /// Number of gaps currently claimed.
    pub filling_count: u64,
}

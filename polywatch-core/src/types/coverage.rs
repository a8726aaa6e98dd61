use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// The data kinds for which dense coverage is tracked.
#[derive(
    Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, IntoStaticStr, PartialEq,
)]
#[strum(serialize_all = "snake_case")]
pub enum CoverageKind {
    /// Block heights.
    Blocks,
    /// Milestone sequence numbers.
    Milestones,
}

/// The `[low, high]` range known to be fully dense for a data kind.
///
/// Both marks are monotonic: the low mark only ever decreases (backfill
/// extends history) and the high mark only ever increases, merged in the
/// store with `LEAST`/`GREATEST` so concurrent writers cannot regress them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Coverage {
    /// Which identity space the marks describe.
    pub kind: CoverageKind,
    /// Lowest identity known densely covered.
    pub low_water_mark: u64,
    /// Highest identity known densely covered.
    pub high_water_mark: u64,
}

use primitive_types::H256;
use strum_macros::{Display, EnumString, IntoStaticStr};

/// Why a stored block was judged orphaned.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum ReorgReason {
    /// An accepted child carried a parent hash that does not match the
    /// stored hash at its parent height.
    ParentHashMismatch,
    /// The canonical chain returned a different hash at this height during
    /// the walk back from a detected divergence.
    CanonicalMismatch,
}

/// Append-only audit entry for one orphaned block.
#[derive(Clone, Debug, PartialEq)]
pub struct ReorgRecord {
    /// Height of the orphaned block.
    pub block_number: u64,
    /// The hash that was stored and is now orphaned.
    pub old_hash: H256,
    /// The orphaned block's own timestamp, unix seconds.
    pub timestamp: u64,
    /// Detection reason.
    pub reason: ReorgReason,
    /// Canonical replacement hash, once known.
    pub replaced_by_hash: Option<H256>,
}

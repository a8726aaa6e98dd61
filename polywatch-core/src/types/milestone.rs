use std::ops::RangeInclusive;

use primitive_types::H256;

/// One finality attestation covering a contiguous inclusive block range.
#[derive(Clone, Debug, PartialEq)]
pub struct Milestone {
    /// Monotonically increasing attestation sequence number; the identity.
    pub sequence_id: u64,
    /// Chain-level milestone identifier.
    pub milestone_id: String,
    /// First block finalized by this attestation.
    pub start_block: u64,
    /// Last block finalized by this attestation, inclusive.
    pub end_block: u64,
    /// Attestation hash.
    pub hash: H256,
    /// Address of the proposer.
    pub proposer: String,
    /// Attestation timestamp, unix seconds.
    pub timestamp: u64,
}

impl Milestone {
    /// The inclusive block range this attestation finalizes.
    pub fn block_range(&self) -> RangeInclusive<u64> {
        self.start_block..=self.end_block
    }

    /// Number of blocks covered.
    pub fn block_count(&self) -> u64 {
        self.end_block.saturating_sub(self.start_block) + 1
    }

    /// Whether this milestone's range is contiguous with `prev`'s.
    ///
    /// Under normal operation `prev.end_block + 1 == self.start_block`;
    /// anything else means a block range was skipped and the uncovered span
    /// needs a finality gap.
    pub fn follows(&self, prev: &Milestone) -> bool {
        prev.end_block + 1 == self.start_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn milestone(seq: u64, start: u64, end: u64) -> Milestone {
        Milestone {
            sequence_id: seq,
            milestone_id: format!("m-{seq}"),
            start_block: start,
            end_block: end,
            hash: H256::from_low_u64_be(seq),
            proposer: "0x00".into(),
            timestamp: 1_700_000_000 + seq,
        }
    }

    #[test]
    fn contiguity() {
        let a = milestone(1, 100, 110);
        let b = milestone(2, 111, 120);
        let c = milestone(3, 125, 130);
        assert!(b.follows(&a));
        assert!(!c.follows(&b));
        assert_eq!(a.block_count(), 11);
    }
}

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;
use auto_impl::auto_impl;

use crate::{BlockInfo, ClientResult, Milestone, ReceiptInfo};

/// Outcome of a batched upstream fetch.
///
/// Per-item failures do not fail the batch: missing keys land in `failed`
/// and the caller retries only those, so one flaky item cannot stall an
/// entire range.
#[derive(Clone, Debug)]
pub struct BatchResult<K: Eq + Hash, V> {
    /// Items that were fetched.
    pub succeeded: HashMap<K, V>,
    /// Keys that failed and should be retried.
    pub failed: Vec<K>,
}

impl<K: Eq + Hash, V> Default for BatchResult<K, V> {
    fn default() -> Self {
        Self {
            succeeded: HashMap::new(),
            failed: Vec::new(),
        }
    }
}

impl<K: Eq + Hash, V> BatchResult<K, V> {
    /// Fold per-key results into a batch result.
    pub fn from_results(results: impl IntoIterator<Item = (K, ClientResult<V>)>) -> Self {
        let mut out = Self::default();
        for (key, res) in results {
            match res {
                Ok(v) => {
                    out.succeeded.insert(key, v);
                }
                Err(_) => out.failed.push(key),
            }
        }
        out
    }

    /// Whether every requested item was fetched.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Absorb a retry pass: successes replace earlier failures.
    pub fn merge(&mut self, other: BatchResult<K, V>) {
        self.succeeded.extend(other.succeeded);
        self.failed = other.failed;
    }
}

/// Read access to the execution chain.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait ChainClient: Send + Sync + Debug {
    /// Current head height.
    async fn latest_block_number(&self) -> ClientResult<u64>;

    /// Fetch one block with its transactions.
    async fn get_block(&self, number: u64) -> ClientResult<BlockInfo>;

    /// Fetch a set of blocks; partial failure is reported per key.
    async fn get_blocks(&self, numbers: &[u64]) -> ClientResult<BatchResult<u64, BlockInfo>>;

    /// Fetch the receipts of one block.
    async fn get_block_receipts(&self, number: u64) -> ClientResult<Vec<ReceiptInfo>>;

    /// Fetch receipts for a set of blocks; partial failure per key.
    async fn get_blocks_receipts(
        &self,
        numbers: &[u64],
    ) -> ClientResult<BatchResult<u64, Vec<ReceiptInfo>>>;
}

/// Read access to the finality-attestation stream.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait MilestoneClient: Send + Sync + Debug {
    /// Most recent attestation.
    async fn latest_milestone(&self) -> ClientResult<Milestone>;

    /// Fetch one attestation by sequence number.
    async fn get_milestone(&self, sequence_id: u64) -> ClientResult<Milestone>;

    /// Fetch a set of attestations; partial failure per key.
    async fn get_milestones(&self, ids: &[u64]) -> ClientResult<BatchResult<u64, Milestone>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientError;

    #[test]
    fn batch_result_folds_and_merges() {
        let mut batch = BatchResult::from_results(vec![
            (1u64, Ok("a")),
            (2, Err(ClientError::AllEndpointsExhausted)),
            (3, Ok("c")),
        ]);
        assert!(!batch.is_complete());
        assert_eq!(batch.failed, vec![2]);

        let retry = BatchResult::from_results(vec![(2u64, Ok("b"))]);
        batch.merge(retry);
        assert!(batch.is_complete());
        assert_eq!(batch.succeeded.len(), 3);
    }
}

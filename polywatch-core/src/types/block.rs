use primitive_types::H256;

/// Priority-fee statistics for one block, in gwei.
///
/// `min`/`max`/`median` are computable from the block's transactions alone.
/// `avg`/`total` require the effective fees from receipts and stay `None`
/// until receipt enrichment has run; a `None` pair marks the row as pending
/// enrichment.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FeeStats {
    /// Smallest priority fee paid in the block.
    pub min_priority_fee_gwei: f64,
    /// Largest priority fee paid in the block.
    pub max_priority_fee_gwei: f64,
    /// Median priority fee paid in the block.
    pub median_priority_fee_gwei: f64,
    /// Mean effective priority fee, receipts only.
    pub avg_priority_fee_gwei: Option<f64>,
    /// Sum of effective priority fees, receipts only.
    pub total_priority_fees_gwei: Option<f64>,
}

impl FeeStats {
    /// Whether receipt enrichment has completed for this block.
    pub fn is_enriched(&self) -> bool {
        self.avg_priority_fee_gwei.is_some() && self.total_priority_fees_gwei.is_some()
    }
}

/// One block as fetched from the chain and (optionally) enriched.
///
/// The derived throughput fields need the previous block's timestamp and are
/// `None` when no predecessor is known.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockInfo {
    /// Block height; the natural identity of the row.
    pub number: u64,
    /// Block hash.
    pub hash: H256,
    /// Hash of the parent block, used for reorg detection.
    pub parent_hash: H256,
    /// Block timestamp, unix seconds.
    pub timestamp: u64,
    /// Gas used by all transactions in the block.
    pub gas_used: u64,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Base fee in gwei.
    pub base_fee_gwei: f64,
    /// Number of transactions.
    pub tx_count: u32,
    /// Priority-fee statistics.
    pub fees: FeeStats,
    /// Seconds since the previous block.
    pub block_time_sec: Option<f64>,
    /// Megagas per second over the block interval.
    pub mgas_per_sec: Option<f64>,
    /// Transactions per second over the block interval.
    pub tps: Option<f64>,
}

/// The per-transaction receipt data needed for fee enrichment.
///
/// The priority fee is the effective gas price minus the block's base fee;
/// the subtraction happens during enrichment where both are at hand.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceiptInfo {
    /// Transaction hash.
    pub tx_hash: H256,
    /// Gas used by the transaction.
    pub gas_used: u64,
    /// Effective gas price actually paid, gwei.
    pub effective_gas_price_gwei: f64,
}

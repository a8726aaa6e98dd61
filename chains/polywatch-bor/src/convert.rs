//! Wire shapes and conversions into the core domain types.

use serde::Deserialize;

use polywatch_core::{hex_to_h256, BlockInfo, ClientError, ClientResult, FeeStats, ReceiptInfo};

pub(crate) const GWEI: f64 = 1e9;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcBlock {
    pub number: String,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: String,
    pub gas_used: String,
    pub gas_limit: String,
    #[serde(default)]
    pub base_fee_per_gas: Option<String>,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcTransaction {
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcReceipt {
    pub transaction_hash: String,
    pub gas_used: String,
    #[serde(default)]
    pub effective_gas_price: Option<String>,
}

/// Parse a `0x`-prefixed hex quantity.
pub(crate) fn parse_quantity(raw: &str) -> Option<u128> {
    u128::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
}

pub(crate) fn wei_to_gwei(wei: u128) -> f64 {
    wei as f64 / GWEI
}

fn quantity(raw: &str, url: &str, what: &str) -> ClientResult<u128> {
    parse_quantity(raw)
        .ok_or_else(|| ClientError::invalid_response(url, format!("bad {what} quantity: {raw}")))
}

fn hash(raw: &str, url: &str, what: &str) -> ClientResult<polywatch_core::H256> {
    hex_to_h256(raw).ok_or_else(|| ClientError::invalid_response(url, format!("bad {what}: {raw}")))
}

/// Convert a wire block into [`BlockInfo`].
///
/// Fee stats computable from the transactions alone are filled in; the
/// receipt-derived avg/total pair stays `None` until enrichment.
pub(crate) fn block_from_wire(raw: RpcBlock, url: &str) -> ClientResult<BlockInfo> {
    let base_fee_wei = match &raw.base_fee_per_gas {
        Some(q) => quantity(q, url, "baseFeePerGas")?,
        None => 0,
    };

    let mut priority_fees: Vec<f64> = raw
        .transactions
        .iter()
        .filter_map(|tx| priority_fee_wei(tx, base_fee_wei))
        .map(wei_to_gwei)
        .collect();
    priority_fees.sort_by(|a, b| a.total_cmp(b));

    let fees = FeeStats {
        min_priority_fee_gwei: priority_fees.first().copied().unwrap_or(0.0),
        max_priority_fee_gwei: priority_fees.last().copied().unwrap_or(0.0),
        median_priority_fee_gwei: median(&priority_fees),
        avg_priority_fee_gwei: None,
        total_priority_fees_gwei: None,
    };

    Ok(BlockInfo {
        number: quantity(&raw.number, url, "number")? as u64,
        hash: hash(&raw.hash, url, "hash")?,
        parent_hash: hash(&raw.parent_hash, url, "parentHash")?,
        timestamp: quantity(&raw.timestamp, url, "timestamp")? as u64,
        gas_used: quantity(&raw.gas_used, url, "gasUsed")? as u64,
        gas_limit: quantity(&raw.gas_limit, url, "gasLimit")? as u64,
        base_fee_gwei: wei_to_gwei(base_fee_wei),
        tx_count: raw.transactions.len() as u32,
        fees,
        block_time_sec: None,
        mgas_per_sec: None,
        tps: None,
    })
}

/// The tip a transaction offers: its explicit priority fee, or for legacy
/// transactions the gas price above the base fee.
fn priority_fee_wei(tx: &RpcTransaction, base_fee_wei: u128) -> Option<u128> {
    if let Some(tip) = tx.max_priority_fee_per_gas.as_deref() {
        return parse_quantity(tip);
    }
    let gas_price = parse_quantity(tx.gas_price.as_deref()?)?;
    Some(gas_price.saturating_sub(base_fee_wei))
}

/// Median of an already sorted slice.
pub(crate) fn median(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub(crate) fn receipt_from_wire(raw: RpcReceipt, url: &str) -> ClientResult<ReceiptInfo> {
    let effective_gas_price_wei = match &raw.effective_gas_price {
        Some(q) => quantity(q, url, "effectiveGasPrice")?,
        None => 0,
    };
    Ok(ReceiptInfo {
        tx_hash: hash(&raw.transaction_hash, url, "transactionHash")?,
        gas_used: quantity(&raw.gas_used, url, "gasUsed")? as u64,
        effective_gas_price_gwei: wei_to_gwei(effective_gas_price_wei),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quantities() {
        assert_eq!(parse_quantity("0x0"), Some(0));
        assert_eq!(parse_quantity("0x2a"), Some(42));
        assert_eq!(parse_quantity("2a"), Some(42));
        assert_eq!(parse_quantity("0xzz"), None);
    }

    #[test]
    fn converts_a_block_with_legacy_and_typed_txs() {
        let raw: RpcBlock = serde_json::from_value(serde_json::json!({
            "number": "0x3e8",
            "hash": format!("0x{}", "11".repeat(32)),
            "parentHash": format!("0x{}", "22".repeat(32)),
            "timestamp": "0x64000000",
            "gasUsed": "0x5208",
            "gasLimit": "0x1c9c380",
            "baseFeePerGas": "0x3b9aca00", // 1 gwei
            "transactions": [
                // typed tx tipping 2 gwei
                { "maxPriorityFeePerGas": "0x77359400" },
                // legacy tx paying 4 gwei gas price, 3 gwei above base
                { "gasPrice": "0xee6b2800" },
            ],
        }))
        .unwrap();

        let block = block_from_wire(raw, "http://test").unwrap();
        assert_eq!(block.number, 1000);
        assert_eq!(block.tx_count, 2);
        assert_eq!(block.base_fee_gwei, 1.0);
        assert_eq!(block.fees.min_priority_fee_gwei, 2.0);
        assert_eq!(block.fees.max_priority_fee_gwei, 3.0);
        assert_eq!(block.fees.median_priority_fee_gwei, 2.5);
        assert!(block.fees.avg_priority_fee_gwei.is_none());
        assert!(block.block_time_sec.is_none());
    }

    #[test]
    fn median_handles_odd_even_empty() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[3.0]), 3.0);
        assert_eq!(median(&[1.0, 2.0, 4.0]), 2.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }
}

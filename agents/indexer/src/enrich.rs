//! Pure planning and enrichment math shared by the workers. Everything here
//! is side-effect free so it can be unit tested without a database or an
//! endpoint.

use std::collections::HashSet;

use polywatch_core::{BlockInfo, FeeStats, ReceiptInfo, ReorgReason, ReorgRecord, H256};

/// What the live loop should do about the distance between its cursor and
/// the observed head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CatchUpPlan {
    /// Cursor is at or past the head; nothing to fetch.
    Idle,
    /// The lag fits the inline threshold; fetch the whole range now.
    Inline { start: u64, end: u64 },
    /// The lag is too large to chase inline. Register `[gap_start, gap_end]`
    /// for the gapfiller and jump the cursor so the live loop stays near the
    /// head.
    Deferred {
        gap_start: u64,
        gap_end: u64,
        resume_start: u64,
        end: u64,
    },
}

/// Decide how to close the distance from `cursor` (last indexed height) to
/// `head`, keeping at most `inline_threshold` blocks of inline work.
pub fn plan_catch_up(cursor: u64, head: u64, inline_threshold: u64) -> CatchUpPlan {
    if head <= cursor {
        return CatchUpPlan::Idle;
    }
    let start = cursor + 1;
    let lag = head - cursor;
    if lag <= inline_threshold {
        CatchUpPlan::Inline { start, end: head }
    } else {
        let resume_start = head - inline_threshold + 1;
        CatchUpPlan::Deferred {
            gap_start: start,
            gap_end: resume_start - 1,
            resume_start,
            end: head,
        }
    }
}

/// Catch-up planning for the milestone cursor over sequence numbers.
/// Identical shape, separate threshold.
pub fn plan_milestone_catch_up(cursor: u64, head: u64, inline_threshold: u64) -> CatchUpPlan {
    plan_catch_up(cursor, head, inline_threshold)
}

fn median(sorted: &[f64]) -> f64 {
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

/// Full fee statistics from receipts. The effective priority fee is the
/// effective gas price minus the block base fee, clamped at zero since some
/// endpoints report legacy transactions priced below the base fee.
pub fn fee_stats_from_receipts(receipts: &[ReceiptInfo], base_fee_gwei: f64) -> FeeStats {
    if receipts.is_empty() {
        return FeeStats {
            avg_priority_fee_gwei: Some(0.0),
            total_priority_fees_gwei: Some(0.0),
            ..Default::default()
        };
    }
    let mut fees = receipts
        .iter()
        .map(|r| (r.effective_gas_price_gwei - base_fee_gwei).max(0.0))
        .collect::<Vec<_>>();
    fees.sort_by(|a, b| a.total_cmp(b));
    let total: f64 = fees.iter().sum();
    FeeStats {
        min_priority_fee_gwei: fees[0],
        max_priority_fee_gwei: fees[fees.len() - 1],
        median_priority_fee_gwei: median(&fees),
        avg_priority_fee_gwei: Some(total / fees.len() as f64),
        total_priority_fees_gwei: Some(total),
    }
}

/// Throughput metrics over the interval since the previous block. `None`
/// when the predecessor is unknown or the timestamps do not advance.
pub fn derived_metrics(
    gas_used: u64,
    tx_count: u32,
    timestamp: u64,
    prev_timestamp: Option<u64>,
) -> (Option<f64>, Option<f64>, Option<f64>) {
    let Some(prev) = prev_timestamp else {
        return (None, None, None);
    };
    if timestamp <= prev {
        return (None, None, None);
    }
    let block_time = (timestamp - prev) as f64;
    let mgas_per_sec = gas_used as f64 / 1_000_000.0 / block_time;
    let tps = tx_count as f64 / block_time;
    (Some(block_time), Some(mgas_per_sec), Some(tps))
}

/// Apply receipt enrichment and derived metrics to a fetched block in place.
pub fn enrich_block(block: &mut BlockInfo, receipts: &[ReceiptInfo], prev_timestamp: Option<u64>) {
    block.fees = fee_stats_from_receipts(receipts, block.base_fee_gwei);
    let (block_time_sec, mgas_per_sec, tps) =
        derived_metrics(block.gas_used, block.tx_count, block.timestamp, prev_timestamp);
    block.block_time_sec = block_time_sec;
    block.mgas_per_sec = mgas_per_sec;
    block.tps = tps;
}

/// Largest `n` such that every height in `start..=n` is present, capped at
/// `end`. `None` when `start` itself is missing. Cursors and gap bounds only
/// ever advance over such a prefix, so a hole in the middle of a batch can
/// never be silently skipped.
pub fn contiguous_prefix_end(start: u64, end: u64, present: &HashSet<u64>) -> Option<u64> {
    if !present.contains(&start) {
        return None;
    }
    let mut last = start;
    while last < end && present.contains(&(last + 1)) {
        last += 1;
    }
    Some(last)
}

/// Collapse a sorted list of identities into inclusive contiguous runs.
pub fn merge_runs(sorted: &[u64]) -> Vec<(u64, u64)> {
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for &n in sorted {
        match runs.last_mut() {
            Some((_, end)) if *end + 1 == n => *end = n,
            _ => runs.push((n, n)),
        }
    }
    runs
}

/// The uncovered block span between two consecutive milestone ranges, if the
/// later one does not start right after the earlier one ends.
pub fn milestone_contiguity_gap(prev_end: u64, next_start: u64) -> Option<(u64, u64)> {
    if next_start > prev_end + 1 {
        Some((prev_end + 1, next_start - 1))
    } else {
        None
    }
}

/// Classify one step of a reorg walk-back at height `number`. `None` once
/// the stored hash matches the canonical chain again, ending the walk. The
/// mismatch at the stored tip is the parent-linkage observation; every
/// divergence below it is a canonical mismatch.
pub fn orphan_record(
    number: u64,
    tip: u64,
    stored_hash: H256,
    stored_timestamp: u64,
    canonical_hash: H256,
) -> Option<ReorgRecord> {
    if canonical_hash == stored_hash {
        return None;
    }
    Some(ReorgRecord {
        block_number: number,
        old_hash: stored_hash,
        timestamp: stored_timestamp,
        reason: if number == tip {
            ReorgReason::ParentHashMismatch
        } else {
            ReorgReason::CanonicalMismatch
        },
        replaced_by_hash: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_idle_at_or_past_head() {
        assert_eq!(plan_catch_up(1000, 1000, 30), CatchUpPlan::Idle);
        assert_eq!(plan_catch_up(1000, 999, 30), CatchUpPlan::Idle);
    }

    #[test]
    fn plan_inline_within_threshold() {
        assert_eq!(
            plan_catch_up(1000, 1001, 30),
            CatchUpPlan::Inline {
                start: 1001,
                end: 1001
            }
        );
        assert_eq!(
            plan_catch_up(1000, 1030, 30),
            CatchUpPlan::Inline {
                start: 1001,
                end: 1030
            }
        );
    }

    #[test]
    fn plan_defers_excess_lag_to_a_gap() {
        assert_eq!(
            plan_catch_up(1000, 1050, 30),
            CatchUpPlan::Deferred {
                gap_start: 1001,
                gap_end: 1020,
                resume_start: 1021,
                end: 1050
            }
        );
        // One past the threshold defers exactly one block.
        assert_eq!(
            plan_catch_up(1000, 1031, 30),
            CatchUpPlan::Deferred {
                gap_start: 1001,
                gap_end: 1001,
                resume_start: 1002,
                end: 1031
            }
        );
    }

    fn receipt(price_gwei: f64) -> ReceiptInfo {
        ReceiptInfo {
            tx_hash: H256::zero(),
            gas_used: 21_000,
            effective_gas_price_gwei: price_gwei,
        }
    }

    #[test]
    fn fee_stats_clamp_below_base_fee() {
        let stats = fee_stats_from_receipts(&[receipt(30.0), receipt(25.0), receipt(50.0)], 28.0);
        assert_eq!(stats.min_priority_fee_gwei, 0.0);
        assert_eq!(stats.max_priority_fee_gwei, 22.0);
        assert_eq!(stats.median_priority_fee_gwei, 2.0);
        assert_eq!(stats.total_priority_fees_gwei, Some(24.0));
        assert_eq!(stats.avg_priority_fee_gwei, Some(8.0));
        assert!(stats.is_enriched());
    }

    #[test]
    fn fee_stats_for_empty_block_are_enriched_zeros() {
        let stats = fee_stats_from_receipts(&[], 28.0);
        assert!(stats.is_enriched());
        assert_eq!(stats.total_priority_fees_gwei, Some(0.0));
    }

    #[test]
    fn median_of_even_count_averages_middle_pair() {
        let stats =
            fee_stats_from_receipts(&[receipt(30.0), receipt(31.0), receipt(32.0), receipt(35.0)], 30.0);
        assert_eq!(stats.median_priority_fee_gwei, 1.5);
    }

    #[test]
    fn derived_metrics_need_an_advancing_predecessor() {
        assert_eq!(derived_metrics(10_000_000, 40, 100, None), (None, None, None));
        assert_eq!(derived_metrics(10_000_000, 40, 100, Some(100)), (None, None, None));
        let (bt, mgas, tps) = derived_metrics(10_000_000, 40, 104, Some(100));
        assert_eq!(bt, Some(4.0));
        assert_eq!(mgas, Some(2.5));
        assert_eq!(tps, Some(10.0));
    }

    #[test]
    fn contiguous_prefix_stops_at_first_hole() {
        let present: HashSet<u64> = [5, 6, 7, 9, 10].into_iter().collect();
        assert_eq!(contiguous_prefix_end(5, 10, &present), Some(7));
        assert_eq!(contiguous_prefix_end(9, 10, &present), Some(10));
        assert_eq!(contiguous_prefix_end(8, 10, &present), None);
        assert_eq!(contiguous_prefix_end(5, 5, &present), Some(5));
    }

    #[test]
    fn runs_merge_adjacent_identities() {
        assert_eq!(merge_runs(&[]), vec![]);
        assert_eq!(merge_runs(&[3, 4, 5, 9, 11, 12]), vec![(3, 5), (9, 9), (11, 12)]);
    }

    #[test]
    fn milestone_gap_between_ranges() {
        assert_eq!(milestone_contiguity_gap(110, 111), None);
        assert_eq!(milestone_contiguity_gap(110, 115), Some((111, 114)));
        // Overlap is not a gap.
        assert_eq!(milestone_contiguity_gap(110, 108), None);
    }

    #[test]
    fn orphan_records_classify_the_walk_back() {
        let h1 = H256::from_low_u64_be(1);
        let h2 = H256::from_low_u64_be(2);

        // Stored and canonical agree; the walk ends here.
        assert!(orphan_record(99, 100, h1, 996, h1).is_none());

        let at_tip = orphan_record(100, 100, h1, 1_000, h2).unwrap();
        assert_eq!(at_tip.block_number, 100);
        assert_eq!(at_tip.old_hash, h1);
        assert_eq!(at_tip.reason, ReorgReason::ParentHashMismatch);
        assert!(at_tip.replaced_by_hash.is_none());

        let below = orphan_record(99, 100, h1, 996, h2).unwrap();
        assert_eq!(below.reason, ReorgReason::CanonicalMismatch);
    }
}

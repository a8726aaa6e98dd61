//! Drains the gap registry. Claims one gap at a time through the store's
//! conditional update, fills it in batches while shrinking the claimed
//! range, and hands the gap back on any failure so another attempt can pick
//! it up.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::time::Duration;

use eyre::{bail, Result};
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use polywatch_base::settings::IndexSettings;
use polywatch_base::SyncMetrics;
use polywatch_bor::{BorClient, HeimdallClient};
use polywatch_core::{
    BlockInfo, ChainClient, CoverageKind, Gap, GapKind, GapStatus, Milestone, MilestoneClient,
    StopFlag, WorkerId, WorkerRegistry,
};

use crate::db::IndexerDb;
use crate::enrich::{contiguous_prefix_end, enrich_block, fee_stats_from_receipts};
use crate::workers::{failure_backoff, idle, kind_label, worker_label};

const ID: WorkerId = WorkerId::Gapfiller;

/// Fixed drain priority: raw blocks unblock everything else, milestones
/// unblock finality, enrichment comes last.
const DRAIN_ORDER: [GapKind; 4] = [
    GapKind::Block,
    GapKind::Milestone,
    GapKind::Finality,
    GapKind::PriorityFee,
];

/// Rank in the fixed drain priority; lower drains first.
fn drain_rank(kind: GapKind) -> usize {
    DRAIN_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(DRAIN_ORDER.len())
}

/// Order claim candidates by drain priority, newest range first within a
/// kind.
fn order_claim_candidates(mut gaps: Vec<Gap>) -> Vec<Gap> {
    gaps.sort_by_key(|gap| (drain_rank(gap.kind), Reverse(gap.end)));
    gaps
}

#[derive(Debug)]
pub struct Gapfiller {
    db: IndexerDb,
    bor: BorClient,
    heimdall: HeimdallClient,
    index: IndexSettings,
    metrics: SyncMetrics,
    registry: WorkerRegistry,
    stop: StopFlag,
}

impl Gapfiller {
    pub fn new(
        db: IndexerDb,
        bor: BorClient,
        heimdall: HeimdallClient,
        index: IndexSettings,
        metrics: SyncMetrics,
        registry: WorkerRegistry,
        stop: StopFlag,
    ) -> Self {
        Self {
            db,
            bor,
            heimdall,
            index,
            metrics,
            registry,
            stop,
        }
    }

    pub async fn run(self) -> Result<()> {
        self.registry.register(ID);
        info!("Gapfiller started");
        let idle_interval = Duration::from_secs(self.index.gapfill_idle_secs);
        while !self.stop.is_stopped() {
            if let Err(err) = self.refresh_pending_gauges().await {
                warn!(error = ?err, "Failed to refresh gap gauges");
            }
            match self.drain_one().await {
                Ok(Some(filled)) => self.registry.record_run(ID, filled),
                Ok(None) => {
                    self.registry.record_run(ID, 0);
                    idle(&self.stop, idle_interval).await;
                }
                Err(err) => {
                    warn!(error = ?err, "Gap fill failed");
                    self.registry.record_error(ID, err.to_string());
                    let backoff = failure_backoff(
                        &err,
                        self.index.exhausted_backoff_secs,
                        self.index.gapfill_idle_secs,
                    );
                    idle(&self.stop, backoff).await;
                }
            }
        }
        self.registry.record_stopped(ID);
        Ok(())
    }

    async fn refresh_pending_gauges(&self) -> Result<()> {
        for kind in GapKind::iter() {
            let stats = self.db.gap_stats(kind).await?;
            self.metrics
                .pending_gaps
                .with_label_values(&[kind_label(kind)])
                .set(stats.pending_count as i64);
        }
        Ok(())
    }

    /// Claim and fill the first available gap in drain-priority order.
    /// `Ok(None)` when nothing was claimable.
    async fn drain_one(&self) -> Result<Option<u64>> {
        let mut candidates = Vec::new();
        for kind in DRAIN_ORDER {
            candidates.extend(self.db.pending_gaps(kind, self.index.gapfill_claim_limit).await?);
        }
        for gap in order_claim_candidates(candidates) {
            if !self.db.claim_gap(gap.id).await? {
                self.metrics
                    .gap_claims
                    .with_label_values(&[kind_label(gap.kind), "lost"])
                    .inc();
                continue;
            }
            self.metrics
                .gap_claims
                .with_label_values(&[kind_label(gap.kind), "won"])
                .inc();
            debug!(gap = gap.id, kind = %gap.kind, start = gap.start, end = gap.end, "Claimed gap");
            let filled = match gap.kind {
                GapKind::Block => self.fill_block_gap(&gap).await,
                GapKind::Milestone => self.fill_milestone_gap(&gap).await,
                GapKind::Finality => self.fill_finality_gap(&gap).await,
                GapKind::PriorityFee => self.fill_priority_fee_gap(&gap).await,
            };
            match filled {
                Ok(items) => return Ok(Some(items)),
                Err(err) => {
                    self.db.release_gap(gap.id).await?;
                    return Err(err);
                }
            }
        }
        Ok(None)
    }

    async fn fill_block_gap(&self, gap: &Gap) -> Result<u64> {
        let end = gap.end;
        let mut start = gap.start;
        let mut filled = 0u64;
        loop {
            if self.stop.is_stopped() {
                self.db.release_gap(gap.id).await?;
                return Ok(filled);
            }
            let chunk_end = end.min(start + self.index.block_batch_size - 1);
            let numbers: Vec<u64> = (start..=chunk_end).collect();
            let blocks = self.bor.get_blocks(&numbers).await?;
            let receipts = self.bor.get_blocks_receipts(&numbers).await?;

            let present: HashSet<u64> = blocks.succeeded.keys().copied().collect();
            let Some(prefix_end) = contiguous_prefix_end(start, chunk_end, &present) else {
                bail!("No progress filling block gap [{start}, {end}]");
            };

            let mut prev_timestamp = match start.checked_sub(1) {
                Some(parent) => self.db.block_meta(parent).await?.map(|m| m.timestamp),
                None => None,
            };
            let mut to_store: Vec<BlockInfo> = Vec::with_capacity((prefix_end - start + 1) as usize);
            for n in start..=prefix_end {
                let mut block = blocks.succeeded[&n].clone();
                match receipts.succeeded.get(&n) {
                    Some(block_receipts) => enrich_block(&mut block, block_receipts, prev_timestamp),
                    None => {
                        self.db.insert_gap(GapKind::PriorityFee, n, n, ID).await?;
                    }
                }
                prev_timestamp = Some(block.timestamp);
                to_store.push(block);
            }
            let stored = self.db.store_blocks(&to_store).await?;
            filled += stored;
            self.metrics
                .stored_items
                .with_label_values(&[worker_label(ID), kind_label(GapKind::Block)])
                .inc_by(stored);

            let status = self.db.shrink_gap(gap.id, prefix_end + 1, end).await?;
            if status == GapStatus::Filled {
                info!(gap = gap.id, start = gap.start, end, filled, "Block gap drained");
                let stats = self.db.gap_stats(GapKind::Block).await?;
                if stats.pending_count == 0 && stats.filling_count == 0 {
                    self.db.merge_coverage(CoverageKind::Blocks, gap.start, end).await?;
                }
                return Ok(filled);
            }
            if prefix_end < chunk_end {
                self.db.release_gap(gap.id).await?;
                return Ok(filled);
            }
            start = prefix_end + 1;
        }
    }

    async fn fill_milestone_gap(&self, gap: &Gap) -> Result<u64> {
        let end = gap.end;
        let mut start = gap.start;
        let mut filled = 0u64;
        loop {
            if self.stop.is_stopped() {
                self.db.release_gap(gap.id).await?;
                return Ok(filled);
            }
            let chunk_end = end.min(start + self.index.milestone_batch_size - 1);
            let ids: Vec<u64> = (start..=chunk_end).collect();
            let batch = self.heimdall.get_milestones(&ids).await?;
            let present: HashSet<u64> = batch.succeeded.keys().copied().collect();
            let Some(prefix_end) = contiguous_prefix_end(start, chunk_end, &present) else {
                bail!("No progress filling milestone gap [{start}, {end}]");
            };
            let to_store: Vec<Milestone> = (start..=prefix_end)
                .map(|seq| batch.succeeded[&seq].clone())
                .collect();
            let stored = self.db.store_milestones(&to_store).await?;
            // Stamping here is opportunistic; the milestones are durable and
            // the reconciler picks up anything this pass cannot stamp.
            for m in &to_store {
                if let Err(err) = self.db.stamp_finality(m).await {
                    warn!(sequence_id = m.sequence_id, error = ?err, "Deferred finality stamp");
                }
            }
            filled += stored;
            self.metrics
                .stored_items
                .with_label_values(&[worker_label(ID), kind_label(GapKind::Milestone)])
                .inc_by(stored);

            let status = self.db.shrink_gap(gap.id, prefix_end + 1, end).await?;
            if status == GapStatus::Filled {
                info!(gap = gap.id, start = gap.start, end, filled, "Milestone gap drained");
                let stats = self.db.gap_stats(GapKind::Milestone).await?;
                if stats.pending_count == 0 && stats.filling_count == 0 {
                    self.db
                        .merge_coverage(CoverageKind::Milestones, gap.start, end)
                        .await?;
                }
                return Ok(filled);
            }
            if prefix_end < chunk_end {
                self.db.release_gap(gap.id).await?;
                return Ok(filled);
            }
            start = prefix_end + 1;
        }
    }

    /// A finality gap is a block span no single attestation covered.
    /// Stamp whatever stored attestations overlap it; anything still
    /// unfinalized afterwards is the reconciler's job once more data lands.
    async fn fill_finality_gap(&self, gap: &Gap) -> Result<u64> {
        let covering = self.db.milestones_covering(gap.start, gap.end).await?;
        let mut stamped = 0u64;
        for m in &covering {
            stamped += self.db.stamp_finality(m).await?;
        }
        self.db.mark_gap_filled(gap.id).await?;
        info!(gap = gap.id, start = gap.start, end = gap.end, stamped, "Finality gap processed");
        Ok(stamped)
    }

    async fn fill_priority_fee_gap(&self, gap: &Gap) -> Result<u64> {
        let rows = self.db.unenriched_blocks_in_range(gap.start, gap.end).await?;
        if rows.is_empty() {
            self.db.mark_gap_filled(gap.id).await?;
            return Ok(0);
        }
        let numbers: Vec<u64> = rows.iter().map(|r| r.block_number as u64).collect();
        let receipts = self.bor.get_blocks_receipts(&numbers).await?;
        let mut enriched = 0u64;
        for row in &rows {
            let number = row.block_number as u64;
            if let Some(block_receipts) = receipts.succeeded.get(&number) {
                let fees = fee_stats_from_receipts(block_receipts, row.base_fee_gwei);
                self.db.update_fee_stats(number, &fees).await?;
                enriched += 1;
            }
        }
        self.metrics
            .stored_items
            .with_label_values(&[worker_label(ID), kind_label(GapKind::PriorityFee)])
            .inc_by(enriched);
        if receipts.is_complete() {
            self.db.mark_gap_filled(gap.id).await?;
            info!(gap = gap.id, enriched, "Fee enrichment gap drained");
        } else {
            self.db.release_gap(gap.id).await?;
        }
        Ok(enriched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polywatch_core::GapStatus;

    fn gap(id: i64, kind: GapKind, start: u64, end: u64) -> Gap {
        Gap {
            id,
            kind,
            start,
            end,
            source: WorkerId::LiveIndexer,
            status: GapStatus::Pending,
        }
    }

    #[test]
    fn block_gaps_are_claimed_before_every_other_kind() {
        let ordered = order_claim_candidates(vec![
            gap(1, GapKind::Milestone, 40, 45),
            gap(2, GapKind::PriorityFee, 900, 905),
            gap(3, GapKind::Block, 100, 120),
            gap(4, GapKind::Finality, 200, 210),
        ]);
        let kinds: Vec<GapKind> = ordered.iter().map(|g| g.kind).collect();
        assert_eq!(
            kinds,
            vec![
                GapKind::Block,
                GapKind::Milestone,
                GapKind::Finality,
                GapKind::PriorityFee
            ]
        );
    }

    #[test]
    fn newer_ranges_drain_first_within_a_kind() {
        let ordered = order_claim_candidates(vec![
            gap(1, GapKind::Block, 100, 120),
            gap(2, GapKind::Block, 500, 510),
        ]);
        assert_eq!(ordered[0].id, 2);
        assert_eq!(ordered[1].id, 1);
    }
}

//! The forward cursor. Follows the chain head, fills small head jumps
//! inline, defers large ones to the gap registry, and detects reorgs by
//! checking parent linkage against the stored tip.

use std::collections::HashSet;
use std::time::Duration;

use eyre::{bail, Result};
use tracing::{debug, info, warn};

use polywatch_bor::BorClient;
use polywatch_core::{
    BlockInfo, ChainClient, CoverageKind, GapKind, ReorgRecord, StopFlag, WorkerId, WorkerRegistry,
};

use polywatch_base::settings::IndexSettings;
use polywatch_base::SyncMetrics;

use crate::db::IndexerDb;
use crate::enrich::{
    contiguous_prefix_end, enrich_block, merge_runs, orphan_record, plan_catch_up, CatchUpPlan,
};
use crate::workers::{failure_backoff, idle, kind_label, worker_label};

const ID: WorkerId = WorkerId::LiveIndexer;

#[derive(Debug)]
pub struct LiveIndexer {
    db: IndexerDb,
    client: BorClient,
    index: IndexSettings,
    metrics: SyncMetrics,
    registry: WorkerRegistry,
    stop: StopFlag,
}

impl LiveIndexer {
    pub fn new(
        db: IndexerDb,
        client: BorClient,
        index: IndexSettings,
        metrics: SyncMetrics,
        registry: WorkerRegistry,
        stop: StopFlag,
    ) -> Self {
        Self {
            db,
            client,
            index,
            metrics,
            registry,
            stop,
        }
    }

    pub async fn run(self) -> Result<()> {
        self.registry.register(ID);
        let mut cursor = self.bootstrap().await?;
        info!(cursor, "Live indexer started");
        let poll = Duration::from_secs(self.index.poll_interval_secs);
        while !self.stop.is_stopped() {
            match self.tick(&mut cursor).await {
                Ok(stored) => {
                    self.registry.record_run(ID, stored);
                    if stored == 0 {
                        idle(&self.stop, poll).await;
                    }
                }
                Err(err) => {
                    warn!(error = ?err, "Live indexing iteration failed");
                    self.registry.record_error(ID, err.to_string());
                    let backoff =
                        failure_backoff(&err, self.index.exhausted_backoff_secs, self.index.poll_interval_secs);
                    idle(&self.stop, backoff).await;
                }
            }
        }
        self.registry.record_stopped(ID);
        Ok(())
    }

    /// Recover the cursor from the store, or index the configured start
    /// height into an empty store.
    async fn bootstrap(&self) -> Result<u64> {
        if let Some(cursor) = self.db.latest_block_number().await? {
            return Ok(cursor);
        }
        let head = self.client.latest_block_number().await?;
        let start = self.index.from.min(head);
        let mut block = self.client.get_block(start).await?;
        let receipts = self.client.get_block_receipts(start).await?;
        enrich_block(&mut block, &receipts, None);
        self.db.store_blocks(&[block]).await?;
        self.db.merge_coverage(CoverageKind::Blocks, start, start).await?;
        info!(start, "Bootstrapped empty store");
        Ok(start)
    }

    async fn tick(&self, cursor: &mut u64) -> Result<u64> {
        let head = self.client.latest_block_number().await?;
        match plan_catch_up(*cursor, head, self.index.inline_gap_threshold) {
            CatchUpPlan::Idle => Ok(0),
            CatchUpPlan::Inline { start, end } => self.index_range(cursor, start, end).await,
            CatchUpPlan::Deferred {
                gap_start,
                gap_end,
                resume_start,
                end,
            } => {
                warn!(
                    gap_start,
                    gap_end, head, "Head jumped past the inline threshold, deferring to gapfiller"
                );
                self.db.insert_gap(GapKind::Block, gap_start, gap_end, ID).await?;
                self.metrics
                    .missed_items
                    .with_label_values(&[worker_label(ID), kind_label(GapKind::Block)])
                    .inc_by(gap_end - gap_start + 1);
                *cursor = resume_start - 1;
                self.index_range(cursor, resume_start, end).await
            }
        }
    }

    /// Fetch, enrich and store `[start, end]`, advancing the cursor only
    /// over the contiguous prefix that actually landed.
    async fn index_range(&self, cursor: &mut u64, start: u64, end: u64) -> Result<u64> {
        let mut stored_total = 0u64;
        let mut chunk_start = start;
        while chunk_start <= end && !self.stop.is_stopped() {
            let chunk_end = end.min(chunk_start + self.index.block_batch_size - 1);
            let numbers: Vec<u64> = (chunk_start..=chunk_end).collect();
            let blocks = self.client.get_blocks(&numbers).await?;

            // Parent linkage against the stored tip, before anything lands.
            if chunk_start == *cursor + 1 {
                if let (Some(first), Some(tip)) =
                    (blocks.succeeded.get(&chunk_start), self.db.block_meta(*cursor).await?)
                {
                    if first.parent_hash != tip.hash {
                        self.handle_reorg(*cursor).await?;
                    }
                }
            }

            let present: HashSet<u64> = blocks.succeeded.keys().copied().collect();
            let Some(mut prefix_end) = contiguous_prefix_end(chunk_start, chunk_end, &present) else {
                break;
            };
            // Truncate at any linkage break inside the batch; the retry next
            // tick sees it as a reorg at the stored tip.
            for n in chunk_start + 1..=prefix_end {
                let parent = &blocks.succeeded[&(n - 1)];
                if blocks.succeeded[&n].parent_hash != parent.hash {
                    prefix_end = n - 1;
                    break;
                }
            }

            let receipt_numbers: Vec<u64> = (chunk_start..=prefix_end).collect();
            let receipts = self.client.get_blocks_receipts(&receipt_numbers).await?;

            let prev_ts = match self.db.block_meta(chunk_start.saturating_sub(1)).await? {
                Some(meta) if chunk_start > 0 => Some(meta.timestamp),
                _ => None,
            };
            let mut to_store: Vec<BlockInfo> = Vec::with_capacity(receipt_numbers.len());
            let mut unenriched: Vec<u64> = Vec::new();
            let mut prev_timestamp = prev_ts;
            for n in chunk_start..=prefix_end {
                let mut block = blocks.succeeded[&n].clone();
                match receipts.succeeded.get(&n) {
                    Some(block_receipts) => enrich_block(&mut block, block_receipts, prev_timestamp),
                    None => {
                        let (bt, mgas, tps) = crate::enrich::derived_metrics(
                            block.gas_used,
                            block.tx_count,
                            block.timestamp,
                            prev_timestamp,
                        );
                        block.block_time_sec = bt;
                        block.mgas_per_sec = mgas;
                        block.tps = tps;
                        unenriched.push(n);
                    }
                }
                prev_timestamp = Some(block.timestamp);
                to_store.push(block);
            }

            let stored = self.db.store_blocks(&to_store).await?;
            for (run_start, run_end) in merge_runs(&unenriched) {
                self.db.insert_gap(GapKind::PriorityFee, run_start, run_end, ID).await?;
                self.metrics
                    .missed_items
                    .with_label_values(&[worker_label(ID), kind_label(GapKind::PriorityFee)])
                    .inc_by(run_end - run_start + 1);
            }
            stored_total += stored;
            *cursor = prefix_end;
            self.metrics
                .indexed_height
                .with_label_values(&[worker_label(ID)])
                .set(*cursor as i64);
            self.metrics
                .stored_items
                .with_label_values(&[worker_label(ID), kind_label(GapKind::Block)])
                .inc_by(stored);

            if prefix_end < chunk_end {
                debug!(prefix_end, chunk_end, "Batch landed partially, retrying remainder next tick");
                break;
            }
            chunk_start = chunk_end + 1;
        }

        // The high mark may only advance while nothing below it is missing.
        let stats = self.db.gap_stats(GapKind::Block).await?;
        if stats.pending_count == 0 && stats.filling_count == 0 {
            self.db.merge_coverage(CoverageKind::Blocks, *cursor, *cursor).await?;
        }
        Ok(stored_total)
    }

    /// Walk back from the stored tip until the canonical chain matches
    /// again, record the orphans, and overwrite with canonical blocks.
    async fn handle_reorg(&self, tip: u64) -> Result<()> {
        let mut records: Vec<ReorgRecord> = Vec::new();
        let mut replacements: Vec<BlockInfo> = Vec::new();
        let mut n = tip;
        loop {
            let Some(stored) = self.db.block_meta(n).await? else {
                break;
            };
            let canonical = self.client.get_block(n).await?;
            let Some(record) = orphan_record(n, tip, stored.hash, stored.timestamp, canonical.hash)
            else {
                break;
            };
            records.push(record);
            replacements.push(canonical);
            if records.len() as u64 > self.index.reorg_depth_limit {
                bail!(
                    "Reorg deeper than {} blocks at height {n}, refusing to rewrite",
                    self.index.reorg_depth_limit
                );
            }
            if n == 0 {
                break;
            }
            n -= 1;
        }
        if records.is_empty() {
            return Ok(());
        }
        let fork_start = replacements
            .last()
            .map(|b| b.number)
            .unwrap_or(tip);
        warn!(depth = records.len(), fork_start, tip, "Reorg detected, rewriting orphaned range");
        self.db.record_reorgs(&records).await?;
        self.db.reset_finality(fork_start, tip).await?;

        // Ascending order for predecessor-based enrichment.
        replacements.reverse();
        let numbers: Vec<u64> = replacements.iter().map(|b| b.number).collect();
        let receipts = self.client.get_blocks_receipts(&numbers).await?;
        let mut prev_timestamp = match fork_start.checked_sub(1) {
            Some(parent) => self.db.block_meta(parent).await?.map(|m| m.timestamp),
            None => None,
        };
        for block in &mut replacements {
            match receipts.succeeded.get(&block.number) {
                Some(block_receipts) => enrich_block(block, block_receipts, prev_timestamp),
                None => {
                    self.db
                        .insert_gap(GapKind::PriorityFee, block.number, block.number, ID)
                        .await?;
                }
            }
            prev_timestamp = Some(block.timestamp);
        }
        self.db.store_blocks(&replacements).await?;
        for (record, replacement) in records.iter().rev().zip(&replacements) {
            self.db
                .set_replaced_by(record.block_number, &record.old_hash, &replacement.hash)
                .await?;
        }
        self.metrics
            .reorged_blocks
            .with_label_values(&[worker_label(ID)])
            .inc_by(records.len() as u64);
        Ok(())
    }
}

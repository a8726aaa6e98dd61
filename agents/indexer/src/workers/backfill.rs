//! The backward cursor. Extends history in dense batches from the earliest
//! stored block down to the configured target, then parks.

use std::collections::HashSet;
use std::time::Duration;

use eyre::Result;
use tracing::{debug, info, warn};

use polywatch_base::settings::IndexSettings;
use polywatch_base::SyncMetrics;
use polywatch_bor::BorClient;
use polywatch_core::{
    BlockInfo, ChainClient, CoverageKind, GapKind, StopFlag, WorkerId, WorkerRegistry,
};

use crate::db::IndexerDb;
use crate::enrich::enrich_block;
use crate::workers::{failure_backoff, idle, kind_label, worker_label};

const ID: WorkerId = WorkerId::Backfiller;

/// How long a finished backfiller sleeps between target re-checks.
const PARKED_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct Backfiller {
    db: IndexerDb,
    client: BorClient,
    index: IndexSettings,
    target: u64,
    metrics: SyncMetrics,
    registry: WorkerRegistry,
    stop: StopFlag,
}

impl Backfiller {
    pub fn new(
        db: IndexerDb,
        client: BorClient,
        index: IndexSettings,
        target: u64,
        metrics: SyncMetrics,
        registry: WorkerRegistry,
        stop: StopFlag,
    ) -> Self {
        Self {
            db,
            client,
            index,
            target,
            metrics,
            registry,
            stop,
        }
    }

    pub async fn run(self) -> Result<()> {
        self.registry.register(ID);
        info!(target = self.target, "Backfiller started");
        while !self.stop.is_stopped() {
            match self.tick().await {
                Ok(Some(stored)) => self.registry.record_run(ID, stored),
                Ok(None) => {
                    // At target. Stay alive so the task set keeps running.
                    self.registry.record_run(ID, 0);
                    idle(&self.stop, PARKED_INTERVAL).await;
                }
                Err(err) => {
                    warn!(error = ?err, "Backfill iteration failed");
                    self.registry.record_error(ID, err.to_string());
                    let backoff = failure_backoff(
                        &err,
                        self.index.exhausted_backoff_secs,
                        self.index.poll_interval_secs,
                    );
                    idle(&self.stop, backoff).await;
                }
            }
        }
        self.registry.record_stopped(ID);
        Ok(())
    }

    /// One backward batch. `Ok(None)` once history is extended down to the
    /// target.
    async fn tick(&self) -> Result<Option<u64>> {
        let Some(earliest) = self.db.earliest_block_number().await? else {
            // Nothing stored yet; wait for the live indexer to bootstrap.
            return Ok(None);
        };
        if earliest <= self.target {
            return Ok(None);
        }
        let end = earliest - 1;
        let start = self.target.max(end.saturating_sub(self.index.block_batch_size - 1));
        let numbers: Vec<u64> = (start..=end).collect();
        let blocks = self.client.get_blocks(&numbers).await?;
        let receipts = self.client.get_blocks_receipts(&numbers).await?;

        // The low mark only moves over a dense suffix ending at the current
        // earliest block, so walk down from `end`.
        let present: HashSet<u64> = blocks.succeeded.keys().copied().collect();
        let mut suffix_start = end;
        while suffix_start > start && present.contains(&(suffix_start - 1)) {
            suffix_start -= 1;
        }
        if !present.contains(&end) {
            debug!(end, "Earliest predecessor not fetched, retrying");
            return Ok(Some(0));
        }

        let mut to_store: Vec<BlockInfo> = Vec::with_capacity((end - suffix_start + 1) as usize);
        let mut prev_timestamp = match suffix_start.checked_sub(1) {
            Some(parent) => blocks.succeeded.get(&parent).map(|b| b.timestamp),
            None => None,
        };
        let mut unenriched = 0u64;
        for n in suffix_start..=end {
            let mut block = blocks.succeeded[&n].clone();
            match receipts.succeeded.get(&n) {
                Some(block_receipts) => enrich_block(&mut block, block_receipts, prev_timestamp),
                None => {
                    self.db.insert_gap(GapKind::PriorityFee, n, n, ID).await?;
                    unenriched += 1;
                }
            }
            prev_timestamp = Some(block.timestamp);
            to_store.push(block);
        }
        let stored = self.db.store_blocks(&to_store).await?;
        self.db.merge_coverage(CoverageKind::Blocks, suffix_start, suffix_start).await?;
        self.metrics
            .indexed_height
            .with_label_values(&[worker_label(ID)])
            .set(suffix_start as i64);
        self.metrics
            .stored_items
            .with_label_values(&[worker_label(ID), kind_label(GapKind::Block)])
            .inc_by(stored);
        if unenriched > 0 {
            self.metrics
                .missed_items
                .with_label_values(&[worker_label(ID), kind_label(GapKind::PriorityFee)])
                .inc_by(unenriched);
        }
        Ok(Some(stored))
    }
}

//! The attestation cursors. The forward indexer follows the milestone
//! stream, stamps finality onto covered blocks, and registers a finality gap
//! whenever consecutive attestations skip a block span. The backfiller
//! extends attestation history down to its target.

use std::collections::HashSet;
use std::time::Duration;

use eyre::Result;
use tracing::{info, warn};

use polywatch_base::settings::IndexSettings;
use polywatch_base::SyncMetrics;
use polywatch_bor::HeimdallClient;
use polywatch_core::{
    CoverageKind, GapKind, Milestone, MilestoneClient, StopFlag, WorkerId, WorkerRegistry,
};

use crate::db::IndexerDb;
use crate::enrich::{contiguous_prefix_end, milestone_contiguity_gap, plan_milestone_catch_up, CatchUpPlan};
use crate::workers::{failure_backoff, idle, kind_label, worker_label};

const PARKED_INTERVAL: Duration = Duration::from_secs(60);

/// Stamp one attestation's range. When fewer rows finalize than the range
/// covers, some blocks have not landed yet; register a finality gap so the
/// stamping is retried once they do.
async fn stamp_range(db: &IndexerDb, m: &Milestone, source: WorkerId) -> Result<u64> {
    let stamped = db.stamp_finality(m).await?;
    if stamped < m.block_count() {
        let finalized = db.count_finalized_in_range(m.start_block, m.end_block).await?;
        if finalized < m.block_count() {
            db.insert_gap(GapKind::Finality, m.start_block, m.end_block, source).await?;
        }
    }
    Ok(stamped)
}

#[derive(Debug)]
pub struct MilestoneIndexer {
    db: IndexerDb,
    client: HeimdallClient,
    index: IndexSettings,
    metrics: SyncMetrics,
    registry: WorkerRegistry,
    stop: StopFlag,
}

impl MilestoneIndexer {
    pub fn new(
        db: IndexerDb,
        client: HeimdallClient,
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
        const ID: WorkerId = WorkerId::MilestoneIndexer;
        self.registry.register(ID);
        let mut cursor = self.bootstrap().await?;
        info!(cursor, "Milestone indexer started");
        let poll = Duration::from_secs(self.index.milestone_poll_interval_secs);
        while !self.stop.is_stopped() {
            match self.tick(&mut cursor).await {
                Ok(stored) => {
                    self.registry.record_run(ID, stored);
                    if stored == 0 {
                        idle(&self.stop, poll).await;
                    }
                }
                Err(err) => {
                    warn!(error = ?err, "Milestone indexing iteration failed");
                    self.registry.record_error(ID, err.to_string());
                    let backoff = failure_backoff(
                        &err,
                        self.index.exhausted_backoff_secs,
                        self.index.milestone_poll_interval_secs,
                    );
                    idle(&self.stop, backoff).await;
                }
            }
        }
        self.registry.record_stopped(ID);
        Ok(())
    }

    async fn bootstrap(&self) -> Result<u64> {
        if let Some(cursor) = self.db.latest_sequence_id().await? {
            return Ok(cursor);
        }
        let latest = self.client.latest_milestone().await?;
        let seq = latest.sequence_id;
        self.db.store_milestones(std::slice::from_ref(&latest)).await?;
        stamp_range(&self.db, &latest, WorkerId::MilestoneIndexer).await?;
        self.db.merge_coverage(CoverageKind::Milestones, seq, seq).await?;
        info!(sequence_id = seq, "Bootstrapped milestone history");
        Ok(seq)
    }

    async fn tick(&self, cursor: &mut u64) -> Result<u64> {
        const ID: WorkerId = WorkerId::MilestoneIndexer;
        let head = self.client.latest_milestone().await?.sequence_id;
        match plan_milestone_catch_up(*cursor, head, self.index.milestone_inline_threshold) {
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
                    gap_end, head, "Milestone head jumped past the inline threshold, deferring"
                );
                self.db.insert_gap(GapKind::Milestone, gap_start, gap_end, ID).await?;
                self.metrics
                    .missed_items
                    .with_label_values(&[worker_label(ID), kind_label(GapKind::Milestone)])
                    .inc_by(gap_end - gap_start + 1);
                *cursor = resume_start - 1;
                self.index_range(cursor, resume_start, end).await
            }
        }
    }

    async fn index_range(&self, cursor: &mut u64, start: u64, end: u64) -> Result<u64> {
        const ID: WorkerId = WorkerId::MilestoneIndexer;
        let mut stored_total = 0u64;
        let mut chunk_start = start;
        let mut prev = self.db.milestone_at(*cursor).await?;
        while chunk_start <= end && !self.stop.is_stopped() {
            let chunk_end = end.min(chunk_start + self.index.milestone_batch_size - 1);
            let ids: Vec<u64> = (chunk_start..=chunk_end).collect();
            let batch = self.client.get_milestones(&ids).await?;
            let present: HashSet<u64> = batch.succeeded.keys().copied().collect();
            let Some(prefix_end) = contiguous_prefix_end(chunk_start, chunk_end, &present) else {
                break;
            };

            let mut to_store: Vec<Milestone> = Vec::with_capacity((prefix_end - chunk_start + 1) as usize);
            for seq in chunk_start..=prefix_end {
                let m = batch.succeeded[&seq].clone();
                if let Some(p) = &prev {
                    if !m.follows(p) {
                        if let Some((gap_start, gap_end)) =
                            milestone_contiguity_gap(p.end_block, m.start_block)
                        {
                            warn!(
                                sequence_id = seq,
                                gap_start, gap_end, "Attestations skipped a block span"
                            );
                            self.db.insert_gap(GapKind::Finality, gap_start, gap_end, ID).await?;
                            self.metrics
                                .missed_items
                                .with_label_values(&[worker_label(ID), kind_label(GapKind::Finality)])
                                .inc_by(gap_end - gap_start + 1);
                        }
                    }
                }
                prev = Some(m.clone());
                to_store.push(m);
            }
            let stored = self.db.store_milestones(&to_store).await?;
            for m in &to_store {
                stamp_range(&self.db, m, ID).await?;
            }
            stored_total += stored;
            *cursor = prefix_end;
            self.metrics
                .indexed_height
                .with_label_values(&[worker_label(ID)])
                .set(*cursor as i64);
            self.metrics
                .stored_items
                .with_label_values(&[worker_label(ID), kind_label(GapKind::Milestone)])
                .inc_by(stored);
            if prefix_end < chunk_end {
                break;
            }
            chunk_start = chunk_end + 1;
        }
        let stats = self.db.gap_stats(GapKind::Milestone).await?;
        if stats.pending_count == 0 && stats.filling_count == 0 {
            self.db.merge_coverage(CoverageKind::Milestones, *cursor, *cursor).await?;
        }
        Ok(stored_total)
    }
}

#[derive(Debug)]
pub struct MilestoneBackfiller {
    db: IndexerDb,
    client: HeimdallClient,
    index: IndexSettings,
    target: u64,
    metrics: SyncMetrics,
    registry: WorkerRegistry,
    stop: StopFlag,
}

impl MilestoneBackfiller {
    pub fn new(
        db: IndexerDb,
        client: HeimdallClient,
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
        const ID: WorkerId = WorkerId::MilestoneBackfiller;
        self.registry.register(ID);
        info!(target = self.target, "Milestone backfiller started");
        while !self.stop.is_stopped() {
            match self.tick().await {
                Ok(Some(stored)) => self.registry.record_run(ID, stored),
                Ok(None) => {
                    self.registry.record_run(ID, 0);
                    idle(&self.stop, PARKED_INTERVAL).await;
                }
                Err(err) => {
                    warn!(error = ?err, "Milestone backfill iteration failed");
                    self.registry.record_error(ID, err.to_string());
                    let backoff = failure_backoff(
                        &err,
                        self.index.exhausted_backoff_secs,
                        self.index.milestone_poll_interval_secs,
                    );
                    idle(&self.stop, backoff).await;
                }
            }
        }
        self.registry.record_stopped(ID);
        Ok(())
    }

    async fn tick(&self) -> Result<Option<u64>> {
        const ID: WorkerId = WorkerId::MilestoneBackfiller;
        let Some(earliest) = self.db.earliest_sequence_id().await? else {
            return Ok(None);
        };
        if earliest <= self.target {
            return Ok(None);
        }
        let end = earliest - 1;
        let start = self.target.max(end.saturating_sub(self.index.milestone_batch_size - 1));
        let ids: Vec<u64> = (start..=end).collect();
        let batch = self.client.get_milestones(&ids).await?;

        let present: HashSet<u64> = batch.succeeded.keys().copied().collect();
        let mut suffix_start = end;
        if !present.contains(&end) {
            return Ok(Some(0));
        }
        while suffix_start > start && present.contains(&(suffix_start - 1)) {
            suffix_start -= 1;
        }
        let to_store: Vec<Milestone> = (suffix_start..=end)
            .map(|seq| batch.succeeded[&seq].clone())
            .collect();
        let stored = self.db.store_milestones(&to_store).await?;
        for m in &to_store {
            stamp_range(&self.db, m, ID).await?;
        }
        self.db
            .merge_coverage(CoverageKind::Milestones, suffix_start, suffix_start)
            .await?;
        self.metrics
            .indexed_height
            .with_label_values(&[worker_label(ID)])
            .set(suffix_start as i64);
        self.metrics
            .stored_items
            .with_label_values(&[worker_label(ID), kind_label(GapKind::Milestone)])
            .inc_by(stored);
        Ok(Some(stored))
    }
}

//! Agent wiring: build the store handle and upstream clients from settings,
//! then run the worker set until one fails or the process is signalled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use tracing::{info, info_span};
use tracing_futures::Instrument;

use polywatch_base::settings::IndexSettings;
use polywatch_base::{run_all, BaseAgent, CoreMetrics, SyncMetrics};
use polywatch_bor::{BorClient, ClientConf, HeimdallClient};
use polywatch_core::{StopFlag, WorkerRegistry};

use crate::db::IndexerDb;
use crate::settings::IndexerSettings;
use crate::workers::{
    Backfiller, FinalityReconciler, Gapfiller, LiveIndexer, MilestoneBackfiller, MilestoneIndexer,
};

/// The gap-aware chain indexer agent.
#[derive(Debug)]
pub struct Indexer {
    index: IndexSettings,
    db: IndexerDb,
    bor: BorClient,
    heimdall: HeimdallClient,
    sync_metrics: SyncMetrics,
    registry: WorkerRegistry,
    stop: StopFlag,
}

#[async_trait]
impl BaseAgent for Indexer {
    const AGENT_NAME: &'static str = "indexer";

    type Settings = IndexerSettings;

    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self> {
        let db = IndexerDb::connect(&settings.db_url).await?;
        db.migrate().await?;
        db.release_stale_gaps().await?;

        let index = settings.index.clone();
        let conf = ClientConf {
            breaker_failure_threshold: index.breaker_failure_threshold,
            breaker_reset: Duration::from_secs(index.breaker_reset_secs),
            request_timeout: Duration::from_secs(index.request_timeout_secs),
        };
        let bor = BorClient::new(&settings.rpc_url_list(), &conf)?;
        let heimdall = HeimdallClient::new(&settings.heimdall_url_list(), &conf)?;
        let sync_metrics = SyncMetrics::new(&metrics)?;

        Ok(Self {
            index,
            db,
            bor,
            heimdall,
            sync_metrics,
            registry: WorkerRegistry::default(),
            stop: StopFlag::default(),
        })
    }

    async fn run(self) -> Result<()> {
        let stop = self.stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Stop requested, finishing current iterations");
                stop.stop();
            }
        });

        let mut tasks = Vec::new();

        let live = LiveIndexer::new(
            self.db.clone(),
            self.bor.clone(),
            self.index.clone(),
            self.sync_metrics.clone(),
            self.registry.clone(),
            self.stop.clone(),
        );
        tasks.push(tokio::spawn(live.run()).instrument(info_span!("live_indexer")));

        let milestones = MilestoneIndexer::new(
            self.db.clone(),
            self.heimdall.clone(),
            self.index.clone(),
            self.sync_metrics.clone(),
            self.registry.clone(),
            self.stop.clone(),
        );
        tasks.push(tokio::spawn(milestones.run()).instrument(info_span!("milestone_indexer")));

        if let Some(target) = self.index.backfill_target {
            let backfiller = Backfiller::new(
                self.db.clone(),
                self.bor.clone(),
                self.index.clone(),
                target,
                self.sync_metrics.clone(),
                self.registry.clone(),
                self.stop.clone(),
            );
            tasks.push(tokio::spawn(backfiller.run()).instrument(info_span!("backfiller")));
        }

        if let Some(target) = self.index.milestone_backfill_target {
            let backfiller = MilestoneBackfiller::new(
                self.db.clone(),
                self.heimdall.clone(),
                self.index.clone(),
                target,
                self.sync_metrics.clone(),
                self.registry.clone(),
                self.stop.clone(),
            );
            tasks.push(tokio::spawn(backfiller.run()).instrument(info_span!("milestone_backfiller")));
        }

        let gapfiller = Gapfiller::new(
            self.db.clone(),
            self.bor.clone(),
            self.heimdall.clone(),
            self.index.clone(),
            self.sync_metrics.clone(),
            self.registry.clone(),
            self.stop.clone(),
        );
        tasks.push(tokio::spawn(gapfiller.run()).instrument(info_span!("gapfiller")));

        let reconciler = FinalityReconciler::new(
            self.db.clone(),
            self.index.clone(),
            self.sync_metrics.clone(),
            self.registry.clone(),
            self.stop.clone(),
        );
        tasks.push(tokio::spawn(reconciler.run()).instrument(info_span!("finality_reconciler")));

        run_all(tasks).await
    }
}

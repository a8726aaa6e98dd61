//! The finality safety net. Whatever ordering races the cursor workers
//! lose, a periodic join of unfinalized blocks against stored attestation
//! ranges makes finality converge.

use std::time::Duration;

use eyre::Result;
use tracing::{info, warn};

use polywatch_base::settings::IndexSettings;
use polywatch_base::SyncMetrics;
use polywatch_core::{GapKind, StopFlag, WorkerId, WorkerRegistry};

use crate::db::IndexerDb;
use crate::workers::{idle, kind_label, worker_label};

const ID: WorkerId = WorkerId::FinalityReconciler;

#[derive(Debug)]
pub struct FinalityReconciler {
    db: IndexerDb,
    index: IndexSettings,
    metrics: SyncMetrics,
    registry: WorkerRegistry,
    stop: StopFlag,
}

impl FinalityReconciler {
    pub fn new(
        db: IndexerDb,
        index: IndexSettings,
        metrics: SyncMetrics,
        registry: WorkerRegistry,
        stop: StopFlag,
    ) -> Self {
        Self {
            db,
            index,
            metrics,
            registry,
            stop,
        }
    }

    pub async fn run(self) -> Result<()> {
        self.registry.register(ID);
        info!("Finality reconciler started");
        let active = Duration::from_secs(self.index.reconcile_active_secs);
        let quiet = Duration::from_secs(self.index.reconcile_idle_secs);
        while !self.stop.is_stopped() {
            match self.db.reconcile_finality().await {
                Ok(fixed) => {
                    self.registry.record_run(ID, fixed);
                    if fixed > 0 {
                        info!(fixed, "Stamped finality onto straggler blocks");
                        self.metrics
                            .stored_items
                            .with_label_values(&[worker_label(ID), kind_label(GapKind::Finality)])
                            .inc_by(fixed);
                    }
                    // Scan again quickly while there is work, back off once
                    // a pass comes up clean.
                    idle(&self.stop, if fixed > 0 { active } else { quiet }).await;
                }
                Err(err) => {
                    warn!(error = ?err, "Finality reconciliation failed");
                    self.registry.record_error(ID, err.to_string());
                    idle(&self.stop, quiet).await;
                }
            }
        }
        self.registry.record_stopped(ID);
        Ok(())
    }
}

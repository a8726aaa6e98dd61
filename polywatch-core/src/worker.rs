use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};
use time::OffsetDateTime;

/// The fixed set of worker identities.
///
/// Worker status is keyed by this enum rather than by free-form names so a
/// typo cannot silently create a new "worker" in the status view.
#[derive(
    Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, IntoStaticStr, PartialEq,
)]
#[strum(serialize_all = "snake_case")]
pub enum WorkerId {
    /// Forward cursor over new blocks.
    LiveIndexer,
    /// Backward cursor toward the historical target.
    Backfiller,
    /// Forward cursor over finality attestations.
    MilestoneIndexer,
    /// Backward cursor over finality attestations.
    MilestoneBackfiller,
    /// Drains registered gaps.
    Gapfiller,
    /// Safety-net finality join.
    FinalityReconciler,
}

/// Coarse worker state exposed for operational visibility.
#[derive(Clone, Copy, Debug, Default, Display, Eq, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum WorkerState {
    /// Actively processing items.
    Running,
    /// Caught up, sleeping between polls.
    Idle,
    /// Last iteration failed; the worker keeps retrying.
    Error,
    /// Not started, or observed the stop flag.
    #[default]
    Stopped,
}

/// Status record for one worker.
#[derive(Clone, Debug, Default)]
pub struct WorkerStatus {
    /// Current coarse state.
    pub state: WorkerState,
    /// When the worker last completed an iteration.
    pub last_run_at: Option<OffsetDateTime>,
    /// When the worker last recorded an error.
    pub last_error_at: Option<OffsetDateTime>,
    /// Description of the last error.
    pub last_error: Option<String>,
    /// Total items persisted by this worker since start.
    pub items_processed: u64,
}

/// Process-local status registry for the worker set.
///
/// Observability only. Cross-worker coordination always goes through the
/// store's gap registry, never through this structure.
#[derive(Clone, Debug, Default)]
pub struct WorkerRegistry {
    inner: Arc<RwLock<HashMap<WorkerId, WorkerStatus>>>,
}

impl WorkerRegistry {
    /// Register a worker in `Idle` state before its task starts.
    pub fn register(&self, id: WorkerId) {
        self.inner.write().insert(
            id,
            WorkerStatus {
                state: WorkerState::Idle,
                ..Default::default()
            },
        );
    }

    /// Record a completed iteration that persisted `items` items.
    pub fn record_run(&self, id: WorkerId, items: u64) {
        let mut inner = self.inner.write();
        let status = inner.entry(id).or_default();
        status.state = if items > 0 {
            WorkerState::Running
        } else {
            WorkerState::Idle
        };
        status.last_run_at = Some(OffsetDateTime::now_utc());
        status.items_processed += items;
    }

    /// Record a failed iteration; the worker stays registered and retrying.
    pub fn record_error(&self, id: WorkerId, error: impl Into<String>) {
        let mut inner = self.inner.write();
        let status = inner.entry(id).or_default();
        status.state = WorkerState::Error;
        status.last_error_at = Some(OffsetDateTime::now_utc());
        status.last_error = Some(error.into());
    }

    /// Mark a worker as stopped.
    pub fn record_stopped(&self, id: WorkerId) {
        let mut inner = self.inner.write();
        inner.entry(id).or_default().state = WorkerState::Stopped;
    }

    /// Status for one worker, if registered.
    pub fn status(&self, id: WorkerId) -> Option<WorkerStatus> {
        self.inner.read().get(&id).cloned()
    }

    /// Snapshot of all registered workers.
    pub fn statuses(&self) -> Vec<(WorkerId, WorkerStatus)> {
        self.inner
            .read()
            .iter()
            .map(|(id, status)| (*id, status.clone()))
            .collect()
    }

    /// Coarse health bool: every registered worker is running or idle.
    pub fn all_running(&self) -> bool {
        let inner = self.inner.read();
        !inner.is_empty()
            && inner
                .values()
                .all(|s| matches!(s.state, WorkerState::Running | WorkerState::Idle))
    }
}

/// Cooperative stop flag shared by all workers in a process.
///
/// Checked at the top of each loop iteration; in-flight calls complete
/// before the loop observes the flag.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Request all workers to stop after their current iteration.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tracks_state_transitions() {
        let registry = WorkerRegistry::default();
        registry.register(WorkerId::LiveIndexer);
        registry.register(WorkerId::Gapfiller);
        assert!(registry.all_running());

        registry.record_run(WorkerId::LiveIndexer, 5);
        registry.record_run(WorkerId::Gapfiller, 0);
        let live = registry.status(WorkerId::LiveIndexer).unwrap();
        assert_eq!(live.state, WorkerState::Running);
        assert_eq!(live.items_processed, 5);
        assert_eq!(
            registry.status(WorkerId::Gapfiller).unwrap().state,
            WorkerState::Idle
        );

        registry.record_error(WorkerId::Gapfiller, "boom");
        assert!(!registry.all_running());
        let gapfiller = registry.status(WorkerId::Gapfiller).unwrap();
        assert_eq!(gapfiller.last_error.as_deref(), Some("boom"));

        registry.record_stopped(WorkerId::LiveIndexer);
        assert_eq!(
            registry.status(WorkerId::LiveIndexer).unwrap().state,
            WorkerState::Stopped
        );
    }

    #[test]
    fn stop_flag_is_sticky() {
        let flag = StopFlag::default();
        assert!(!flag.is_stopped());
        flag.stop();
        assert!(flag.is_stopped());
        assert!(flag.clone().is_stopped());
    }
}

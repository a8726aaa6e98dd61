//! The worker set. Each worker owns a clone of the store handle and the
//! shared metric bundle, runs an independent loop, and coordinates with the
//! others only through the store.

use std::time::Duration;

use polywatch_core::StopFlag;

mod backfill;
mod gapfill;
mod live;
mod milestone;
mod reconcile;

pub use backfill::Backfiller;
pub use gapfill::Gapfiller;
pub use live::LiveIndexer;
pub use milestone::{MilestoneBackfiller, MilestoneIndexer};
pub use reconcile::FinalityReconciler;

/// Stable metric label for a worker identity.
pub(crate) fn worker_label(id: polywatch_core::WorkerId) -> &'static str {
    id.into()
}

/// Stable metric label for a gap kind.
pub(crate) fn kind_label(kind: polywatch_core::GapKind) -> &'static str {
    kind.into()
}

/// Sleep for `duration`, waking early if stop is requested.
pub(crate) async fn idle(stop: &StopFlag, duration: Duration) {
    let deadline = tokio::time::Instant::now() + duration;
    while !stop.is_stopped() {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        let slice = (deadline - now).min(Duration::from_millis(500));
        tokio::time::sleep(slice).await;
    }
}

/// Backoff after an upstream failure; longer when every endpoint is down.
pub(crate) fn failure_backoff(err: &eyre::Report, exhausted_secs: u64, normal_secs: u64) -> Duration {
    let exhausted = err
        .downcast_ref::<polywatch_core::ClientError>()
        .map(polywatch_core::ClientError::is_exhausted)
        .unwrap_or(false);
    if exhausted {
        Duration::from_secs(exhausted_secs)
    } else {
        Duration::from_secs(normal_secs)
    }
}

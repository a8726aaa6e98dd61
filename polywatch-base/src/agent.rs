use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use futures::future::select_all;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing_futures::Instrumented;

use crate::metrics::CoreMetrics;
use crate::settings::{load_settings, Settings};

/// Trait shared by all polywatch agents.
#[async_trait]
pub trait BaseAgent: Send + Sync + Debug {
    /// The agent's name, used for settings lookup and metric labels.
    const AGENT_NAME: &'static str;

    /// The settings object for this agent.
    type Settings: AsRef<Settings> + DeserializeOwned + Debug + Send;

    /// Instantiate the agent from the standard settings object.
    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self>
    where
        Self: Sized;

    /// Start running this agent. Consumes self and runs until a worker
    /// fails or the process is stopped.
    async fn run(self) -> Result<()>;
}

/// Call this from `main` to fully initialize and run an agent.
pub async fn agent_main<A: BaseAgent>() -> Result<()> {
    #[cfg(feature = "color-eyre")]
    color_eyre::install()?;

    let settings = load_settings::<A::Settings>(A::AGENT_NAME)?;
    let base = settings.as_ref();
    crate::init_tracing(&base.log_level)?;
    let metrics = Arc::new(CoreMetrics::new(
        A::AGENT_NAME,
        base.metrics_port,
        prometheus::Registry::new(),
    )?);

    let agent = A::from_settings(settings, metrics.clone()).await?;
    tokio::spawn(crate::serve_metrics(metrics));
    agent.run().await
}

/// Wait for the worker task set; the first task to finish decides the
/// outcome and the rest are aborted.
pub async fn run_all(tasks: Vec<Instrumented<JoinHandle<Result<()>>>>) -> Result<()> {
    debug_assert!(!tasks.is_empty(), "No tasks submitted");
    let (result, _, remaining) = select_all(tasks).await;
    for task in remaining {
        task.into_inner().abort();
    }
    result?
}

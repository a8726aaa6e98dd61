use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_rwlock::RwLock;
use async_trait::async_trait;
use derive_new::new;
use tracing::{info, warn};

use crate::rpc_clients::{BreakerState, CircuitBreaker};
use crate::{ClientError, ClientResult};

/// How long an endpoint may go without its reported height advancing before
/// it is considered stalled and deprioritized.
const MAX_HEIGHT_LAG: Duration = Duration::from_secs(2 * 60);

/// One upstream endpoint usable by a [`FallbackProvider`].
#[async_trait]
pub trait Endpoint: Clone + Debug + Send + Sync + 'static {
    /// Base url, for logging.
    fn url(&self) -> &str;

    /// The endpoint's circuit breaker.
    fn breaker(&self) -> &CircuitBreaker;

    /// Current height as reported by this endpoint, used for stall checks.
    async fn latest_height(&self) -> ClientResult<u64>;
}

/// Priority bookkeeping for one endpoint.
#[derive(Clone, Copy, Debug, new)]
pub struct PrioritizedEndpoint {
    /// Index into the `endpoints` field of [`FallbackProvider`].
    pub index: usize,
    /// Last height seen from this endpoint and when it was seen.
    #[new(value = "(0, Instant::now())")]
    last_height: (u64, Instant),
}

impl PrioritizedEndpoint {
    fn from_height(index: usize, height: u64) -> Self {
        Self {
            index,
            last_height: (height, Instant::now()),
        }
    }
}

struct Inner<T> {
    endpoints: Vec<T>,
    /// Sorted descending by reliability; the head is tried first.
    priorities: RwLock<Vec<PrioritizedEndpoint>>,
}

/// Bundles multiple endpoints and walks them in priority order until one
/// answers.
///
/// Endpoints whose breaker is open are skipped without an attempt. When the
/// walk ends without an answer the caller gets the typed
/// [`ClientError::AllEndpointsExhausted`] signal and applies a uniform
/// backoff instead of per-endpoint discovery.
pub struct FallbackProvider<T> {
    inner: Arc<Inner<T>>,
    max_height_lag: Duration,
}

impl<T> Clone for FallbackProvider<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            max_height_lag: self.max_height_lag,
        }
    }
}

impl<T: Debug> Debug for FallbackProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackProvider")
            .field("endpoints", &self.inner.endpoints)
            .finish()
    }
}

impl<T: Endpoint> FallbackProvider<T> {
    /// Convenience builder.
    pub fn builder() -> FallbackProviderBuilder<T> {
        FallbackProviderBuilder::default()
    }

    /// Create a provider over `endpoints`, highest priority first.
    pub fn new(endpoints: impl IntoIterator<Item = T>) -> Self {
        Self::builder().add_endpoints(endpoints).build()
    }

    /// Number of configured endpoints.
    pub fn len(&self) -> usize {
        self.inner.endpoints.len()
    }

    /// Whether no endpoints are configured.
    pub fn is_empty(&self) -> bool {
        self.inner.endpoints.is_empty()
    }

    /// Number of endpoints whose breaker is not currently open. Batch
    /// parallelism is scaled by this.
    pub fn healthy_count(&self) -> usize {
        self.inner
            .endpoints
            .iter()
            .filter(|e| e.breaker().state() != BreakerState::Open)
            .count()
    }

    /// Run `f` against endpoints in priority order until one succeeds.
    pub async fn call<F, Fut, R>(&self, f: F) -> ClientResult<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = ClientResult<R>> + Send,
    {
        for priority in self.take_priorities_snapshot().await {
            let endpoint = self.inner.endpoints[priority.index].clone();
            if !endpoint.breaker().can_execute() {
                continue;
            }
            match f(endpoint.clone()).await {
                Ok(res) => {
                    endpoint.breaker().on_success();
                    return Ok(res);
                }
                Err(err) => {
                    endpoint.breaker().on_failure();
                    warn!(url = endpoint.url(), %err, "Endpoint call failed, trying next");
                    self.handle_stalled_endpoint(&priority, &endpoint).await;
                }
            }
        }
        Err(ClientError::AllEndpointsExhausted)
    }

    /// Non-blocking snapshot of the current priority order.
    pub async fn take_priorities_snapshot(&self) -> Vec<PrioritizedEndpoint> {
        let read_lock = self.inner.priorities.read().await;
        (*read_lock).clone()
    }

    async fn deprioritize_endpoint(&self, priority: PrioritizedEndpoint) {
        // Move it to the end of the queue.
        let mut priorities = self.inner.priorities.write().await;
        priorities.retain(|p| p.index != priority.index);
        priorities.push(priority);
    }

    async fn update_last_seen_height(&self, index: usize, height: u64) {
        let mut priorities = self.inner.priorities.write().await;
        if let Some(position) = priorities.iter().position(|p| p.index == index) {
            priorities[position] = PrioritizedEndpoint::from_height(index, height);
        }
    }

    /// Deprioritize an endpoint whose reported height has stopped advancing.
    pub async fn handle_stalled_endpoint(&self, priority: &PrioritizedEndpoint, endpoint: &T) {
        let now = Instant::now();
        if now
            .duration_since(priority.last_height.1)
            .le(&self.max_height_lag)
        {
            // Too early to tell whether the endpoint has stalled.
            return;
        }

        let current_height = endpoint
            .latest_height()
            .await
            .unwrap_or(priority.last_height.0);
        if current_height <= priority.last_height.0 {
            self.deprioritize_endpoint(*priority).await;
            info!(
                url = endpoint.url(),
                index = priority.index,
                "Deprioritizing stalled endpoint"
            );
        } else {
            self.update_last_seen_height(priority.index, current_height)
                .await;
        }
    }
}

/// Builder for [`FallbackProvider`].
#[derive(Debug, Clone)]
pub struct FallbackProviderBuilder<T> {
    endpoints: Vec<T>,
    max_height_lag: Duration,
}

impl<T> Default for FallbackProviderBuilder<T> {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            max_height_lag: MAX_HEIGHT_LAG,
        }
    }
}

impl<T> FallbackProviderBuilder<T> {
    /// Add one endpoint at a lower priority than all previous ones.
    pub fn add_endpoint(mut self, endpoint: T) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Add endpoints sorted highest priority first.
    pub fn add_endpoints(mut self, endpoints: impl IntoIterator<Item = T>) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    /// Override the stall-detection window. Used by tests.
    pub fn with_max_height_lag(mut self, lag: Duration) -> Self {
        self.max_height_lag = lag;
        self
    }

    /// Build the provider; the insertion order gives the initial priority.
    pub fn build(self) -> FallbackProvider<T> {
        let count = self.endpoints.len();
        FallbackProvider {
            inner: Arc::new(Inner {
                endpoints: self.endpoints,
                priorities: RwLock::new((0..count).map(PrioritizedEndpoint::new).collect()),
            }),
            max_height_lag: self.max_height_lag,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    #[derive(Clone, Debug)]
    struct TestEndpoint {
        url: String,
        failing: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
        breaker: Arc<CircuitBreaker>,
    }

    impl TestEndpoint {
        fn new(url: &str, failing: bool) -> Self {
            Self {
                url: url.to_string(),
                failing: Arc::new(AtomicBool::new(failing)),
                calls: Arc::new(AtomicUsize::new(0)),
                breaker: Arc::new(CircuitBreaker::new(2, Duration::from_secs(60))),
            }
        }
    }

    #[async_trait]
    impl Endpoint for TestEndpoint {
        fn url(&self) -> &str {
            &self.url
        }

        fn breaker(&self) -> &CircuitBreaker {
            &self.breaker
        }

        async fn latest_height(&self) -> ClientResult<u64> {
            Ok(0)
        }
    }

    async fn try_fetch(endpoint: TestEndpoint) -> ClientResult<&'static str> {
        endpoint.calls.fetch_add(1, Ordering::SeqCst);
        if endpoint.failing.load(Ordering::SeqCst) {
            Err(ClientError::endpoint(endpoint.url.clone(), "down"))
        } else {
            Ok("ok")
        }
    }

    #[tokio::test]
    async fn falls_through_to_next_endpoint() {
        let bad = TestEndpoint::new("http://bad", true);
        let good = TestEndpoint::new("http://good", false);
        let provider = FallbackProvider::new([bad.clone(), good.clone()]);

        let res = provider.call(try_fetch).await.unwrap();
        assert_eq!(res, "ok");
        assert_eq!(bad.calls.load(Ordering::SeqCst), 1);
        assert_eq!(good.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_is_typed() {
        let a = TestEndpoint::new("http://a", true);
        let b = TestEndpoint::new("http://b", true);
        let provider = FallbackProvider::new([a, b]);

        let err = provider.call(try_fetch).await.unwrap_err();
        assert!(err.is_exhausted());
    }

    #[tokio::test]
    async fn open_breaker_skips_endpoint_without_a_call() {
        let bad = TestEndpoint::new("http://bad", true);
        let good = TestEndpoint::new("http://good", false);
        let provider = FallbackProvider::new([bad.clone(), good.clone()]);

        // Two failing walks trip the bad endpoint's breaker (threshold 2).
        let _ = provider.call(try_fetch).await;
        let _ = provider.call(try_fetch).await;
        assert_eq!(bad.breaker.state(), BreakerState::Open);
        assert_eq!(provider.healthy_count(), 1);

        let before = bad.calls.load(Ordering::SeqCst);
        provider.call(try_fetch).await.unwrap();
        assert_eq!(bad.calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn stalled_endpoint_is_deprioritized() {
        let stalled = TestEndpoint::new("http://stalled", true);
        let healthy = TestEndpoint::new("http://healthy", false);
        let provider = FallbackProvider::builder()
            .add_endpoints([stalled.clone(), healthy])
            .with_max_height_lag(Duration::ZERO)
            .build();

        provider.call(try_fetch).await.unwrap();
        let order: Vec<_> = provider
            .take_priorities_snapshot()
            .await
            .iter()
            .map(|p| p.index)
            .collect();
        assert_eq!(order, vec![1, 0]);
    }
}

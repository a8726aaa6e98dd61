use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{eyre, Result};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use polywatch_core::rpc_clients::{CircuitBreaker, Endpoint, FallbackProvider};
use polywatch_core::{
    BatchResult, BlockInfo, ChainClient, ClientError, ClientResult, ReceiptInfo,
};

use crate::convert;

/// Connection tunables shared by all endpoints of a client.
#[derive(Clone, Copy, Debug)]
pub struct ClientConf {
    /// Consecutive failures before an endpoint's breaker trips.
    pub breaker_failure_threshold: u32,
    /// How long a tripped breaker rejects calls.
    pub breaker_reset: Duration,
    /// Per-call timeout; exceeding it counts as a breaker failure.
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct JsonRpcEnvelope<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// One JSON-RPC endpoint with its circuit breaker.
#[derive(Clone, Debug)]
pub(crate) struct RpcEndpoint {
    url: Url,
    http: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
}

impl RpcEndpoint {
    fn new(url: Url, conf: &ClientConf) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(conf.request_timeout)
            .build()?;
        Ok(Self {
            url,
            http,
            breaker: Arc::new(CircuitBreaker::new(
                conf.breaker_failure_threshold,
                conf.breaker_reset,
            )),
        })
    }

    async fn request<R: DeserializeOwned>(&self, method: &str, params: Value) -> ClientResult<R> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let response = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest(self.url.as_str(), e))?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited {
                url: self.url.to_string(),
            });
        }
        let envelope: JsonRpcEnvelope<R> = response
            .error_for_status()
            .map_err(|e| ClientError::endpoint(self.url.as_str(), e))?
            .json()
            .await
            .map_err(|e| ClientError::invalid_response(self.url.as_str(), e.to_string()))?;
        if let Some(err) = envelope.error {
            return Err(ClientError::endpoint(
                self.url.as_str(),
                format!("rpc error {}: {}", err.code, err.message),
            ));
        }
        envelope.result.ok_or_else(|| ClientError::MissingData {
            what: format!("{method} result"),
        })
    }
}

fn classify_reqwest(url: &str, err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout { url: url.into() }
    } else {
        ClientError::endpoint(url, err)
    }
}

#[async_trait]
impl Endpoint for RpcEndpoint {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn latest_height(&self) -> ClientResult<u64> {
        let raw: String = self.request("eth_blockNumber", json!([])).await?;
        convert::parse_quantity(&raw)
            .map(|q| q as u64)
            .ok_or_else(|| ClientError::invalid_response(self.url.as_str(), "bad block number"))
    }
}

/// Execution-chain client over one or more JSON-RPC endpoints.
#[derive(Clone, Debug)]
pub struct BorClient {
    provider: FallbackProvider<RpcEndpoint>,
}

impl BorClient {
    /// Build a client over `urls`, highest priority first.
    pub fn new(urls: &[String], conf: &ClientConf) -> Result<Self> {
        if urls.is_empty() {
            return Err(eyre!("At least one rpc url is required"));
        }
        let endpoints = urls
            .iter()
            .map(|u| RpcEndpoint::new(Url::parse(u)?, conf))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            provider: FallbackProvider::new(endpoints),
        })
    }

    /// Endpoints currently not tripped; callers scale batch parallelism by
    /// this.
    pub fn healthy_endpoints(&self) -> usize {
        self.provider.healthy_count()
    }
}

/// Fold per-key fetch results, bubbling a typed exhaustion signal when not a
/// single item could be served.
pub(crate) fn fold_batch<V>(
    results: Vec<(u64, ClientResult<V>)>,
) -> ClientResult<BatchResult<u64, V>> {
    let all_exhausted = !results.is_empty()
        && results
            .iter()
            .all(|(_, r)| matches!(r, Err(e) if e.is_exhausted()));
    if all_exhausted {
        return Err(ClientError::AllEndpointsExhausted);
    }
    Ok(BatchResult::from_results(results))
}

#[async_trait]
impl ChainClient for BorClient {
    async fn latest_block_number(&self) -> ClientResult<u64> {
        self.provider.call(|ep| async move {
            let raw: String = ep.request("eth_blockNumber", json!([])).await?;
            convert::parse_quantity(&raw)
                .map(|q| q as u64)
                .ok_or_else(|| ClientError::invalid_response(ep.url(), "bad block number"))
        })
        .await
    }

    async fn get_block(&self, number: u64) -> ClientResult<BlockInfo> {
        self.provider.call(|ep| async move {
            let raw: convert::RpcBlock = ep
                .request("eth_getBlockByNumber", json!([format!("{number:#x}"), true]))
                .await?;
            convert::block_from_wire(raw, ep.url())
        })
        .await
    }

    async fn get_blocks(&self, numbers: &[u64]) -> ClientResult<BatchResult<u64, BlockInfo>> {
        let fetches = numbers
            .iter()
            .map(|&n| async move { (n, self.get_block(n).await) });
        fold_batch(join_all(fetches).await)
    }

    async fn get_block_receipts(&self, number: u64) -> ClientResult<Vec<ReceiptInfo>> {
        self.provider.call(|ep| async move {
            let raw: Vec<convert::RpcReceipt> = ep
                .request("eth_getBlockReceipts", json!([format!("{number:#x}")]))
                .await?;
            raw.into_iter()
                .map(|r| convert::receipt_from_wire(r, ep.url()))
                .collect()
        })
        .await
    }

    async fn get_blocks_receipts(
        &self,
        numbers: &[u64],
    ) -> ClientResult<BatchResult<u64, Vec<ReceiptInfo>>> {
        let fetches = numbers
            .iter()
            .map(|&n| async move { (n, self.get_block_receipts(n).await) });
        fold_batch(join_all(fetches).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_batch_reports_partial_failure() {
        let folded = fold_batch(vec![
            (1u64, Ok(1)),
            (2, Err(ClientError::AllEndpointsExhausted)),
        ])
        .unwrap();
        assert_eq!(folded.failed, vec![2]);
        assert_eq!(folded.succeeded.len(), 1);
    }

    #[test]
    fn fold_batch_bubbles_total_exhaustion() {
        let folded: ClientResult<BatchResult<u64, ()>> = fold_batch(vec![
            (1u64, Err(ClientError::AllEndpointsExhausted)),
            (2, Err(ClientError::AllEndpointsExhausted)),
        ]);
        assert!(folded.unwrap_err().is_exhausted());
    }
}

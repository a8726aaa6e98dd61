use std::sync::Arc;

use async_trait::async_trait;
use eyre::{eyre, Result};
use futures::future::join_all;
use serde::Deserialize;
use url::Url;

use polywatch_core::rpc_clients::{CircuitBreaker, Endpoint, FallbackProvider};
use polywatch_core::{
    hex_to_h256, BatchResult, ClientError, ClientResult, Milestone, MilestoneClient,
};

use crate::rpc::{fold_batch, ClientConf};

#[derive(Debug, Deserialize)]
struct MilestoneEnvelope {
    result: MilestoneWire,
}

#[derive(Debug, Deserialize)]
struct MilestoneWire {
    sequence_id: u64,
    milestone_id: String,
    start_block: u64,
    end_block: u64,
    hash: String,
    proposer: String,
    timestamp: u64,
}

impl MilestoneWire {
    fn into_milestone(self, url: &str) -> ClientResult<Milestone> {
        let hash = hex_to_h256(&self.hash).ok_or_else(|| {
            ClientError::invalid_response(url, format!("bad milestone hash: {}", self.hash))
        })?;
        Ok(Milestone {
            sequence_id: self.sequence_id,
            milestone_id: self.milestone_id,
            start_block: self.start_block,
            end_block: self.end_block,
            hash,
            proposer: self.proposer,
            timestamp: self.timestamp,
        })
    }
}

/// One milestone-api endpoint with its circuit breaker.
#[derive(Clone, Debug)]
struct HeimdallEndpoint {
    url: Url,
    http: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
}

impl HeimdallEndpoint {
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

    async fn fetch(&self, path: &str) -> ClientResult<Milestone> {
        let url = self
            .url
            .join(path)
            .map_err(|e| ClientError::endpoint(self.url.as_str(), e))?;
        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout {
                    url: self.url.to_string(),
                }
            } else {
                ClientError::endpoint(self.url.as_str(), e)
            }
        })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::MissingData {
                what: format!("milestone at {path}"),
            });
        }
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited {
                url: self.url.to_string(),
            });
        }
        let envelope: MilestoneEnvelope = response
            .error_for_status()
            .map_err(|e| ClientError::endpoint(self.url.as_str(), e))?
            .json()
            .await
            .map_err(|e| ClientError::invalid_response(self.url.as_str(), e.to_string()))?;
        envelope.result.into_milestone(self.url.as_str())
    }
}

#[async_trait]
impl Endpoint for HeimdallEndpoint {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn latest_height(&self) -> ClientResult<u64> {
        Ok(self.fetch("milestones/latest").await?.sequence_id)
    }
}

/// Milestone-stream client over one or more api endpoints.
#[derive(Clone, Debug)]
pub struct HeimdallClient {
    provider: FallbackProvider<HeimdallEndpoint>,
}

impl HeimdallClient {
    /// Build a client over `urls`, highest priority first.
    pub fn new(urls: &[String], conf: &ClientConf) -> Result<Self> {
        if urls.is_empty() {
            return Err(eyre!("At least one milestone api url is required"));
        }
        let endpoints = urls
            .iter()
            .map(|u| HeimdallEndpoint::new(Url::parse(u)?, conf))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            provider: FallbackProvider::new(endpoints),
        })
    }
}

#[async_trait]
impl MilestoneClient for HeimdallClient {
    async fn latest_milestone(&self) -> ClientResult<Milestone> {
        self.provider
            .call(|ep| async move { ep.fetch("milestones/latest").await })
            .await
    }

    async fn get_milestone(&self, sequence_id: u64) -> ClientResult<Milestone> {
        self.provider
            .call(|ep| async move { ep.fetch(&format!("milestones/{sequence_id}")).await })
            .await
    }

    async fn get_milestones(&self, ids: &[u64]) -> ClientResult<BatchResult<u64, Milestone>> {
        let fetches = ids
            .iter()
            .map(|&id| async move { (id, self.get_milestone(id).await) });
        fold_batch(join_all(fetches).await)
    }
}

//! HTTP client for the remote scoring service.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::types::{Ack, Health, RemoteStatus, SimulatorConfig};
use crate::error::{CoreError, CoreResult};
use crate::normalize::RawExplanation;

/// Everything the coordinator needs from the remote service.
///
/// Transaction-shaped responses are handed back as raw JSON; the caller runs
/// them through the normalization adapter.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn status(&self) -> CoreResult<RemoteStatus>;
    async fn start(&self) -> CoreResult<Ack>;
    async fn stop(&self) -> CoreResult<Ack>;
    async fn configure(&self, config: &SimulatorConfig) -> CoreResult<Ack>;
    async fn inject_fraud(&self) -> CoreResult<Value>;
    async fn reset(&self) -> CoreResult<Ack>;
    async fn demo_data(&self, limit: usize) -> CoreResult<Vec<Value>>;
    async fn explain(&self, features: &[f64]) -> CoreResult<RawExplanation>;
    async fn health(&self) -> CoreResult<Health>;
    async fn feature_importance(&self) -> CoreResult<BTreeMap<String, f64>>;
    /// Model performance figures, passed through untouched.
    async fn metrics(&self) -> CoreResult<Value>;
}

#[derive(Clone)]
pub struct HttpRemoteClient {
    client: Client,
    base_url: String,
}

impl HttpRemoteClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to build HttpRemoteClient")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> CoreResult<T> {
        debug!(path, "remote GET");
        let resp = self.client.get(self.url(path)).query(query).send().await?;
        Self::decode(resp, format!("GET {}", path)).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> CoreResult<T> {
        debug!(path, "remote POST");
        let mut req = self.client.post(self.url(path));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        Self::decode(resp, format!("POST {}", path)).await
    }

    async fn decode<T: DeserializeOwned>(
        resp: reqwest::Response,
        endpoint: String,
    ) -> CoreResult<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::RemoteStatus {
                endpoint,
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| CoreError::Protocol(format!("{}: {}", endpoint, e)))
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteClient {
    async fn status(&self) -> CoreResult<RemoteStatus> {
        self.get_json("/status", &[]).await
    }

    async fn start(&self) -> CoreResult<Ack> {
        self.post_json::<(), _>("/control/start", None).await
    }

    async fn stop(&self) -> CoreResult<Ack> {
        self.post_json::<(), _>("/control/stop", None).await
    }

    async fn configure(&self, config: &SimulatorConfig) -> CoreResult<Ack> {
        self.post_json("/control/config", Some(config)).await
    }

    async fn inject_fraud(&self) -> CoreResult<Value> {
        self.post_json::<(), _>("/inject-fraud", None).await
    }

    async fn reset(&self) -> CoreResult<Ack> {
        self.post_json::<(), _>("/control/reset", None).await
    }

    async fn demo_data(&self, limit: usize) -> CoreResult<Vec<Value>> {
        self.get_json("/demo-data", &[("limit", limit.to_string())])
            .await
    }

    async fn explain(&self, features: &[f64]) -> CoreResult<RawExplanation> {
        self.post_json("/explain", Some(features)).await
    }

    async fn health(&self) -> CoreResult<Health> {
        self.get_json("/health", &[]).await
    }

    async fn feature_importance(&self) -> CoreResult<BTreeMap<String, f64>> {
        self.get_json("/features", &[]).await
    }

    async fn metrics(&self) -> CoreResult<Value> {
        self.get_json("/metrics", &[]).await
    }
}

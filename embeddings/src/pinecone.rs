//! Pinecone-backed vector index.
//!
//! Namespaces map to Pinecone serverless indexes. Index management goes to
//! the control plane; upserts and queries go to the per-index data plane
//! host, which is discovered on first use and cached.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{IndexError, IndexResult};
use crate::index::{IndexSpec, VectorIndex, VectorRecord};
use crate::similarity::{Metric, SimilarityResult};

const API_VERSION: &str = "2024-07";

const DEFAULT_READY_POLL: Duration = Duration::from_secs(1);

/// Pinecone REST client implementing [`VectorIndex`].
pub struct PineconeIndex {
    /// API key.
    api_key: Option<String>,

    /// Control plane base URL.
    control_url: String,

    /// Serverless cloud for new indexes.
    cloud: String,

    /// Serverless region for new indexes.
    region: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Data plane base URL by index name.
    hosts: RwLock<HashMap<String, String>>,

    /// Delay between readiness checks after creating an index.
    ready_poll: Duration,
}

impl PineconeIndex {
    /// Create a new client, reading `PINECONE_API_KEY`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("PINECONE_API_KEY").ok(),
            control_url: "https://api.pinecone.io".to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            client: reqwest::Client::new(),
            hosts: RwLock::new(HashMap::new()),
            ready_poll: DEFAULT_READY_POLL,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the control plane URL.
    pub fn with_control_url(mut self, url: impl Into<String>) -> Self {
        self.control_url = url.into();
        self
    }

    /// Set where new serverless indexes are placed.
    pub fn with_serverless(mut self, cloud: impl Into<String>, region: impl Into<String>) -> Self {
        self.cloud = cloud.into();
        self.region = region.into();
        self
    }

    /// Set the delay between readiness checks after creating an index.
    pub fn with_ready_poll(mut self, interval: Duration) -> Self {
        self.ready_poll = interval;
        self
    }

    /// Bound every HTTP request by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> IndexResult<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    fn request(&self, method: reqwest::Method, url: String) -> IndexResult<reqwest::RequestBuilder> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| IndexError::NotConfigured("PINECONE_API_KEY is not set".to_string()))?;

        Ok(self
            .client
            .request(method, url)
            .header("Api-Key", api_key)
            .header("X-Pinecone-API-Version", API_VERSION))
    }

    async fn remember_host(&self, name: &str, host: &str) {
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{host}")
        };
        self.hosts.write().await.insert(name.to_string(), base);
    }

    /// Describe an index, remembering its data plane host.
    async fn fetch_model(&self, name: &str) -> IndexResult<Option<IndexModel>> {
        let response = self
            .request(
                reqwest::Method::GET,
                format!("{}/indexes/{name}", self.control_url),
            )?
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("Pinecone index {name} does not exist");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let model: IndexModel = response.json().await?;
        self.remember_host(name, &model.host).await;
        Ok(Some(model))
    }

    /// Poll until a freshly created index accepts data plane requests.
    ///
    /// There is no deadline here; callers bound the wait.
    async fn wait_until_ready(&self, name: &str) -> IndexResult<()> {
        loop {
            match self.fetch_model(name).await? {
                Some(model) if model.status.ready => return Ok(()),
                _ => debug!("Waiting for Pinecone index {name} to become ready"),
            }
            tokio::time::sleep(self.ready_poll).await;
        }
    }

    /// Data plane URL for an index, describing it if not yet known.
    async fn host(&self, name: &str) -> IndexResult<String> {
        if let Some(host) = self.hosts.read().await.get(name) {
            return Ok(host.clone());
        }

        self.describe_index(name)
            .await?
            .ok_or_else(|| IndexError::NotFound(name.to_string()))?;

        self.hosts
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::InvalidResponse(format!("no host for index {name}")))
    }

    async fn api_error(response: reqwest::Response) -> IndexError {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        IndexError::ApiRequest(format!("API error ({status}): {error_text}"))
    }
}

impl Default for PineconeIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn backend(&self) -> &str {
        "pinecone"
    }

    async fn describe_index(&self, name: &str) -> IndexResult<Option<IndexSpec>> {
        Ok(self
            .fetch_model(name)
            .await?
            .map(|model| IndexSpec::new(model.name, model.dimension, model.metric)))
    }

    async fn create_index(&self, spec: &IndexSpec) -> IndexResult<()> {
        let body = serde_json::json!({
            "name": spec.name,
            "dimension": spec.dimension,
            "metric": spec.metric,
            "spec": {
                "serverless": {
                    "cloud": self.cloud,
                    "region": self.region
                }
            }
        });

        let response = self
            .request(reqwest::Method::POST, format!("{}/indexes", self.control_url))?
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            // A concurrent creator may not have finished provisioning.
            self.wait_until_ready(&spec.name).await?;
            return Err(IndexError::AlreadyExists(spec.name.clone()));
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let model: IndexModel = response.json().await?;
        self.remember_host(&spec.name, &model.host).await;
        if !model.status.ready {
            self.wait_until_ready(&spec.name).await?;
        }

        info!(
            "Created Pinecone index {} (dimension {}, metric {})",
            spec.name, spec.dimension, spec.metric
        );
        Ok(())
    }

    async fn upsert(&self, name: &str, records: Vec<VectorRecord>) -> IndexResult<usize> {
        let host = self.host(name).await?;
        let body = serde_json::json!({ "vectors": records });

        let response = self
            .request(reqwest::Method::POST, format!("{host}/vectors/upsert"))?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let result: UpsertResponse = response.json().await?;
        debug!("Upserted {} vectors into {name}", result.upserted_count);
        Ok(result.upserted_count)
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> IndexResult<Vec<SimilarityResult>> {
        let host = self.host(name).await?;
        let body = serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "includeValues": false,
            "includeMetadata": false
        });

        let response = self
            .request(reqwest::Method::POST, format!("{host}/query"))?
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let result: QueryResponse = response.json().await?;
        Ok(result.matches)
    }
}

/// Control plane description of an index.
#[derive(Debug, Deserialize)]
struct IndexModel {
    name: String,
    dimension: usize,
    metric: Metric,
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    upserted_count: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<SimilarityResult>,
}

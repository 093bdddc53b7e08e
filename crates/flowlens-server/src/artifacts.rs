//! Artifact recall: fetches payloads referenced by a step's `artifact_id`
//! from the workflow runtime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use flowlens_core::error::ArtifactError;

use crate::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    #[serde(default)]
    pub payload: Value,
}

/// Source of artifacts by id.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// `Ok(None)` when the runtime has no artifact with this id.
    async fn fetch(&self, artifact_id: &str) -> Result<Option<Artifact>, ArtifactError>;
}

/// Used when no runtime URL is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoArtifacts;

#[async_trait]
impl ArtifactSource for NoArtifacts {
    async fn fetch(&self, _artifact_id: &str) -> Result<Option<Artifact>, ArtifactError> {
        Err(ArtifactError::NotConfigured)
    }
}

/// `GET {base_url}/artifacts/{id}` with retry on transport errors and 5xx.
pub struct ArtifactClient {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl ArtifactClient {
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            retry,
        }
    }

    /// `{base_url}/artifacts/{id}` with the id percent-encoded as a single
    /// path segment.
    pub fn url_for(&self, artifact_id: &str) -> Result<reqwest::Url, ArtifactError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ArtifactError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| ArtifactError::InvalidUrl(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .push("artifacts")
            .push(artifact_id);
        Ok(url)
    }

    async fn fetch_once(&self, url: &reqwest::Url) -> Result<Option<Artifact>, ArtifactError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ArtifactError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ArtifactError::Status {
                status: status.as_u16(),
            });
        }

        let artifact: Artifact = response
            .json()
            .await
            .map_err(|e| ArtifactError::InvalidResponse(e.to_string()))?;
        Ok(Some(artifact))
    }
}

fn is_retryable(err: &ArtifactError) -> bool {
    match err {
        ArtifactError::Request(_) => true,
        ArtifactError::Status { status } => *status >= 500,
        ArtifactError::NotConfigured | ArtifactError::InvalidUrl(_) | ArtifactError::InvalidResponse(_) => false,
    }
}

#[async_trait]
impl ArtifactSource for ArtifactClient {
    async fn fetch(&self, artifact_id: &str) -> Result<Option<Artifact>, ArtifactError> {
        let url = self.url_for(artifact_id)?;
        tracing::debug!(artifact_id, %url, "recalling artifact");
        with_retry(self.retry, is_retryable, || self.fetch_once(&url)).await
    }
}

/// In-process artifact store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifacts {
    artifacts: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, artifact_id: impl Into<String>, payload: Value) {
        self.artifacts.write().await.insert(artifact_id.into(), payload);
    }
}

#[async_trait]
impl ArtifactSource for InMemoryArtifacts {
    async fn fetch(&self, artifact_id: &str) -> Result<Option<Artifact>, ArtifactError> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts.get(artifact_id).map(|payload| Artifact {
            artifact_id: artifact_id.to_string(),
            payload: payload.clone(),
        }))
    }
}

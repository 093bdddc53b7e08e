use std::sync::Arc;

use crate::artifacts::{ArtifactClient, ArtifactSource, NoArtifacts};
use crate::config::ServerConfig;
use crate::retry::RetryPolicy;
use crate::session::SessionStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub artifacts: Arc<dyn ArtifactSource>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let artifacts: Arc<dyn ArtifactSource> = match &config.runtime_url {
            Some(url) => Arc::new(ArtifactClient::new(url.clone(), RetryPolicy::new(config.artifact_retries))),
            None => {
                tracing::info!("FLOWLENS_RUNTIME_URL not set, artifact recall disabled");
                Arc::new(NoArtifacts)
            }
        };
        Self::with_artifacts(config, artifacts)
    }

    /// Create with a specific artifact source (for testing).
    pub fn with_artifacts(config: ServerConfig, artifacts: Arc<dyn ArtifactSource>) -> Self {
        Self {
            sessions: SessionStore::new(),
            artifacts,
            config: Arc::new(config),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

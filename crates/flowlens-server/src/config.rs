use std::net::SocketAddr;

use flowlens_core::config::LedgerConfig;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3001";
pub const DEFAULT_ARTIFACT_RETRIES: u32 = 2;

/// Server settings, read from `FLOWLENS_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Base URL of the workflow runtime, used for artifact recall.
    pub runtime_url: Option<String>,
    pub ledger: LedgerConfig,
    pub artifact_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            runtime_url: None,
            ledger: LedgerConfig::default(),
            artifact_retries: DEFAULT_ARTIFACT_RETRIES,
        }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3001))
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Invalid values keep their
    /// defaults and are logged.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("FLOWLENS_ADDR") {
            match raw.parse() {
                Ok(addr) => config.addr = addr,
                Err(e) => tracing::warn!(value = %raw, error = %e, "invalid FLOWLENS_ADDR, using {DEFAULT_ADDR}"),
            }
        }

        config.runtime_url = lookup("FLOWLENS_RUNTIME_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        if let Some(raw) = lookup("FLOWLENS_MAX_DEPTH") {
            match raw.trim().parse::<usize>() {
                Ok(depth) => config.ledger.max_depth = depth,
                Err(e) => tracing::warn!(value = %raw, error = %e, "invalid FLOWLENS_MAX_DEPTH, keeping default"),
            }
        }

        if let Some(raw) = lookup("FLOWLENS_DEDUP_KINDS") {
            let kinds: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
            config.ledger.dedup_kinds = kinds;
        }

        if let Some(raw) = lookup("FLOWLENS_ARTIFACT_RETRIES") {
            match raw.trim().parse::<u32>() {
                Ok(n) => config.artifact_retries = n,
                Err(e) => tracing::warn!(value = %raw, error = %e, "invalid FLOWLENS_ARTIFACT_RETRIES, keeping default"),
            }
        }

        config
    }
}

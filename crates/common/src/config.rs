use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Environment variable that overrides `[helius] api_key`.
pub const HELIUS_API_KEY_ENV: &str = "HELIUS_API_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: General,
    pub server: Server,
    pub helius: Helius,
    pub entity_sources: EntitySources,
    pub store: Option<Store>,
    pub cache: Cache,
    pub rate_limit: RateLimit,
    pub pipeline: Pipeline,
    pub observability: Observability,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Helius {
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntitySources {
    pub name_service_url: String,
    pub label_service_url: String,
    pub token_list_url: String,
    pub token_info_url: String,
    pub lookup_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Store {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cache {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimit {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    pub deadline_secs: u64,
    pub entity_batch_size: usize,
    pub token_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Observability {
    pub prometheus_port: u16,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).context("failed to parse walletgraph config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        anyhow::ensure!(
            self.helius.request_timeout_secs > 0,
            "helius.request_timeout_secs must be > 0"
        );
        anyhow::ensure!(
            self.entity_sources.lookup_timeout_ms > 0,
            "entity_sources.lookup_timeout_ms must be > 0"
        );
        anyhow::ensure!(self.cache.ttl_secs > 0, "cache.ttl_secs must be > 0");
        anyhow::ensure!(
            self.rate_limit.max_requests > 0,
            "rate_limit.max_requests must be > 0"
        );
        anyhow::ensure!(
            self.rate_limit.window_secs > 0,
            "rate_limit.window_secs must be > 0"
        );
        anyhow::ensure!(
            self.pipeline.deadline_secs > 0,
            "pipeline.deadline_secs must be > 0"
        );
        anyhow::ensure!(
            self.pipeline.entity_batch_size > 0,
            "pipeline.entity_batch_size must be > 0"
        );
        anyhow::ensure!(
            self.pipeline.token_batch_size > 0,
            "pipeline.token_batch_size must be > 0"
        );
        Ok(())
    }

    /// API key for the indexing API. `HELIUS_API_KEY` wins over the file value.
    /// Returns `None` when neither is set; callers report that per request.
    pub fn helius_api_key(&self) -> Option<String> {
        std::env::var(HELIUS_API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| Some(self.helius.api_key.clone()).filter(|k| !k.trim().is_empty()))
    }

    pub fn default_config_path() -> String {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));

        if let Some(dir) = &exe_dir {
            let candidate = dir.join("walletgraph.toml");
            if candidate.exists() {
                return candidate.to_string_lossy().to_string();
            }
        }

        let candidate = Path::new("config/walletgraph.toml");
        if candidate.exists() {
            return candidate.to_string_lossy().to_string();
        }

        "config/default.toml".to_string()
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}

use std::time::Duration;

use serde::Deserialize;

use crate::aggregator::AggregatorSettings;

/// Service configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Movie catalog API key
    pub tmdb_api_key: String,

    #[serde(default = "default_tmdb_api_url")]
    pub tmdb_api_url: String,

    /// Key for the recommendation model
    pub openrouter_api_key: String,

    #[serde(default = "default_oracle_model")]
    pub oracle_model: String,

    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,

    /// Add popular and same-genre titles to the recommendation candidates
    #[serde(default = "default_true")]
    pub enrichment_enabled: bool,

    #[serde(default = "default_max_enrichment_tags")]
    pub max_enrichment_tags: usize,

    #[serde(default = "default_secondary_pool_cap")]
    pub secondary_pool_cap: usize,

    /// Random candidate batches come from one of the first this-many catalog pages
    #[serde(default = "default_random_page_span")]
    pub random_page_span: u32,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_tmdb_api_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_oracle_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_oracle_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_max_enrichment_tags() -> usize {
    3
}

fn default_secondary_pool_cap() -> usize {
    30
}

fn default_random_page_span() -> u32 {
    10
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl ServiceConfig {
    /// Load configuration from environment variables, reading `.env` first when present
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> anyhow::Result<Self> {
        envy::from_iter::<_, ServiceConfig>(vars)
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            enrich: self.enrichment_enabled,
            max_tags: self.max_enrichment_tags,
            secondary_cap: self.secondary_pool_cap,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Per-agent knobs applied when an agent is registered without overrides.
#[derive(Debug, Deserialize, Clone)]
pub struct DefaultsConfig {
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            tenant: default_tenant(),
            chunk_tokens: default_chunk_tokens(),
            overlap_tokens: default_overlap_tokens(),
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_tenant() -> String {
    "default".to_string()
}
fn default_chunk_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    50
}
fn default_top_k() -> i64 {
    5
}
fn default_similarity_threshold() -> f64 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// USD per million input tokens, used for usage-record cost estimates.
    #[serde(default = "default_price_per_million")]
    pub price_per_million_tokens: f64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 100,
            max_retries: 5,
            timeout_secs: 30,
            price_per_million_tokens: default_price_per_million(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_price_per_million() -> f64 {
    0.02
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Navigation timeout applied per page fetch.
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Byte cap on fetched page bodies before extraction.
    #[serde(default = "default_max_page_bytes")]
    pub max_page_bytes: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            page_timeout_secs: default_page_timeout_secs(),
            max_pages: default_max_pages(),
            max_page_bytes: default_max_page_bytes(),
        }
    }
}

fn default_user_agent() -> String {
    "ragmill/0.3".to_string()
}
fn default_page_timeout_secs() -> u64 {
    20
}
fn default_max_pages() -> usize {
    50
}
fn default_max_page_bytes() -> usize {
    2 * 1024 * 1024
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Boundary validation: every knob that could break the pipeline is checked
/// once here, so downstream code can assume a well-formed configuration.
fn validate(config: &Config) -> Result<()> {
    if config.defaults.chunk_tokens == 0 {
        anyhow::bail!("defaults.chunk_tokens must be > 0");
    }

    // Overlap >= size would stall the chunker's sliding window.
    if config.defaults.overlap_tokens >= config.defaults.chunk_tokens {
        anyhow::bail!(
            "defaults.overlap_tokens ({}) must be < defaults.chunk_tokens ({})",
            config.defaults.overlap_tokens,
            config.defaults.chunk_tokens
        );
    }

    if config.defaults.top_k < 1 {
        anyhow::bail!("defaults.top_k must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.defaults.similarity_threshold) {
        anyhow::bail!("defaults.similarity_threshold must be in [0.0, 1.0]");
    }

    if config.defaults.tenant.trim().is_empty() {
        anyhow::bail!("defaults.tenant must not be empty");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if config.crawler.max_pages == 0 {
        anyhow::bail!("crawler.max_pages must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("ragmill.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let (_tmp, path) = write_config("[db]\npath = \"/tmp/ragmill.sqlite\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.defaults.chunk_tokens, 512);
        assert_eq!(cfg.defaults.overlap_tokens, 50);
        assert_eq!(cfg.embedding.provider, "disabled");
        assert_eq!(cfg.embedding.batch_size, 100);
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn test_overlap_ge_size_rejected() {
        let (_tmp, path) = write_config(
            "[db]\npath = \"/tmp/ragmill.sqlite\"\n\n[defaults]\nchunk_tokens = 100\noverlap_tokens = 100\n",
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let (_tmp, path) = write_config(
            "[db]\npath = \"/tmp/ragmill.sqlite\"\n\n[defaults]\nsimilarity_threshold = 1.5\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let (_tmp, path) = write_config(
            "[db]\npath = \"/tmp/ragmill.sqlite\"\n\n[embedding]\nprovider = \"openai\"\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let (_tmp, path) = write_config(
            "[db]\npath = \"/tmp/ragmill.sqlite\"\n\n[embedding]\nprovider = \"cohere\"\nmodel = \"m\"\ndims = 8\n",
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }
}

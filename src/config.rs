//! TOML configuration.
//!
//! Parsed with `serde` into [`Config`] and validated once in
//! [`load_config`]; everything downstream takes the validated values as
//! given.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mdrag_core::chunk;
use mdrag_core::index::IndexOptions;
use mdrag_core::tokens::ByteLengthCounter;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub sources: SourcesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_chunk_size")]
    pub target_chunk_size: usize,
    #[serde(default = "default_model_token_limit")]
    pub model_token_limit: usize,
    #[serde(default = "default_padding_factor")]
    pub padding_factor: f64,
    #[serde(default)]
    pub min_chunk_size: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chunk_size: default_target_chunk_size(),
            model_token_limit: default_model_token_limit(),
            padding_factor: default_padding_factor(),
            min_chunk_size: None,
        }
    }
}

fn default_target_chunk_size() -> usize {
    400
}
fn default_model_token_limit() -> usize {
    512
}
fn default_padding_factor() -> f64 {
    0.9
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_concurrent_batches: default_max_concurrent_batches(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_concurrent_batches() -> usize {
    4
}
fn default_initial_backoff_ms() -> u64 {
    500
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.markdown".to_string(),
        "**/*.mdx".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `"warn"` or `"info,mdrag_core=debug"`.
    #[serde(default = "default_log_level")]
    pub default: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Build the validated core chunking configuration.
    pub fn chunking_config(&self) -> Result<chunk::ChunkingConfig> {
        let c = &self.chunking;
        chunk::ChunkingConfig::new(
            c.target_chunk_size,
            c.model_token_limit,
            c.padding_factor,
            c.min_chunk_size,
            Arc::new(ByteLengthCounter),
        )
        .context("invalid [chunking] section")
    }

    pub fn index_options(&self) -> IndexOptions {
        let e = &self.embedding;
        IndexOptions {
            batch_size: e.batch_size,
            max_concurrent_batches: e.max_concurrent_batches,
            batch_timeout: Duration::from_secs(e.timeout_secs),
            max_attempts: e.max_retries.saturating_add(1),
            initial_backoff: Duration::from_millis(e.initial_backoff_ms),
            ..IndexOptions::default()
        }
    }
}

/// Read, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Chunking sizes are validated by the core constructor.
    config.chunking_config()?;

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if embedding.is_enabled() {
        if embedding.dims.is_none() || embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                embedding.provider
            );
        }
    }
    if embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if embedding.max_concurrent_batches == 0 {
        anyhow::bail!("embedding.max_concurrent_batches must be > 0");
    }
    if embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/mdrag.sqlite"

[sources]
root = "./docs"
"#;

    #[test]
    fn test_defaults_fill_optional_sections() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.chunking.target_chunk_size, 400);
        assert_eq!(cfg.chunking.model_token_limit, 512);
        assert_eq!(cfg.embedding.provider, "disabled");
        assert_eq!(cfg.sources.include_globs.len(), 3);
        assert_eq!(cfg.logging.default, "warn");
        assert_eq!(cfg.chunking_config().unwrap().hard_limit(), 460);
    }

    #[test]
    fn test_index_options_mapping() {
        let cfg = parse_config(&format!(
            "{MINIMAL}\n[embedding]\nbatch_size = 8\nmax_retries = 4\ntimeout_secs = 5\ninitial_backoff_ms = 250\n"
        ))
        .unwrap();
        let opts = cfg.index_options();
        assert_eq!(opts.batch_size, 8);
        assert_eq!(opts.max_attempts, 5);
        assert_eq!(opts.batch_timeout, Duration::from_secs(5));
        assert_eq!(opts.initial_backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_bad_padding() {
        let err = parse_config(&format!("{MINIMAL}\n[chunking]\npadding_factor = 1.5\n"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("padding_factor"));
    }

    #[test]
    fn test_rejects_min_above_target() {
        let text = format!("{MINIMAL}\n[chunking]\ntarget_chunk_size = 50\nmin_chunk_size = 80\n");
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_enabled_provider_requires_model_and_dims() {
        let text = format!("{MINIMAL}\n[embedding]\nprovider = \"openai\"\n");
        assert!(parse_config(&text).is_err());

        let text = format!(
            "{MINIMAL}\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n"
        );
        assert!(parse_config(&text).is_ok());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let text = format!("{MINIMAL}\n[embedding]\nprovider = \"magic\"\n");
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }
}

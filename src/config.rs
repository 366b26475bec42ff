//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `ExplorerConfig` struct, which holds one section per upstream service plus
//! the tuning knobs of the collector and sampler, and a `load_config` function to load the
//! configuration from a YAML file.
//!
//! Every section is optional in the file; missing fields fall back to their defaults.
//! Secrets and the index host can also come from the environment, which wins over the file:
//!
//! | Variable              | Field                   |
//! |-----------------------|-------------------------|
//! | `JINA_API_KEY`        | `embedding.api_key`     |
//! | `PINECONE_API_KEY`    | `vector_store.api_key`  |
//! | `PINECONE_INDEX_HOST` | `vector_store.host`     |
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use medvec::config::{ExplorerConfig, load_config};
//!
//! let config_file_path = "/path/to/config.yaml";
//! let config: ExplorerConfig = load_config(config_file_path).unwrap();
//! println!("{:?}", config.vector_store.host);
//! ```

use crate::client::{
    ApiClient, ApiError, ClientConfig, Credential, DEFAULT_TIMEOUT, UnauthorizedHook,
};
use crate::collector::{self, CollectorSettings};
use crate::embedding::{self, EmbeddingGateway, EmbeddingOptions};
use crate::sampler::{self, SamplerSettings};
use crate::vector_store::{DEFAULT_API_VERSION, VectorStoreGateway};

use serde::{Deserialize, Serialize};
use std::{env, error::Error, fmt, fs, time::Duration};

use tracing::debug;

pub const JINA_API_KEY_VAR: &str = "JINA_API_KEY";
pub const PINECONE_API_KEY_VAR: &str = "PINECONE_API_KEY";
pub const PINECONE_INDEX_HOST_VAR: &str = "PINECONE_INDEX_HOST";

const DEFAULT_EMBEDDING_BASE_URL: &str = "https://api.jina.ai";
const PLACEHOLDER_KEY: &str = "CHANGEME";

/// Represents the application's configuration.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(default)]
pub struct ExplorerConfig {
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    pub http: HttpConfig,
    pub collector: CollectorConfig,
    pub sampler: SamplerConfig,
}

/// Embedding provider connection and model parameters.
#[derive(Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub task: String,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_EMBEDDING_BASE_URL.to_string(),
            api_key: String::new(),
            model: embedding::DEFAULT_MODEL.to_string(),
            task: embedding::RETRIEVAL_QUERY_TASK.to_string(),
            dimensions: embedding::DEFAULT_DIMENSIONS,
        }
    }
}

/// Vector index connection.
#[derive(Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Index host, with or without scheme (`https://` is assumed).
    pub host: String,
    pub api_key: String,
    pub api_version: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_key: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

// Keys stay out of logs.
fn redact(key: &str) -> &'static str {
    if key.is_empty() { "<unset>" } else { "***" }
}

impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("task", &self.task)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl fmt::Debug for VectorStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorStoreConfig")
            .field("host", &self.host)
            .field("api_key", &redact(&self.api_key))
            .field("api_version", &self.api_version)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

/// Pagination pacing, retry and ceiling for the paginated crawl.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct CollectorConfig {
    pub page_size: usize,
    pub request_delay_ms: u64,
    pub max_pages: usize,
    pub retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            page_size: collector::DEFAULT_PAGE_SIZE,
            request_delay_ms: collector::DEFAULT_REQUEST_DELAY.as_millis() as u64,
            max_pages: collector::DEFAULT_MAX_PAGES,
            retries: collector::DEFAULT_RETRIES,
            retry_base_delay_ms: collector::DEFAULT_RETRY_BASE_DELAY.as_millis() as u64,
            retry_max_delay_ms: collector::DEFAULT_RETRY_MAX_DELAY.as_millis() as u64,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct SamplerConfig {
    pub max_namespaces: usize,
    pub selected_top_k: usize,
    pub all_top_k: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_namespaces: sampler::DEFAULT_MAX_NAMESPACES,
            selected_top_k: sampler::DEFAULT_SELECTED_TOP_K,
            all_top_k: sampler::DEFAULT_ALL_TOP_K,
        }
    }
}

fn credential_key(key: &str) -> Option<&str> {
    let key = key.trim();
    (!key.is_empty()).then_some(key)
}

impl ExplorerConfig {
    /// The file written by `mvx init`: defaults plus placeholder credentials.
    pub fn template() -> Self {
        let mut config = Self::default();
        config.embedding.api_key = PLACEHOLDER_KEY.to_string();
        config.vector_store.api_key = PLACEHOLDER_KEY.to_string();
        config.vector_store.host = "https://YOUR-INDEX.svc.pinecone.io".to_string();
        config
    }

    /// Overwrite secrets and the index host from `lookup` (normally the process
    /// environment). Unset or blank variables leave the file's values alone.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields = [
            (JINA_API_KEY_VAR, &mut self.embedding.api_key),
            (PINECONE_API_KEY_VAR, &mut self.vector_store.api_key),
            (PINECONE_INDEX_HOST_VAR, &mut self.vector_store.host),
        ];
        for (var, field) in fields {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                debug!("{var} overrides the configured value");
                *field = value.trim().to_string();
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// Index base URL, `https://` prepended when the host carries no scheme.
    pub fn index_base_url(&self) -> String {
        let host = self.vector_store.host.trim().trim_end_matches('/');
        if host.is_empty() || host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        }
    }

    /// Client for the embedding provider (bearer credential when a key is set).
    pub fn embedding_client(&self) -> Result<ApiClient, ApiError> {
        let mut config =
            ClientConfig::new(self.embedding.base_url.trim()).with_timeout(self.timeout());
        if let Some(token) = credential_key(&self.embedding.api_key) {
            config = config.with_credential(Credential::Bearer {
                token: token.to_string(),
            });
        }
        ApiClient::new(config)
    }

    /// Client for the vector index (`Api-Key` credential when a key is set).
    pub fn vector_store_client(&self) -> Result<ApiClient, ApiError> {
        let base_url = self.index_base_url();
        if base_url.is_empty() {
            return Err(ApiError::invalid_url(""));
        }
        let mut config = ClientConfig::new(base_url).with_timeout(self.timeout());
        if let Some(key) = credential_key(&self.vector_store.api_key) {
            config = config.with_credential(Credential::ApiKey {
                key: key.to_string(),
                version: self.vector_store.api_version.clone(),
            });
        }
        ApiClient::new(config)
    }

    pub fn embedding_options(&self) -> EmbeddingOptions {
        EmbeddingOptions {
            model: self.embedding.model.clone(),
            task: self.embedding.task.clone(),
            dimensions: self.embedding.dimensions,
        }
    }

    /// Embedding gateway whose client fires `on_unauthorized` on a 401.
    pub fn embedding_gateway(
        &self,
        on_unauthorized: &UnauthorizedHook,
    ) -> Result<EmbeddingGateway, ApiError> {
        let client = self.embedding_client()?.on_unauthorized(on_unauthorized.clone());
        Ok(EmbeddingGateway::new(client, self.embedding_options()))
    }

    /// Vector-store gateway whose client fires `on_unauthorized` on a 401.
    pub fn vector_store_gateway(
        &self,
        on_unauthorized: &UnauthorizedHook,
    ) -> Result<VectorStoreGateway, ApiError> {
        let client = self.vector_store_client()?.on_unauthorized(on_unauthorized.clone());
        Ok(VectorStoreGateway::new(client))
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        let c = &self.collector;
        CollectorSettings {
            page_size: c.page_size.max(1),
            request_delay: Duration::from_millis(c.request_delay_ms),
            max_pages: c.max_pages,
            retries: c.retries,
            retry_base_delay: Duration::from_millis(c.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(c.retry_max_delay_ms),
        }
    }

    /// Sampler settings; the zero query vector matches the embedding dimensions.
    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            max_namespaces: self.sampler.max_namespaces,
            selected_top_k: self.sampler.selected_top_k,
            all_top_k: self.sampler.all_top_k,
            dimensions: self.embedding.dimensions,
        }
    }
}

/// Parse a YAML document into an [`ExplorerConfig`] without touching the environment.
pub fn parse_config(content: &str) -> Result<ExplorerConfig, Box<dyn Error>> {
    // An empty file is a valid, all-default configuration.
    if content.trim().is_empty() {
        return Ok(ExplorerConfig::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

/// Loads the application's configuration from a YAML file.
///
/// This function reads the file at the given path, parses it as YAML, and then
/// applies the environment overrides listed in the module docs.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Returns
///
/// - `Ok(ExplorerConfig)`: The loaded configuration.
/// - `Err(Box<dyn Error>)`: An error occurred while reading the file or parsing the YAML.
///
/// # Examples
///
/// ```no_run
/// use medvec::config::load_config;
///
/// let config_file_path = "/path/to/config.yaml";
/// match load_config(config_file_path) {
///     Ok(config) => println!("{:?}", config),
///     Err(err) => eprintln!("Error loading config: {}", err),
/// }
/// ```
pub fn load_config(file: &str) -> Result<ExplorerConfig, Box<dyn Error>> {
    debug!("Loading config: {:?}", file);
    let content = fs::read_to_string(file)?;
    let mut config = parse_config(&content)?;
    config.apply_overrides(|var| env::var(var).ok());
    Ok(config)
}

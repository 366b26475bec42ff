//! # Embedding gateway
//!
//! Sends text to the embedding provider and returns dense vectors.
//!
//! Request body: `{ model, task, dimensions, input: [..] }`. The response is expected to
//! carry `data: [{ embedding, index, object }]` and optionally `usage.total_tokens`.
//! [`EmbeddingGateway::embed_query`] validates that shape and never hands back an
//! empty vector silently.

use crate::client::{ApiClient, ApiError, RequestSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, warn};

const SERVICE: &str = "embedding";
const EMBEDDINGS_PATH: &str = "v1/embeddings";

pub const DEFAULT_MODEL: &str = "jina-embeddings-v4";
pub const RETRIEVAL_QUERY_TASK: &str = "retrieval.query";
pub const DEFAULT_DIMENSIONS: usize = 1024;

/// Errors that can occur while turning text into a vector.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The provider answered, but not with a usable embedding.
    #[error("Invalid embedding response structure: {0}")]
    InvalidStructure(String),
}

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub task: String,
    pub dimensions: usize,
    pub input: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbeddingItem {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub object: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmbeddingUsage {
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbeddingResponse {
    #[serde(default)]
    pub model: Option<String>,
    pub data: Vec<EmbeddingItem>,
    #[serde(default)]
    pub usage: Option<EmbeddingUsage>,
}

/// Model parameters sent with every embedding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingOptions {
    pub model: String,
    pub task: String,
    pub dimensions: usize,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            task: RETRIEVAL_QUERY_TASK.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingGateway {
    client: ApiClient,
    options: EmbeddingOptions,
}

impl EmbeddingGateway {
    pub fn new(client: ApiClient, options: EmbeddingOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &EmbeddingOptions {
        &self.options
    }

    /// Embed a batch of texts.
    ///
    /// The body is decoded leniently first and then checked against the expected shape,
    /// so a malformed payload surfaces as [`EmbeddingError::InvalidStructure`] rather
    /// than a transport decode failure.
    pub async fn create_embedding(&self, texts: &[String]) -> Result<EmbeddingResponse> {
        let started = Instant::now();
        let request = EmbeddingRequest {
            model: self.options.model.clone(),
            task: self.options.task.clone(),
            dimensions: self.options.dimensions,
            input: texts.to_vec(),
        };
        debug!(
            service = SERVICE,
            inputs = texts.len(),
            text_len = texts.iter().map(String::len).sum::<usize>(),
            "embedding request"
        );

        let spec = RequestSpec::post(EMBEDDINGS_PATH).with_json(&request)?;
        let response = self
            .client
            .request::<JsonValue>(spec)
            .await
            .inspect_err(|err| {
                error!(service = SERVICE, status = %err.status, "{}", err.message);
            })?;

        debug!(
            service = SERVICE,
            status = response.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embedding response"
        );

        let raw = response.data;
        serde_json::from_value::<EmbeddingResponse>(raw.clone())
            .map_err(|_| EmbeddingError::InvalidStructure(raw.to_string()))
    }

    /// Embed a single query string.
    ///
    /// # Errors
    /// [`EmbeddingError::InvalidStructure`] when `data` is empty or its first embedding is
    /// empty; [`EmbeddingError::Api`] for anything the client reports.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let response = self.create_embedding(&[text.to_string()]).await?;

        let Some(first) = response.data.into_iter().next() else {
            error!(service = SERVICE, "embedding response carried no data");
            return Err(EmbeddingError::InvalidStructure(
                "response contained no embeddings".to_string(),
            ));
        };
        if first.embedding.is_empty() {
            return Err(EmbeddingError::InvalidStructure(format!(
                "embedding at index {} is empty",
                first.index
            )));
        }
        if first.embedding.len() != self.options.dimensions {
            warn!(
                service = SERVICE,
                expected = self.options.dimensions,
                found = first.embedding.len(),
                "embedding length differs from the configured dimensions"
            );
        }

        debug!(service = SERVICE, query = text, embedding_len = first.embedding.len(), "query embedded");
        Ok(first.embedding)
    }
}

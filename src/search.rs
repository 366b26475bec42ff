//! # Semantic search
//!
//! Natural-language query over one namespace: the query text is embedded first, then the
//! resulting vector is sent to the index as a similarity query (metadata on, raw values
//! off). An optional metadata filter is forwarded verbatim.
//!
//! Nothing is queried when embedding fails.

use crate::client::ApiError;
use crate::embedding::{EmbeddingError, EmbeddingGateway};
use crate::vector_store::{QueryRequest, QueryResponse, VectorStoreGateway};
use serde_json::Value as JsonValue;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info};

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("similarity query failed: {0}")]
    Query(#[from] ApiError),
}

impl SearchError {
    pub fn is_unauthorized(&self) -> bool {
        match self {
            SearchError::Embedding(EmbeddingError::Api(err)) | SearchError::Query(err) => {
                err.is_unauthorized()
            }
            SearchError::Embedding(EmbeddingError::InvalidStructure(_)) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SemanticSearch {
    embeddings: EmbeddingGateway,
    store: VectorStoreGateway,
}

impl SemanticSearch {
    pub fn new(embeddings: EmbeddingGateway, store: VectorStoreGateway) -> Self {
        Self { embeddings, store }
    }

    /// Embed `query` and return the `top_k` closest records in `namespace`.
    ///
    /// # Errors
    /// [`SearchError::Embedding`] if the query cannot be embedded (the index is not
    /// contacted), [`SearchError::Query`] if the similarity query fails.
    pub async fn search(
        &self,
        namespace: &str,
        query: &str,
        top_k: usize,
        filter: Option<JsonValue>,
    ) -> Result<QueryResponse, SearchError> {
        let started = Instant::now();
        info!(namespace, query, top_k, "semantic search");

        let vector = self
            .embeddings
            .embed_query(query)
            .await
            .inspect_err(|err| error!(namespace, "embedding failed: {err}"))?;

        let request = QueryRequest::new(namespace, vector, top_k).with_filter(filter);
        let response = self.store.query(&request).await?;

        info!(
            namespace,
            results = response.matches.len(),
            top_score = response.matches.first().map(|m| m.score),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "semantic search completed"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiClient, ClientConfig};
    use crate::embedding::EmbeddingOptions;
    use httpmock::prelude::*;
    use serde_json::json;

    fn search(embedding: &MockServer, index: &MockServer) -> SemanticSearch {
        let embed_client = ApiClient::new(ClientConfig::new(embedding.base_url())).unwrap();
        let index_client = ApiClient::new(ClientConfig::new(index.base_url())).unwrap();
        SemanticSearch::new(
            EmbeddingGateway::new(embed_client, EmbeddingOptions::default()),
            VectorStoreGateway::new(index_client),
        )
    }

    #[tokio::test]
    async fn test_search_embeds_then_queries() {
        let embedding = MockServer::start_async().await;
        let index = MockServer::start_async().await;
        embedding
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200)
                    .json_body(json!({"data": [{"index": 0, "object": "embedding", "embedding": [0.25, 0.5]}]}));
            })
            .await;
        let query = index
            .mock_async(|when, then| {
                when.method(POST).path("/query").json_body(json!({
                    "namespace": "ns1",
                    "vector": [0.25, 0.5],
                    "topK": 5,
                    "filter": {"specialty": {"$eq": "cardiology"}},
                    "includeValues": false,
                    "includeMetadata": true
                }));
                then.status(200).json_body(json!({
                    "matches": [
                        {"id": "doc-1", "score": 0.91, "metadata": {"title": "Angina"}},
                        {"id": "doc-2", "score": 0.72}
                    ],
                    "namespace": "ns1",
                    "usage": {"readUnits": 5}
                }));
            })
            .await;

        let response = search(&embedding, &index)
            .search(
                "ns1",
                "chest pain",
                5,
                Some(json!({"specialty": {"$eq": "cardiology"}})),
            )
            .await
            .unwrap();

        query.assert_async().await;
        assert_eq!(response.matches.len(), 2);
        assert_eq!(response.matches[0].id, "doc-1");
        assert_eq!(response.usage.map(|u| u.read_units), Some(5));
    }

    #[tokio::test]
    async fn test_embedding_failure_skips_query() {
        let embedding = MockServer::start_async().await;
        let index = MockServer::start_async().await;
        embedding
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200).json_body(json!({"data": []}));
            })
            .await;
        let query = index
            .mock_async(|when, then| {
                when.method(POST).path("/query");
                then.status(200).json_body(json!({"matches": []}));
            })
            .await;

        let err = search(&embedding, &index)
            .search("ns1", "chest pain", 5, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SearchError::Embedding(EmbeddingError::InvalidStructure(_))
        ));
        assert!(!err.is_unauthorized());
        query.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_query_unauthorized() {
        let embedding = MockServer::start_async().await;
        let index = MockServer::start_async().await;
        embedding
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200)
                    .json_body(json!({"data": [{"index": 0, "embedding": [1.0]}]}));
            })
            .await;
        index
            .mock_async(|when, then| {
                when.method(POST).path("/query");
                then.status(401).json_body(json!({"error": {"message": "Invalid API key"}}));
            })
            .await;

        let err = search(&embedding, &index)
            .search("ns1", "chest pain", 5, None)
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        match err {
            SearchError::Query(api) => assert_eq!(api.message, "Invalid API key"),
            other => panic!("expected query error, got {other:?}"),
        }
    }
}

//! # Vector-store gateway
//!
//! Maps the logical vector-store operations onto the index's REST API:
//!
//! | Operation                       | HTTP                                                   |
//! |---------------------------------|--------------------------------------------------------|
//! | [`list_namespaces`]             | `GET namespaces`                                       |
//! | [`describe_namespace`]          | `GET namespaces/{name}`                                |
//! | [`list_vectors`]                | `GET vectors/list?namespace=&limit=&paginationToken=`  |
//! | [`fetch_vectors`]               | `GET vectors/fetch?ids=..&ids=..&namespace=`           |
//! | [`query`]                       | `POST query`                                           |
//!
//! The gateway owns its [`ApiClient`], configured with the index host as base URL and an
//! [`Credential::ApiKey`](crate::client::Credential::ApiKey). Methods log and propagate
//! failures; nothing is swallowed here.
//!
//! [`list_namespaces`]: VectorStoreGateway::list_namespaces
//! [`describe_namespace`]: VectorStoreGateway::describe_namespace
//! [`list_vectors`]: VectorStoreGateway::list_vectors
//! [`fetch_vectors`]: VectorStoreGateway::fetch_vectors
//! [`query`]: VectorStoreGateway::query

use crate::client::{ApiClient, ApiError, RequestSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error};

const SERVICE: &str = "vector-store";

/// API version sent with every request unless configured otherwise.
pub const DEFAULT_API_VERSION: &str = "2025-04";

/// A named partition of the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub name: String,
    #[serde(default)]
    pub record_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespacesResponse {
    #[serde(default)]
    pub namespaces: Vec<NamespaceInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorId {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub next: Option<String>,
}

/// One page of vector ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListVectorsResponse {
    #[serde(default)]
    pub vectors: Vec<VectorId>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl ListVectorsResponse {
    /// Cursor for the next page in the same namespace, if the store issued one.
    pub fn next_token(&self) -> Option<&str> {
        self.pagination
            .as_ref()
            .and_then(|p| p.next.as_deref())
            .filter(|token| !token.is_empty())
    }

    pub fn ids(&self) -> Vec<String> {
        self.vectors.iter().map(|v| v.id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseValues {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

/// A stored vector: id, dense values, optional sparse part and metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub values: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_values: Option<SparseValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, JsonValue>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    #[serde(default)]
    pub vectors: HashMap<String, VectorRecord>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl FetchResponse {
    /// Dense values for `ids`, in the order given, skipping ids that did not resolve
    /// to a values array.
    pub fn values_in_order(&self, ids: &[String]) -> Vec<Vec<f32>> {
        ids.iter()
            .filter_map(|id| self.vectors.get(id))
            .filter_map(|record| record.values.clone())
            .collect()
    }
}

/// Body of a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub namespace: String,
    pub vector: Vec<f32>,
    pub top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<JsonValue>,
    pub include_values: bool,
    pub include_metadata: bool,
}

impl QueryRequest {
    /// Query without raw values, with metadata.
    pub fn new(namespace: impl Into<String>, vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            namespace: namespace.into(),
            vector,
            top_k,
            filter: None,
            include_values: false,
            include_metadata: true,
        }
    }

    pub fn with_filter(mut self, filter: Option<JsonValue>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_values(mut self, include_values: bool) -> Self {
        self.include_values = include_values;
        self
    }
}

/// A ranked similarity match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    pub id: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_values: Option<SparseValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, JsonValue>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryUsage {
    #[serde(default)]
    pub read_units: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub matches: Vec<SearchMatch>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub usage: Option<QueryUsage>,
}

/// REST gateway to the vector index.
#[derive(Debug, Clone)]
pub struct VectorStoreGateway {
    client: ApiClient,
}

impl VectorStoreGateway {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// All namespaces with their record counts.
    pub async fn list_namespaces(&self) -> Result<NamespacesResponse, ApiError> {
        let started = Instant::now();
        let response = self
            .client
            .request::<NamespacesResponse>(RequestSpec::get("namespaces"))
            .await
            .inspect_err(|err| log_failure("GET", "/namespaces", err))?;
        debug!(
            service = SERVICE,
            count = response.data.namespaces.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "namespaces loaded"
        );
        Ok(response.data)
    }

    /// Convenience over [`list_namespaces`](Self::list_namespaces): names only, in store order.
    pub async fn namespace_names(&self) -> Result<Vec<String>, ApiError> {
        Ok(self
            .list_namespaces()
            .await?
            .namespaces
            .into_iter()
            .map(|ns| ns.name)
            .collect())
    }

    pub async fn describe_namespace(&self, namespace: &str) -> Result<NamespaceInfo, ApiError> {
        let response = self
            .client
            .request::<NamespaceInfo>(RequestSpec::get("namespaces").with_id(namespace))
            .await
            .inspect_err(|err| log_failure("GET", "/namespaces/{name}", err))?;
        Ok(response.data)
    }

    /// One page of ids from `namespace`, starting at `pagination_token` (first page when `None`).
    pub async fn list_vectors(
        &self,
        namespace: &str,
        limit: Option<usize>,
        pagination_token: Option<&str>,
    ) -> Result<ListVectorsResponse, ApiError> {
        let mut spec = RequestSpec::get("vectors/list").with_param("namespace", namespace);
        if let Some(limit) = limit {
            spec = spec.with_param("limit", limit.to_string());
        }
        if let Some(token) = pagination_token {
            spec = spec.with_param("paginationToken", token);
        }

        let response = self
            .client
            .request::<ListVectorsResponse>(spec)
            .await
            .inspect_err(|err| log_failure("GET", "/vectors/list", err))?;
        debug!(
            service = SERVICE,
            namespace,
            ids = response.data.vectors.len(),
            has_next = response.data.next_token().is_some(),
            "vector ids listed"
        );
        Ok(response.data)
    }

    /// Full records for `ids` in one batched call.
    pub async fn fetch_vectors(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<FetchResponse, ApiError> {
        let spec = RequestSpec::get("vectors/fetch")
            .with_params(ids.iter().map(|id| ("ids", id.as_str())))
            .with_param("namespace", namespace);

        let response = self
            .client
            .request::<FetchResponse>(spec)
            .await
            .inspect_err(|err| log_failure("GET", "/vectors/fetch", err))?;
        debug!(
            service = SERVICE,
            namespace,
            requested = ids.len(),
            returned = response.data.vectors.len(),
            "vectors fetched"
        );
        Ok(response.data)
    }

    /// Similarity query.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, ApiError> {
        let started = Instant::now();
        debug!(
            service = SERVICE,
            namespace = %request.namespace,
            vector_len = request.vector.len(),
            top_k = request.top_k,
            has_filter = request.filter.is_some(),
            "similarity query"
        );
        let spec = RequestSpec::post("query").with_json(request)?;
        let response = self
            .client
            .request::<QueryResponse>(spec)
            .await
            .inspect_err(|err| log_failure("POST", "/query", err))?;
        debug!(
            service = SERVICE,
            matches = response.data.matches.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "similarity query answered"
        );
        Ok(response.data)
    }
}

fn log_failure(method: &str, path: &str, err: &ApiError) {
    error!(service = SERVICE, method, path, status = %err.status, "{}", err.message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, Credential};
    use httpmock::prelude::*;
    use serde_json::json;

    fn gateway(server: &MockServer) -> VectorStoreGateway {
        let client = ApiClient::new(ClientConfig::new(server.base_url()).with_credential(
            Credential::ApiKey {
                key: "test-key".into(),
                version: "2025-04".into(),
            },
        ))
        .unwrap();
        VectorStoreGateway::new(client)
    }

    #[test]
    fn test_query_body_shape() {
        let request = QueryRequest::new("ns1", vec![0.5; 1024], 5);
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["topK"], json!(5));
        assert_eq!(body["includeValues"], json!(false));
        assert_eq!(body["includeMetadata"], json!(true));
        assert_eq!(body["namespace"], json!("ns1"));
        assert_eq!(body["vector"].as_array().unwrap().len(), 1024);
        assert!(body.get("filter").is_none());
    }

    #[test]
    fn test_query_body_with_filter() {
        let request = QueryRequest::new("ns1", vec![0.1], 3)
            .with_filter(Some(json!({"specialty": {"$eq": "cardiology"}})));
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["filter"]["specialty"]["$eq"], json!("cardiology"));
    }

    #[test]
    fn test_values_in_order_skips_unresolved() {
        let fetched: FetchResponse = serde_json::from_value(json!({
            "vectors": {
                "b": {"id": "b", "values": [2.0]},
                "a": {"id": "a", "values": [1.0]},
                "c": {"id": "c"}
            },
            "namespace": "ns"
        }))
        .unwrap();
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        assert_eq!(fetched.values_in_order(&ids), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_empty_next_token_is_none() {
        let page: ListVectorsResponse =
            serde_json::from_value(json!({"vectors": [{"id": "x"}], "pagination": {"next": ""}}))
                .unwrap();
        assert_eq!(page.next_token(), None);
        assert_eq!(page.ids(), vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_list_namespaces() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/namespaces").header("api-key", "test-key");
                then.status(200).json_body(json!({
                    "namespaces": [
                        {"name": "cardiology", "record_count": 120},
                        {"name": "oncology", "record_count": 40}
                    ]
                }));
            })
            .await;

        let names = gateway(&server).namespace_names().await.unwrap();
        mock.assert_async().await;
        assert_eq!(names, vec!["cardiology", "oncology"]);
    }

    #[tokio::test]
    async fn test_describe_namespace() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/namespaces/oncology");
                then.status(200)
                    .json_body(json!({"name": "oncology", "record_count": 40}));
            })
            .await;

        let info = gateway(&server).describe_namespace("oncology").await.unwrap();
        assert_eq!(
            info,
            NamespaceInfo {
                name: "oncology".into(),
                record_count: 40
            }
        );
    }

    #[tokio::test]
    async fn test_list_vectors_sends_cursor() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/vectors/list")
                    .query_param("namespace", "ns1")
                    .query_param("limit", "100")
                    .query_param("paginationToken", "tok-2");
                then.status(200).json_body(json!({
                    "vectors": [{"id": "v3"}],
                    "pagination": {"next": "tok-3"}
                }));
            })
            .await;

        let page = gateway(&server)
            .list_vectors("ns1", Some(100), Some("tok-2"))
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(page.next_token(), Some("tok-3"));
    }

    #[tokio::test]
    async fn test_query_posts_expected_body() {
        let server = MockServer::start_async().await;
        let vector = vec![0.25_f32; 1024];
        let expected = json!({
            "namespace": "ns1",
            "vector": vector,
            "topK": 5,
            "includeValues": false,
            "includeMetadata": true
        });
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/query").json_body(expected);
                then.status(200).json_body(json!({
                    "matches": [{"id": "doc-1", "score": 0.91, "values": [], "metadata": {"title": "ECG"}}],
                    "namespace": "ns1",
                    "usage": {"readUnits": 5}
                }));
            })
            .await;

        let response = gateway(&server)
            .query(&QueryRequest::new("ns1", vector.clone(), 5))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.matches.len(), 1);
        assert_eq!(response.matches[0].id, "doc-1");
        assert_eq!(response.usage.unwrap().read_units, 5);
    }

    #[tokio::test]
    async fn test_errors_propagate() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/vectors/fetch");
                then.status(429).json_body(json!({"message": "Too many requests"}));
            })
            .await;

        let err = gateway(&server)
            .fetch_vectors("ns1", &["a".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(429));
        assert_eq!(err.message, "Too many requests");
    }
}

//! # HTTP client wrapper
//!
//! A thin layer over [`reqwest`] that every gateway in this crate talks through.
//! It is responsible for four things and nothing else:
//!
//! 1. **URL resolution**: absolute URLs pass through untouched, relative paths are
//!    joined under the client's configured base (see [`resolve_url`]).
//! 2. **Credential injection**: each client carries at most one [`Credential`],
//!    attached to every outgoing request together with `Content-Type: application/json`
//!    and a fixed timeout (30 seconds by default).
//! 3. **Error normalization**: transport failures and non-2xx responses both become a
//!    single [`ApiError`] shape: a human-readable message, a status marker, the raw
//!    payload (if any) and the original cause.
//! 4. **Authentication loss**: a `401` fires the registered [`UnauthorizedHook`]
//!    exactly once for that response. The request is never retried here.
//!
//! Clients are plain values: build one per upstream service and hand it to the gateway
//! that owns it. There is no process-wide instance.
//!
//! ## Example
//! ```no_run
//! use medvec::client::{ApiClient, ClientConfig, Credential, RequestSpec};
//! use serde_json::Value;
//!
//! # async fn demo() -> Result<(), medvec::client::ApiError> {
//! let client = ApiClient::new(
//!     ClientConfig::new("https://my-index.svc.pinecone.io").with_credential(Credential::ApiKey {
//!         key: "pcsk_...".into(),
//!         version: "2025-04".into(),
//!     }),
//! )?;
//! let response = client.request::<Value>(RequestSpec::get("namespaces")).await?;
//! println!("{} -> {}", response.status, response.data);
//! # Ok(()) }
//! ```

use reqwest::{
    Method, StatusCode, Url,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Timeout applied to every request unless the [`ClientConfig`] overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const API_KEY_HEADER: &str = "api-key";
const API_VERSION_HEADER: &str = "x-pinecone-api-version";
const UNKNOWN_ERROR: &str = "Unknown error";

/// Side effect fired when an upstream answers `401 Unauthorized`.
pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

/// A static credential attached to every request a client sends.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// `Authorization: Bearer <token>` (embedding provider).
    Bearer { token: String },
    /// `Api-Key: <key>` plus `X-Pinecone-API-Version: <version>` (vector store).
    ApiKey { key: String, version: String },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Bearer { .. } => f.write_str("Bearer(***)"),
            Credential::ApiKey { version, .. } => write!(f, "ApiKey(***, version={version})"),
        }
    }
}

impl Credential {
    fn headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        match self {
            Credential::Bearer { token } => {
                headers.insert(AUTHORIZATION, sensitive_value(&format!("Bearer {token}"))?);
            }
            Credential::ApiKey { key, version } => {
                headers.insert(HeaderName::from_static(API_KEY_HEADER), sensitive_value(key)?);
                headers.insert(
                    HeaderName::from_static(API_VERSION_HEADER),
                    sensitive_value(version)?,
                );
            }
        }
        Ok(headers)
    }
}

fn sensitive_value(raw: &str) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(raw).map_err(|_| ApiError {
        message: "credential contains characters that are not valid in an HTTP header".into(),
        status: ErrorStatus::Transport(TransportCode::Request),
        data: None,
        source: None,
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Construction parameters for an [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base that relative request paths are joined under.
    pub base_url: String,
    /// Credential injected into every request, if any.
    pub credential: Option<Credential>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credential: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A logical request: method, path (relative or absolute), optional id segment,
/// optional JSON body and query parameters.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub id: Option<String>,
    pub body: Option<JsonValue>,
    pub params: Vec<(String, String)>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            id: None,
            body: None,
            params: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append `/<id>` to a relative path.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Serialize `body` as the JSON payload.
    ///
    /// The payload is only sent for `POST`, `PUT` and `PATCH`.
    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|err| ApiError {
            message: format!("failed to encode request body: {err}"),
            status: ErrorStatus::Transport(TransportCode::Encode),
            data: None,
            source: Some(ApiErrorCause::Json(err)),
        })?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    fn carries_body(&self) -> bool {
        self.method == Method::POST || self.method == Method::PUT || self.method == Method::PATCH
    }
}

/// Uniform envelope for successful responses.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    /// Decoded payload.
    pub data: T,
    /// HTTP status code.
    pub status: u16,
    /// Canonical status text (`"OK"`, `"Created"`, ...).
    pub message: String,
}

/// Why a request failed before a usable HTTP status existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCode {
    Timeout,
    Connect,
    Decode,
    Encode,
    InvalidUrl,
    Request,
}

impl TransportCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportCode::Timeout => "timeout",
            TransportCode::Connect => "connect",
            TransportCode::Decode => "decode",
            TransportCode::Encode => "encode",
            TransportCode::InvalidUrl => "invalid_url",
            TransportCode::Request => "request",
        }
    }
}

/// Status marker carried by every [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// A response arrived with this HTTP status.
    Http(u16),
    /// No usable response.
    Transport(TransportCode),
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStatus::Http(code) => write!(f, "{code}"),
            ErrorStatus::Transport(code) => f.write_str(code.as_str()),
        }
    }
}

/// The lower-level error an [`ApiError`] was built from.
#[derive(Debug, Error)]
pub enum ApiErrorCause {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Normalized failure shape for every request made through an [`ApiClient`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    /// Server-provided message, else the transport message, else `"Unknown error"`.
    pub message: String,
    /// HTTP status if a response arrived, otherwise a transport code.
    pub status: ErrorStatus,
    /// Raw response payload, if any.
    pub data: Option<JsonValue>,
    /// Original cause.
    #[source]
    pub source: Option<ApiErrorCause>,
}

impl ApiError {
    /// The "invalid URL" failure raised before any I/O happens.
    pub fn invalid_url(target: &str) -> Self {
        Self {
            message: format!("invalid URL for request: {target:?}"),
            status: ErrorStatus::Transport(TransportCode::InvalidUrl),
            data: None,
            source: None,
        }
    }

    /// HTTP status code, when the failure came with a response.
    pub fn http_status(&self) -> Option<u16> {
        match self.status {
            ErrorStatus::Http(code) => Some(code),
            ErrorStatus::Transport(_) => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.http_status() == Some(StatusCode::UNAUTHORIZED.as_u16())
    }

    fn from_transport(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            TransportCode::Timeout
        } else if err.is_connect() {
            TransportCode::Connect
        } else if err.is_decode() {
            TransportCode::Decode
        } else {
            TransportCode::Request
        };
        let status = match err.status() {
            Some(status) => ErrorStatus::Http(status.as_u16()),
            None => ErrorStatus::Transport(code),
        };
        let message = err.to_string();
        Self {
            message: if message.is_empty() {
                UNKNOWN_ERROR.to_string()
            } else {
                message
            },
            status,
            data: None,
            source: Some(ApiErrorCause::Http(err)),
        }
    }

    fn from_status(status: StatusCode, body: String) -> Self {
        let data = if body.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str::<JsonValue>(&body).unwrap_or(JsonValue::String(body)))
        };
        let message = data
            .as_ref()
            .and_then(server_message)
            .unwrap_or_else(|| format!("Request failed with status code {}", status.as_u16()));
        Self {
            message,
            status: ErrorStatus::Http(status.as_u16()),
            data,
            source: None,
        }
    }

    fn undecodable(status: StatusCode, err: serde_json::Error, raw: &[u8]) -> Self {
        let data = serde_json::from_slice::<JsonValue>(raw)
            .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(raw).into_owned()));
        Self {
            message: format!(
                "failed to decode response body (status {}): {err}",
                status.as_u16()
            ),
            status: ErrorStatus::Transport(TransportCode::Decode),
            data: Some(data),
            source: Some(ApiErrorCause::Json(err)),
        }
    }
}

/// `{"message": ..}` or the vector store's `{"error": {"message": ..}}`.
fn server_message(data: &JsonValue) -> Option<String> {
    data.get("message")
        .or_else(|| data.pointer("/error/message"))
        .and_then(JsonValue::as_str)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Resolve the target URL for a request.
///
/// - An absolute `path` (`http://` / `https://`) is returned as-is; `id` is ignored.
/// - A relative `path` is joined under `base_url` with exactly one `/`, then `/<id>`
///   is appended when given, percent-encoded as a single path segment.
///
/// # Errors
/// [`ApiError::invalid_url`] when the result is empty or does not parse as a URL.
///
/// # Examples
/// ```rust
/// use medvec::client::resolve_url;
///
/// let url = resolve_url("https://api.example.com/", "/vectors/list", None).unwrap();
/// assert_eq!(url.as_str(), "https://api.example.com/vectors/list");
///
/// let url = resolve_url("https://ignored.example.com", "https://other.example.com/x", None).unwrap();
/// assert_eq!(url.as_str(), "https://other.example.com/x");
/// ```
pub fn resolve_url(base_url: &str, path: &str, id: Option<&str>) -> Result<Url, ApiError> {
    let target = if is_absolute(path) {
        path.to_string()
    } else {
        let base = base_url.trim_end_matches('/');
        let relative = path.trim_start_matches('/');
        let joined = match (base.is_empty(), relative.is_empty()) {
            (true, true) => String::new(),
            (true, false) => relative.to_string(),
            (false, true) => base.to_string(),
            (false, false) => format!("{base}/{relative}"),
        };
        joined
    };

    if target.is_empty() {
        return Err(ApiError::invalid_url(path));
    }
    let mut url = Url::parse(&target).map_err(|_| ApiError::invalid_url(&target))?;
    // The id is one path segment, percent-encoded.
    if let Some(id) = id.filter(|id| !id.is_empty() && !is_absolute(path)) {
        url.path_segments_mut()
            .map_err(|_| ApiError::invalid_url(&target))?
            .pop_if_empty()
            .push(id);
    }
    Ok(url)
}

/// An explicitly constructed HTTP client bound to one upstream service.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("on_unauthorized", &self.on_unauthorized.is_some())
            .finish()
    }
}

impl ApiClient {
    /// Build a client with the default JSON content type, the configured timeout and
    /// the configured credential baked into its default headers.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(credential) = &config.credential {
            headers.extend(credential.headers()?);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(ApiError::from_transport)?;

        debug!(base_url = %config.base_url, credential = ?config.credential, "HTTP client created");

        Ok(Self {
            base_url: config.base_url,
            timeout: config.timeout,
            http,
            on_unauthorized: None,
        })
    }

    /// Register the side effect fired on every `401` response.
    pub fn on_unauthorized(mut self, hook: UnauthorizedHook) -> Self {
        self.on_unauthorized = Some(hook);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `spec` and decode a successful JSON body into `T`.
    ///
    /// # Errors
    /// Every failure is an [`ApiError`]; see the module docs for how it is filled in.
    pub async fn request<T: DeserializeOwned>(
        &self,
        spec: RequestSpec,
    ) -> Result<ApiResponse<T>, ApiError> {
        let url = resolve_url(&self.base_url, &spec.path, spec.id.as_deref())?;
        let started = Instant::now();
        debug!(method = %spec.method, url = %url, params = ?spec.params, "API request");

        let mut builder = self.http.request(spec.method.clone(), url.clone());
        if !spec.params.is_empty() {
            builder = builder.query(&spec.params);
        }
        if spec.carries_body() {
            if let Some(body) = &spec.body {
                builder = builder.json(body);
            }
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                let err = ApiError::from_transport(err);
                error!(method = %spec.method, url = %url, status = %err.status, "API transport error: {}", err.message);
                return Err(err);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    warn!(method = %spec.method, url = %url, status = status.as_u16(), "could not read error body: {err}");
                    String::new()
                }
            };
            let err = ApiError::from_status(status, body);
            if status == StatusCode::UNAUTHORIZED {
                if let Some(hook) = &self.on_unauthorized {
                    hook();
                }
            }
            error!(
                method = %spec.method,
                url = %url,
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "API error: {}",
                err.message
            );
            return Err(err);
        }

        let raw = response.bytes().await.map_err(ApiError::from_transport)?;
        let data = serde_json::from_slice::<T>(&raw)
            .map_err(|err| ApiError::undecodable(status, err, &raw))?;

        debug!(
            method = %spec.method,
            url = %url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "API response"
        );

        Ok(ApiResponse {
            data,
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or_default().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() {
        let _ = tracing_subscriber::fmt::try_init();
    }

    #[test]
    fn test_resolve_relative_path_under_base() {
        let url = resolve_url("http://localhost:3000/api", "vectors/list", None).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/vectors/list");

        let url = resolve_url("http://localhost:3000/api/", "/vectors/list", None).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/vectors/list");
    }

    #[test]
    fn test_resolve_relative_path_with_id() {
        let url = resolve_url("https://index.example.io", "namespaces", Some("cardiology")).unwrap();
        assert_eq!(url.as_str(), "https://index.example.io/namespaces/cardiology");
    }

    #[test]
    fn test_resolve_id_is_one_encoded_segment() {
        let url = resolve_url("https://index.example.io/", "namespaces", Some("x#y")).unwrap();
        assert_eq!(url.as_str(), "https://index.example.io/namespaces/x%23y");
        assert_eq!(url.fragment(), None);

        let url = resolve_url("https://index.example.io", "namespaces/", Some("a/b?c")).unwrap();
        assert_eq!(url.as_str(), "https://index.example.io/namespaces/a%2Fb%3Fc");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_resolve_absolute_url_passes_through() {
        let absolute = "https://api.jina.ai/v1/embeddings?x=1";
        let url = resolve_url("http://localhost:3000/api", absolute, Some("ignored")).unwrap();
        assert_eq!(url.as_str(), absolute);
    }

    #[test]
    fn test_resolve_empty_target_is_invalid() {
        let err = resolve_url("", "", None).unwrap_err();
        assert_eq!(err.status, ErrorStatus::Transport(TransportCode::InvalidUrl));
        assert!(err.message.contains("invalid URL"));
    }

    #[test]
    fn test_resolve_unparseable_target_is_invalid() {
        let err = resolve_url("", "not a url", None).unwrap_err();
        assert_eq!(err.status, ErrorStatus::Transport(TransportCode::InvalidUrl));
    }

    #[test]
    fn test_server_message_preferred() {
        let err = ApiError::from_status(
            StatusCode::BAD_REQUEST,
            r#"{"message":"namespace not found"}"#.to_string(),
        );
        assert_eq!(err.message, "namespace not found");
        assert_eq!(err.http_status(), Some(400));
        assert_eq!(err.data, Some(json!({"message": "namespace not found"})));
    }

    #[test]
    fn test_nested_vector_store_message() {
        let err = ApiError::from_status(
            StatusCode::NOT_FOUND,
            r#"{"error":{"code":"NOT_FOUND","message":"Resource idx not found"},"status":404}"#
                .to_string(),
        );
        assert_eq!(err.message, "Resource idx not found");
    }

    #[test]
    fn test_fallback_message_without_server_message() {
        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream down".to_string());
        assert_eq!(err.message, "Request failed with status code 502");
        assert_eq!(err.data, Some(JsonValue::String("upstream down".into())));

        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, String::new());
        assert!(err.data.is_none());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let bearer = Credential::Bearer {
            token: "jina_secret".into(),
        };
        assert!(!format!("{bearer:?}").contains("jina_secret"));
    }

    #[test]
    fn test_body_only_for_mutating_methods() {
        assert!(RequestSpec::post("query").carries_body());
        assert!(RequestSpec::patch("query").carries_body());
        assert!(!RequestSpec::get("namespaces").carries_body());
        assert!(!RequestSpec::delete("namespaces").carries_body());
    }

    #[tokio::test]
    async fn test_success_envelope_and_headers() {
        setup();
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/namespaces")
                    .header("api-key", "pc-key")
                    .header("x-pinecone-api-version", "2025-04")
                    .header("content-type", "application/json");
                then.status(200).json_body(json!({"namespaces": []}));
            })
            .await;

        let client = ApiClient::new(ClientConfig::new(server.base_url()).with_credential(
            Credential::ApiKey {
                key: "pc-key".into(),
                version: "2025-04".into(),
            },
        ))
        .unwrap();

        let response = client
            .request::<JsonValue>(RequestSpec::get("namespaces"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 200);
        assert_eq!(response.message, "OK");
        assert_eq!(response.data, json!({"namespaces": []}));
    }

    #[tokio::test]
    async fn test_bearer_credential_and_body() {
        setup();
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/embeddings")
                    .header("authorization", "Bearer jina-token")
                    .json_body(json!({"input": ["hello"]}));
                then.status(201).json_body(json!({"ok": true}));
            })
            .await;

        let client = ApiClient::new(ClientConfig::new(server.base_url()).with_credential(
            Credential::Bearer {
                token: "jina-token".into(),
            },
        ))
        .unwrap();

        let spec = RequestSpec::post("v1/embeddings")
            .with_json(&json!({"input": ["hello"]}))
            .unwrap();
        let response = client.request::<JsonValue>(spec).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 201);
        assert_eq!(response.message, "Created");
    }

    #[tokio::test]
    async fn test_unauthorized_fires_hook_once_and_rejects() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/namespaces");
                then.status(401)
                    .json_body(json!({"message": "Invalid API key"}));
            })
            .await;

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let client = ApiClient::new(ClientConfig::new(server.base_url()))
            .unwrap()
            .on_unauthorized(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        let err = client
            .request::<JsonValue>(RequestSpec::get("namespaces"))
            .await
            .unwrap_err();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(err.is_unauthorized());
        assert_eq!(err.message, "Invalid API key");
    }

    #[tokio::test]
    async fn test_non_401_error_does_not_fire_hook() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/namespaces");
                then.status(500);
            })
            .await;

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let client = ApiClient::new(ClientConfig::new(server.base_url()))
            .unwrap()
            .on_unauthorized(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        let err = client
            .request::<JsonValue>(RequestSpec::get("namespaces"))
            .await
            .unwrap_err();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(err.status, ErrorStatus::Http(500));
        assert_eq!(err.message, "Request failed with status code 500");
    }

    #[tokio::test]
    async fn test_query_params_are_repeated() {
        setup();
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/vectors/fetch")
                    .query_param("ids", "a")
                    .query_param("ids", "b")
                    .query_param("namespace", "ns1");
                then.status(200).json_body(json!({"vectors": {}}));
            })
            .await;

        let client = ApiClient::new(ClientConfig::new(server.base_url())).unwrap();
        let spec = RequestSpec::get("vectors/fetch")
            .with_params([("ids", "a"), ("ids", "b")])
            .with_param("namespace", "ns1");
        client.request::<JsonValue>(spec).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_failure_is_normalized() {
        setup();
        // Nothing listens on port 9 on the loopback interface in CI.
        let client = ApiClient::new(
            ClientConfig::new("http://127.0.0.1:9").with_timeout(Duration::from_secs(2)),
        )
        .unwrap();
        let err = client
            .request::<JsonValue>(RequestSpec::get("namespaces"))
            .await
            .unwrap_err();

        assert!(matches!(err.status, ErrorStatus::Transport(_)));
        assert!(!err.message.is_empty());
        assert!(err.source.is_some());
    }

    #[tokio::test]
    async fn test_truncated_error_body_still_normalizes() {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        setup();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request);
            // Promises 100 bytes, sends 5, then hangs up.
            stream
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 100\r\nConnection: close\r\n\r\nshort")
                .unwrap();
        });

        let client = ApiClient::new(ClientConfig::new(format!("http://{addr}"))).unwrap();
        let err = client
            .request::<JsonValue>(RequestSpec::get("namespaces"))
            .await
            .unwrap_err();
        server.join().unwrap();

        assert_eq!(err.http_status(), Some(500));
        assert_eq!(err.message, "Request failed with status code 500");
        assert!(err.data.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/namespaces");
                then.status(200).body("not json");
            })
            .await;

        let client = ApiClient::new(ClientConfig::new(server.base_url())).unwrap();
        let err = client
            .request::<JsonValue>(RequestSpec::get("namespaces"))
            .await
            .unwrap_err();

        assert_eq!(err.status, ErrorStatus::Transport(TransportCode::Decode));
        assert_eq!(err.data, Some(JsonValue::String("not json".into())));
    }
}

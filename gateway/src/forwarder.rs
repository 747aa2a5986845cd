use crate::config::Config;
use crate::errors::{GatewayError, Result};
use crate::headers::propagate;
use crate::normalizer::NormalizedResponse;
use crate::upstream::{AttemptLabel, UpstreamAttempt, UpstreamClient};
use bytes::Bytes;
use http::{HeaderMap, Method, Version};
use serde_json::Value;
use std::sync::Arc;

/// An inbound request reduced to what the gateway forwards.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path below `/proxy/`, without leading slash.
    pub target_path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub version: Version,
    /// `None` when the inbound body was empty.
    pub body: Option<Bytes>,
}

impl ForwardRequest {
    /// Parses the inbound body as JSON.
    pub fn json_body(&self) -> Result<Option<Value>> {
        self.body
            .as_ref()
            .map(|bytes| {
                serde_json::from_slice(bytes).map_err(|e| {
                    GatewayError::BadRequest(format!("Request body is not valid JSON: {e}"))
                })
            })
            .transpose()
    }
}

/// When the inbound query string is appended to the upstream URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPolicy {
    GetOnly,
    Always,
}

/// Forwards arbitrary `{method, path}` pairs to the backend.
#[derive(Clone)]
pub struct Forwarder {
    upstream: UpstreamClient,
    config: Arc<Config>,
}

impl Forwarder {
    pub fn new(upstream: UpstreamClient, config: Arc<Config>) -> Self {
        Forwarder { upstream, config }
    }

    pub fn upstream_url(&self, request: &ForwardRequest, policy: QueryPolicy) -> String {
        let url = self.config.upstream.url_for(&request.target_path, true);
        let include_query = policy == QueryPolicy::Always || request.method == Method::GET;

        match request.query.as_deref() {
            Some(query) if include_query && !query.is_empty() => format!("{url}?{query}"),
            _ => url,
        }
    }

    pub async fn forward(&self, request: &ForwardRequest) -> NormalizedResponse {
        self.forward_with(request, QueryPolicy::GetOnly).await
    }

    pub async fn forward_with(
        &self,
        request: &ForwardRequest,
        policy: QueryPolicy,
    ) -> NormalizedResponse {
        self.try_forward(request, policy)
            .await
            .unwrap_or_else(GatewayError::into_normalized)
    }

    async fn try_forward(
        &self,
        request: &ForwardRequest,
        policy: QueryPolicy,
    ) -> Result<NormalizedResponse> {
        let body = match request.method {
            Method::GET => None,
            Method::POST | Method::PATCH => request
                .json_body()?
                .map(|value| serde_json::to_vec(&value).map(Bytes::from))
                .transpose()
                .map_err(|e| GatewayError::Internal(format!("Failed to encode body: {e}")))?,
            ref other => return Err(GatewayError::MethodNotAllowed(other.clone())),
        };

        let attempt = UpstreamAttempt {
            label: AttemptLabel::Forward,
            url: self.upstream_url(request, policy),
            method: request.method.clone(),
            headers: propagate(&request.headers, request.version),
            body,
            timeout: self.config.timeouts.proxy(),
        };

        let response = self.upstream.send(&attempt).await?;

        Ok(if response.status.is_success() {
            NormalizedResponse::success(response.status, &response.body)
        } else {
            NormalizedResponse::passthrough_failure(response.status, &response.body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{MockResponse, MockUpstream, closed_port, test_config};
    use http::StatusCode;
    use http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderValue};
    use serde_json::json;
    use std::time::Duration;
    use url::Url;

    fn forwarder(config: Arc<Config>) -> Forwarder {
        let upstream = UpstreamClient::new(&config.upstream).unwrap();
        Forwarder::new(upstream, config)
    }

    fn request(method: Method, path: &str, query: Option<&str>, body: Option<&str>) -> ForwardRequest {
        ForwardRequest {
            method,
            target_path: path.to_string(),
            query: query.map(String::from),
            headers: HeaderMap::new(),
            version: Version::HTTP_11,
            body: body.map(|b| Bytes::from(b.to_string())),
        }
    }

    #[tokio::test]
    async fn test_status_and_body_passthrough() {
        let upstream =
            MockUpstream::start(|_| MockResponse::json(201, json!({"id": 42}))).await;
        let forwarder = forwarder(test_config(upstream.url()));

        let response = forwarder
            .forward(&request(Method::POST, "items", None, Some(r#"{"name":"x"}"#)))
            .await;

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.body, json!({"id": 42}));

        let recorded = upstream.requests();
        assert_eq!(recorded[0].path, "/api/items");
        assert_eq!(recorded[0].method, Method::POST);
        assert_eq!(recorded[0].body.as_ref(), br#"{"name":"x"}"#);
        assert_eq!(
            recorded[0].headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_query_only_forwarded_for_get() {
        let upstream = MockUpstream::start(|_| MockResponse::json(200, json!({}))).await;
        let forwarder = forwarder(test_config(upstream.url()));

        forwarder
            .forward(&request(Method::GET, "reports/sales", Some("from=2024-01-01"), None))
            .await;
        forwarder
            .forward(&request(Method::PATCH, "reports/sales", Some("from=2024-01-01"), Some("{}")))
            .await;
        forwarder
            .forward_with(
                &request(Method::POST, "auth/resend-verification", Some("email=a%40b.c"), None),
                QueryPolicy::Always,
            )
            .await;

        let recorded = upstream.requests();
        assert_eq!(recorded[0].query.as_deref(), Some("from=2024-01-01"));
        assert_eq!(recorded[1].query, None);
        assert_eq!(recorded[2].query.as_deref(), Some("email=a%40b.c"));
        // Empty POST body is not sent
        assert!(recorded[2].body.is_empty());
    }

    #[tokio::test]
    async fn test_get_never_sends_body() {
        let upstream = MockUpstream::start(|_| MockResponse::json(200, json!({}))).await;
        let forwarder = forwarder(test_config(upstream.url()));

        forwarder
            .forward(&request(Method::GET, "customers", None, Some(r#"{"ignored":true}"#)))
            .await;

        assert!(upstream.requests()[0].body.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_never_reaches_upstream() {
        let upstream = MockUpstream::start(|_| MockResponse::json(200, json!({}))).await;
        let forwarder = forwarder(test_config(upstream.url()));

        let response = forwarder
            .forward(&request(Method::POST, "auth/register", None, Some("not-json")))
            .await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(response.body["error"].is_string());
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_non_json_success_is_wrapped() {
        let upstream = MockUpstream::start(|_| MockResponse::text(200, "OK! 7F3KQ9ZX2M")).await;
        let forwarder = forwarder(test_config(upstream.url()));

        let response = forwarder.forward(&request(Method::GET, "ping", None, None)).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, json!({"message": "OK! 7F3KQ9ZX2M"}));
    }

    #[tokio::test]
    async fn test_upstream_failure_status_preserved() {
        let upstream = MockUpstream::start(|_| {
            MockResponse::json(404, json!({"message": "Customer not found"}))
        })
        .await;
        let forwarder = forwarder(test_config(upstream.url()));

        let response = forwarder
            .forward(&request(Method::GET, "customers/9", None, None))
            .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.body["message"], json!("Customer not found"));
        assert_eq!(response.body["error"], json!("Customer not found"));
    }

    #[tokio::test]
    async fn test_credentials_propagated() {
        let upstream = MockUpstream::start(|_| MockResponse::json(200, json!({}))).await;
        let forwarder = forwarder(test_config(upstream.url()));

        let mut req = request(Method::GET, "bookings", None, None);
        req.headers
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer token-1"));
        req.headers
            .insert(COOKIE, HeaderValue::from_static("sid=xyz"));
        forwarder.forward(&req).await;

        let recorded = &upstream.requests()[0];
        assert_eq!(recorded.headers.get(AUTHORIZATION).unwrap(), "Bearer token-1");
        assert_eq!(recorded.headers.get(COOKIE).unwrap(), "sid=xyz");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_504() {
        let upstream = MockUpstream::start(|_| {
            MockResponse::json(200, json!({})).delayed(Duration::from_secs(3))
        })
        .await;
        let mut config = (*test_config(upstream.url())).clone();
        config.timeouts.proxy_secs = 1;
        let forwarder = forwarder(Arc::new(config));

        let response = forwarder.forward(&request(Method::GET, "slow", None, None)).await;
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert!(
            response.body["error"]
                .as_str()
                .unwrap()
                .to_lowercase()
                .contains("timeout")
        );
    }

    #[tokio::test]
    async fn test_connection_refused_maps_to_502() {
        let base = Url::parse(&format!("http://127.0.0.1:{}", closed_port())).unwrap();
        let forwarder = forwarder(test_config(base));

        let response = forwarder.forward(&request(Method::GET, "x", None, None)).await;
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert!(
            response.body["details"]
                .as_str()
                .unwrap()
                .contains("127.0.0.1")
        );
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let upstream = MockUpstream::start(|_| MockResponse::json(200, json!({}))).await;
        let forwarder = forwarder(test_config(upstream.url()));

        let response = forwarder
            .forward(&request(Method::DELETE, "items/1", None, None))
            .await;
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(upstream.calls(), 0);
    }

    #[test]
    fn test_upstream_url() {
        let forwarder = forwarder(test_config(Url::parse("http://backend:8080///").unwrap()));
        assert_eq!(
            forwarder.upstream_url(
                &request(Method::GET, "auth/verify", Some("token=abc"), None),
                QueryPolicy::GetOnly
            ),
            "http://backend:8080/api/auth/verify?token=abc"
        );
        assert_eq!(
            forwarder.upstream_url(
                &request(Method::POST, "auth/register", Some("x=1"), None),
                QueryPolicy::GetOnly
            ),
            "http://backend:8080/api/auth/register"
        );
    }
}

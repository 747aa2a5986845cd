use crate::config::UpstreamConfig;
use crate::errors::{GatewayError, Result};
use crate::metrics_defs::{UPSTREAM_ATTEMPTS, UPSTREAM_DURATION};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Position of an attempt within the request it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptLabel {
    Forward,
    Primary,
    Fallback,
}

impl AttemptLabel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AttemptLabel::Forward => "forward",
            AttemptLabel::Primary => "primary",
            AttemptLabel::Fallback => "fallback",
        }
    }
}

/// A single call to the backend API.
#[derive(Debug, Clone)]
pub struct UpstreamAttempt {
    pub label: AttemptLabel,
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Issues bounded HTTP calls to the backend. Never retries; retry policy
/// belongs to the caller.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to build HTTP client: {e}")))?;

        if config.accept_invalid_certs {
            tracing::warn!(
                base_url = config.trimmed_base(),
                "TLS certificate verification is disabled for the upstream"
            );
        }

        Ok(UpstreamClient {
            client,
            base_url: config.trimmed_base().to_string(),
        })
    }

    /// Sends the attempt and collects the full response body.
    ///
    /// The timeout covers connecting, sending, receiving headers and
    /// collecting the body.
    pub async fn send(&self, attempt: &UpstreamAttempt) -> Result<UpstreamResponse> {
        let started = Instant::now();

        let mut request = self
            .client
            .request(attempt.method.clone(), &attempt.url)
            .headers(attempt.headers.clone());
        if let Some(body) = &attempt.body {
            request = request.body(body.clone());
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(UpstreamResponse { status, body })
        };

        let result = match timeout(attempt.timeout, exchange).await {
            // Elapsed: the attempt exceeded its bound
            Err(_) => Err(GatewayError::UpstreamTimeout {
                url: strip_query(&attempt.url).to_string(),
                timeout: attempt.timeout,
            }),
            Ok(Err(e)) => Err(self.map_reqwest_error(e, attempt)),
            Ok(Ok(response)) => Ok(response),
        };

        let elapsed = started.elapsed();
        let outcome = match &result {
            Ok(response) => {
                tracing::debug!(
                    attempt = attempt.label.as_str(),
                    method = %attempt.method,
                    url = strip_query(&attempt.url),
                    status = response.status.as_u16(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Upstream responded"
                );
                if response.status.is_success() {
                    "success"
                } else {
                    "failure"
                }
            }
            Err(e) => {
                tracing::warn!(
                    attempt = attempt.label.as_str(),
                    method = %attempt.method,
                    url = strip_query(&attempt.url),
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Upstream attempt failed"
                );
                e.kind()
            }
        };

        shared::counter!(
            UPSTREAM_ATTEMPTS,
            "attempt" => attempt.label.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        shared::histogram!(UPSTREAM_DURATION, "attempt" => attempt.label.as_str())
            .record(elapsed.as_secs_f64());

        result
    }

    fn map_reqwest_error(&self, error: reqwest::Error, attempt: &UpstreamAttempt) -> GatewayError {
        if error.is_timeout() {
            return GatewayError::UpstreamTimeout {
                url: strip_query(&attempt.url).to_string(),
                timeout: attempt.timeout,
            };
        }

        // The URL may carry tokens in its query string
        let error = error.without_url();

        if error.is_connect() || error.is_request() || error.is_body() || error.is_decode() {
            GatewayError::UpstreamTransportFailure {
                base_url: self.base_url.clone(),
                reason: error.to_string(),
            }
        } else {
            GatewayError::Internal(format!("Upstream client error: {error}"))
        }
    }
}

/// Drops the query string, which may carry one-time tokens.
pub fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

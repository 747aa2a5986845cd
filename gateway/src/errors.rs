use crate::normalizer::{FailureEnvelope, NormalizedResponse};
use http::{Method, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Failures raised by the gateway itself.
///
/// Non-2xx answers from a reachable upstream are not errors here; they are
/// classified and relayed (see `classifier`).
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Missing Authorization header")]
    MissingCredentials,

    #[error("Method {0} is not supported")]
    MethodNotAllowed(Method),

    #[error("No route for {0}")]
    NotFound(String),

    #[error("Could not reach upstream at {base_url}: {reason}")]
    UpstreamTransportFailure { base_url: String, reason: String },

    #[error("Upstream did not answer within {}s: {url}", .timeout.as_secs())]
    UpstreamTimeout { url: String, timeout: Duration },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::MissingCredentials => StatusCode::UNAUTHORIZED,
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::UpstreamTransportFailure { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for the `error` field of the envelope and for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::MissingCredentials => "missing_credentials",
            GatewayError::MethodNotAllowed(_) => "method_not_allowed",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::UpstreamTransportFailure { .. } => "upstream_unreachable",
            GatewayError::UpstreamTimeout { .. } => "upstream_timeout",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    fn public_error(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "Invalid request",
            GatewayError::MissingCredentials => "Unauthorized",
            GatewayError::MethodNotAllowed(_) => "Method not allowed",
            GatewayError::NotFound(_) => "Not found",
            GatewayError::UpstreamTransportFailure { .. } => "Could not connect to backend",
            GatewayError::UpstreamTimeout { .. } => "Backend request timeout",
            GatewayError::Internal(_) => "Internal server error",
        }
    }

    /// Converts the error into the uniform failure envelope.
    ///
    /// Internal errors only expose a generic message.
    pub fn into_normalized(self) -> NormalizedResponse {
        let status = self.status();
        let details = match &self {
            GatewayError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal gateway error");
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        };

        NormalizedResponse::from_envelope(
            status,
            FailureEnvelope::new(self.public_error().to_string(), details.into()),
        )
    }
}

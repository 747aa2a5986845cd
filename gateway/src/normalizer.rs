use crate::classifier::{ClassifiedFailure, FailureFields, GENERIC_FAILURE_MESSAGE};
use http::{Response, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use shared::http::{ResponseBody, json_response};

/// Uniform body for every failure the gateway reports.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailureEnvelope {
    pub error: String,
    pub details: Value,
    /// Mirrors `details` for clients that read `message`.
    pub message: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl FailureEnvelope {
    pub fn new(error: String, details: Value) -> Self {
        FailureEnvelope {
            error,
            message: details.clone(),
            details,
            email_verified: None,
            email: None,
        }
    }
}

impl From<&ClassifiedFailure> for FailureEnvelope {
    fn from(failure: &ClassifiedFailure) -> Self {
        let mut envelope = FailureEnvelope::new(failure.error_message(), failure.detail_value());
        if failure.is_email_unverified {
            envelope.email_verified = Some(false);
            envelope.email = failure.email.clone();
        }
        envelope
    }
}

/// Status and JSON body returned to the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl NormalizedResponse {
    /// Upstream success: the JSON body as-is, or `{message: text}` when the
    /// body is not JSON.
    pub fn success(status: StatusCode, raw_body: &[u8]) -> Self {
        NormalizedResponse {
            status,
            body: parse_or_wrap(raw_body),
        }
    }

    /// Classified failure at the status of the attempt that produced it.
    pub fn failure(failure: &ClassifiedFailure) -> Self {
        Self::from_envelope(failure.status, FailureEnvelope::from(failure))
    }

    /// Generic proxy failure: the upstream status and body are kept; an
    /// `error` field is added when the body has none.
    pub fn passthrough_failure(status: StatusCode, raw_body: &[u8]) -> Self {
        let body = match parse_or_wrap(raw_body) {
            Value::Object(mut object) => {
                if !object.contains_key("error") {
                    let error = FailureFields::from_body(&Value::Object(object.clone()))
                        .best_message()
                        .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());
                    object.insert("error".to_string(), Value::String(error));
                }
                Value::Object(object)
            }
            other => {
                let error = other
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .unwrap_or(GENERIC_FAILURE_MESSAGE)
                    .to_string();
                let mut object = Map::new();
                object.insert("error".to_string(), Value::String(error));
                object.insert("message".to_string(), other);
                Value::Object(object)
            }
        };

        NormalizedResponse { status, body }
    }

    pub fn from_envelope(status: StatusCode, envelope: FailureEnvelope) -> Self {
        let body = serde_json::to_value(envelope).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize failure envelope");
            Value::Object(Map::new())
        });
        NormalizedResponse { status, body }
    }

    /// Adds `expired: true` to an object body.
    pub fn mark_expired(&mut self) {
        if let Value::Object(object) = &mut self.body {
            object.insert("expired".to_string(), Value::Bool(true));
        }
    }

    pub fn into_response(self) -> Response<ResponseBody> {
        json_response(self.status, &self.body)
    }
}

fn parse_or_wrap(raw_body: &[u8]) -> Value {
    serde_json::from_slice(raw_body).unwrap_or_else(|_| {
        let mut object = Map::new();
        object.insert(
            "message".to_string(),
            Value::String(String::from_utf8_lossy(raw_body).into_owned()),
        );
        Value::Object(object)
    })
}

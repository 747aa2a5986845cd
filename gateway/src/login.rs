//! Login forwarding with a single fallback endpoint.
//!
//! The backend has been deployed both with and without the API prefix in
//! front of its auth routes. A failed primary attempt is retried once
//! against the other URL shape, unless the failure says the account must be
//! verified first: that outcome belongs to the account, not the endpoint.

use crate::classifier::{ClassifiedFailure, classify};
use crate::config::Config;
use crate::errors::{GatewayError, Result};
use crate::forwarder::ForwardRequest;
use crate::headers::propagate;
use crate::metrics_defs::{LOGIN_EMAIL_UNVERIFIED, LOGIN_FALLBACKS};
use crate::normalizer::NormalizedResponse;
use crate::upstream::{AttemptLabel, UpstreamAttempt, UpstreamClient, UpstreamResponse};
use bytes::Bytes;
use http::Method;
use serde::Deserialize;
use std::sync::Arc;

pub const LOGIN_PATH: &str = "auth/login";

#[derive(Deserialize)]
struct LoginCredentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// How the primary attempt failed.
enum PrimaryFailure {
    /// Upstream answered with a non-verification failure.
    Application(ClassifiedFailure),
    /// No response to classify: transport failure or timeout.
    Unanswered(GatewayError),
}

enum LoginState {
    Primary,
    Fallback(PrimaryFailure),
    Done(NormalizedResponse),
}

#[derive(Clone)]
pub struct LoginRouter {
    upstream: UpstreamClient,
    config: Arc<Config>,
}

impl LoginRouter {
    pub fn new(upstream: UpstreamClient, config: Arc<Config>) -> Self {
        LoginRouter { upstream, config }
    }

    /// Primary URL first, fallback second.
    pub fn candidate_urls(&self) -> [String; 2] {
        let primary_with_prefix = self.config.login.primary_with_prefix;
        [
            self.config.upstream.url_for(LOGIN_PATH, primary_with_prefix),
            self.config.upstream.url_for(LOGIN_PATH, !primary_with_prefix),
        ]
    }

    pub async fn login(&self, request: &ForwardRequest) -> NormalizedResponse {
        let (body, username) = match validate(request) {
            Ok(validated) => validated,
            Err(e) => return e.into_normalized(),
        };

        let [primary_url, fallback_url] = self.candidate_urls();
        let mut state = LoginState::Primary;

        loop {
            state = match state {
                LoginState::Primary => {
                    let attempt =
                        self.attempt(AttemptLabel::Primary, primary_url.clone(), request, &body);
                    match self.upstream.send(&attempt).await {
                        Ok(response) if response.status.is_success() => {
                            LoginState::Done(success(&response))
                        }
                        Ok(response) => {
                            let failure =
                                classify(response.status, &response.body, Some(username.as_str()));
                            if failure.is_email_unverified {
                                record_unverified(&failure);
                                LoginState::Done(NormalizedResponse::failure(&failure))
                            } else {
                                LoginState::Fallback(PrimaryFailure::Application(failure))
                            }
                        }
                        Err(e) => LoginState::Fallback(PrimaryFailure::Unanswered(e)),
                    }
                }
                LoginState::Fallback(primary) => {
                    match &primary {
                        PrimaryFailure::Application(failure) => tracing::info!(
                            status = failure.status.as_u16(),
                            "Primary login attempt failed, trying fallback endpoint"
                        ),
                        PrimaryFailure::Unanswered(e) => tracing::info!(
                            error = e.kind(),
                            "Primary login attempt unanswered, trying fallback endpoint"
                        ),
                    }
                    shared::counter!(LOGIN_FALLBACKS).increment(1);

                    let attempt =
                        self.attempt(AttemptLabel::Fallback, fallback_url.clone(), request, &body);
                    let outcome = match self.upstream.send(&attempt).await {
                        Ok(response) if response.status.is_success() => success(&response),
                        Ok(response) => {
                            let mut failure =
                                classify(response.status, &response.body, Some(username.as_str()));
                            if let PrimaryFailure::Application(earlier) = &primary {
                                failure = failure.or_fields_from(earlier);
                            }
                            if failure.is_email_unverified {
                                record_unverified(&failure);
                            }
                            NormalizedResponse::failure(&failure)
                        }
                        Err(e) => e.into_normalized(),
                    };
                    LoginState::Done(outcome)
                }
                LoginState::Done(response) => return response,
            };
        }
    }

    fn attempt(
        &self,
        label: AttemptLabel,
        url: String,
        request: &ForwardRequest,
        body: &Bytes,
    ) -> UpstreamAttempt {
        UpstreamAttempt {
            label,
            url,
            method: Method::POST,
            headers: propagate(&request.headers, request.version),
            body: Some(body.clone()),
            timeout: self.config.timeouts.auth(),
        }
    }
}

/// Checks the inbound body and returns it re-encoded, with the username.
fn validate(request: &ForwardRequest) -> Result<(Bytes, String)> {
    let value = request
        .json_body()?
        .ok_or_else(|| GatewayError::BadRequest("Request body is required".to_string()))?;

    let credentials = LoginCredentials::deserialize(&value)
        .map_err(|e| GatewayError::BadRequest(format!("Invalid login request: {e}")))?;
    if credentials.username.trim().is_empty() || credentials.password.is_empty() {
        return Err(GatewayError::BadRequest(
            "Username and password are required".to_string(),
        ));
    }

    let body = serde_json::to_vec(&value)
        .map(Bytes::from)
        .map_err(|e| GatewayError::Internal(format!("Failed to encode body: {e}")))?;

    Ok((body, credentials.username))
}

fn success(response: &UpstreamResponse) -> NormalizedResponse {
    NormalizedResponse::success(response.status, &response.body)
}

fn record_unverified(failure: &ClassifiedFailure) {
    let rule = failure.matched_rule.unwrap_or("unknown");
    tracing::info!(
        status = failure.status.as_u16(),
        rule,
        ruleset_version = failure.ruleset_version,
        "Login refused: email not verified"
    );
    shared::counter!(LOGIN_EMAIL_UNVERIFIED, "rule" => rule).increment(1);
}

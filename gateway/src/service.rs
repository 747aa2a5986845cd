use crate::config::Config;
use crate::errors::{GatewayError, Result};
use crate::forwarder::{ForwardRequest, Forwarder, QueryPolicy};
use crate::headers::CredentialPresence;
use crate::login::LoginRouter;
use crate::metrics_defs::REQUEST_DURATION;
use crate::normalizer::NormalizedResponse;
use crate::routes::{Resolution, RouteKind, RouteTable};
use crate::upstream::UpstreamClient;
use bytes::Bytes;
use http::header::AUTHORIZATION;
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use hyper::service::Service;
use serde_json::Value;
use shared::http::ResponseBody;
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

pub const PROXY_PREFIX: &str = "/proxy/";

const REGISTER_FIELDS: &[&str] = &["username", "emailOrPhoneNumber", "password"];
const CHANGE_PASSWORD_FIELDS: &[&str] = &["currentPassword", "newPassword", "confirmPassword"];

/// Public-facing service: resolves `/proxy/*` routes and hands them to the
/// forwarder or the login router.
#[derive(Clone)]
pub struct GatewayService {
    forwarder: Forwarder,
    login: LoginRouter,
    routes: Arc<RouteTable>,
}

impl GatewayService {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let upstream = UpstreamClient::new(&config.upstream)?;

        Ok(GatewayService {
            forwarder: Forwarder::new(upstream.clone(), config.clone()),
            login: LoginRouter::new(upstream, config),
            routes: Arc::new(RouteTable::default()),
        })
    }

    pub async fn serve<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: Body,
        B::Error: Display,
    {
        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let method = parts.method.clone();
        let path = parts.uri.path().to_string();
        let credentials = CredentialPresence::of(&parts.headers);

        let (route, response) = match body.collect().await {
            Ok(collected) => {
                let bytes = collected.to_bytes();
                let forward_request = ForwardRequest {
                    method: parts.method,
                    target_path: String::new(),
                    query: parts.uri.query().map(String::from),
                    headers: parts.headers,
                    version: parts.version,
                    body: (!bytes.is_empty()).then_some(bytes),
                };
                self.dispatch(&path, forward_request).await
            }
            Err(e) => (
                "unrouted",
                GatewayError::BadRequest(format!("Failed to read request body: {e}"))
                    .into_normalized(),
            ),
        };

        let elapsed = started.elapsed();
        let status = response.status;
        if status.is_server_error() {
            tracing::warn!(
                %method,
                path = %path,
                route,
                status = status.as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                authorization = credentials.authorization,
                cookie = credentials.cookie,
                "Gateway request failed"
            );
        } else {
            tracing::info!(
                %method,
                path = %path,
                route,
                status = status.as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                authorization = credentials.authorization,
                cookie = credentials.cookie,
                "Gateway request"
            );
        }
        shared::histogram!(
            REQUEST_DURATION,
            "route" => route,
            "status" => status.as_str().to_owned()
        )
        .record(elapsed.as_secs_f64());

        response.into_response()
    }

    async fn dispatch(
        &self,
        path: &str,
        mut request: ForwardRequest,
    ) -> (&'static str, NormalizedResponse) {
        let target_path = match path.strip_prefix(PROXY_PREFIX) {
            Some(target) if !target.trim_matches('/').is_empty() => target,
            _ => {
                return (
                    "unrouted",
                    GatewayError::NotFound(path.to_string()).into_normalized(),
                );
            }
        };

        if has_dot_segment(target_path) {
            return (
                "unrouted",
                GatewayError::BadRequest("Path must not contain dot segments".to_string())
                    .into_normalized(),
            );
        }

        let kind = match self.routes.resolve(&request.method, target_path) {
            Resolution::Matched(kind) => kind,
            Resolution::MethodNotAllowed => {
                return (
                    "unrouted",
                    GatewayError::MethodNotAllowed(request.method).into_normalized(),
                );
            }
        };
        request.target_path = target_path.to_string();

        let response = match kind {
            RouteKind::Login => self.login.login(&request).await,
            RouteKind::Register => match require_fields(&request, REGISTER_FIELDS) {
                Ok(_) => self.forwarder.forward(&request).await,
                Err(e) => e.into_normalized(),
            },
            RouteKind::Verify => {
                let mut response = self.forwarder.forward(&request).await;
                if response.status == StatusCode::GONE {
                    response.mark_expired();
                }
                response
            }
            RouteKind::ResendVerification => {
                self.forwarder
                    .forward_with(&request, QueryPolicy::Always)
                    .await
            }
            RouteKind::ChangePassword => match validate_change_password(&request) {
                Ok(()) => self.forwarder.forward(&request).await,
                Err(e) => e.into_normalized(),
            },
            RouteKind::Forward => self.forwarder.forward(&request).await,
        };

        (kind.as_str(), response)
    }
}

/// Requires a JSON object body with a non-empty string for every field.
fn require_fields(request: &ForwardRequest, fields: &[&str]) -> Result<serde_json::Map<String, Value>> {
    let Some(Value::Object(object)) = request.json_body()? else {
        return Err(GatewayError::BadRequest(
            "Request body must be a JSON object".to_string(),
        ));
    };

    let missing: Vec<&str> = fields
        .iter()
        .copied()
        .filter(|field| {
            object
                .get(*field)
                .and_then(Value::as_str)
                .is_none_or(|value| value.is_empty())
        })
        .collect();

    if !missing.is_empty() {
        return Err(GatewayError::BadRequest(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }

    Ok(object)
}

/// True if any segment would be collapsed by URL normalization upstream,
/// which would let the target escape `{base}{prefix}/`.
fn has_dot_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| {
        matches!(
            segment.to_ascii_lowercase().as_str(),
            "." | ".." | "%2e" | "%2e%2e" | ".%2e" | "%2e."
        )
    })
}

fn validate_change_password(request: &ForwardRequest) -> Result<()> {
    if !request.headers.contains_key(AUTHORIZATION) {
        return Err(GatewayError::MissingCredentials);
    }

    let object = require_fields(request, CHANGE_PASSWORD_FIELDS)?;
    if object.get("newPassword") != object.get("confirmPassword") {
        return Err(GatewayError::BadRequest(
            "New password and confirmation do not match".to_string(),
        ));
    }

    Ok(())
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.serve(req).await) })
    }
}

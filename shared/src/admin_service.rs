use crate::http::{ResponseBody, json_response, make_boxed_error_response};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
}

/// Serves `/health` and `/ready` on the admin listener.
///
/// `is_ready` is evaluated per request so readiness follows the state of
/// whatever the caller closes over.
pub struct AdminService<F> {
    is_ready: F,
}

impl<F> AdminService<F>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self { is_ready }
    }

    fn respond(&self, method: &Method, path: &str) -> Response<ResponseBody> {
        if method != Method::GET {
            return make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED);
        }

        match path {
            "/health" => json_response(StatusCode::OK, &StatusBody { status: "ok" }),
            "/ready" => match (self.is_ready)() {
                true => json_response(StatusCode::OK, &StatusBody { status: "ok" }),
                false => json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    &StatusBody {
                        status: "not ready",
                    },
                ),
            },
            _ => make_boxed_error_response(StatusCode::NOT_FOUND),
        }
    }
}

impl<F> Service<Request<Incoming>> for AdminService<F>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let res = self.respond(req.method(), req.uri().path());
        Box::pin(async move { Ok(res) })
    }
}

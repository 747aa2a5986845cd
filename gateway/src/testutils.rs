use crate::config::{Config, Listener, LoginConfig, Timeouts, UpstreamConfig};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

/// What the mock upstream saw.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct MockResponse {
    pub status: StatusCode,
    pub body: String,
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self::text(status, &body.to_string())
    }

    pub fn text(status: u16, body: &str) -> Self {
        MockResponse {
            status: StatusCode::from_u16(status).unwrap(),
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Responder = dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync;

/// Local HTTP server standing in for the backend API.
pub struct MockUpstream {
    port: u16,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockUpstream {
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let respond: Arc<Responder> = Arc::new(respond);
        let calls = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (server_calls, server_requests) = (calls.clone(), requests.clone());
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let respond = respond.clone();
                let calls = server_calls.clone();
                let requests = server_requests.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let respond = respond.clone();
                        let calls = calls.clone();
                        let requests = requests.clone();
                        async move {
                            let (parts, body) = req.into_parts();
                            let body = body.collect().await.unwrap().to_bytes();
                            let recorded = RecordedRequest {
                                method: parts.method,
                                path: parts.uri.path().to_string(),
                                query: parts.uri.query().map(String::from),
                                headers: parts.headers,
                                body,
                            };

                            calls.fetch_add(1, Ordering::SeqCst);
                            let mock = respond(&recorded);
                            requests.lock().unwrap().push(recorded);

                            if let Some(delay) = mock.delay {
                                tokio::time::sleep(delay).await;
                            }

                            let mut response = Response::new(Full::new(Bytes::from(mock.body)));
                            *response.status_mut() = mock.status;
                            Ok::<_, Infallible>(response)
                        }
                    });

                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockUpstream {
            port,
            calls,
            requests,
        }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://127.0.0.1:{}", self.port)).unwrap()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

/// A port nothing is listening on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn test_config(base_url: Url) -> Arc<Config> {
    Arc::new(Config {
        listener: Listener {
            host: "127.0.0.1".to_string(),
            port: 3000,
        },
        admin_listener: Listener {
            host: "127.0.0.1".to_string(),
            port: 3001,
        },
        upstream: UpstreamConfig {
            base_url,
            prefix: "/api".to_string(),
            accept_invalid_certs: false,
        },
        timeouts: Timeouts {
            auth_secs: 5,
            proxy_secs: 5,
        },
        login: LoginConfig::default(),
    })
}

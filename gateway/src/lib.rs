pub mod classifier;
pub mod config;
pub mod errors;
pub mod forwarder;
pub mod headers;
pub mod login;
pub mod metrics_defs;
pub mod normalizer;
pub mod routes;
pub mod service;
pub mod upstream;

#[cfg(test)]
mod testutils;

use service::GatewayService;
use shared::admin_service::AdminService;
use shared::http::{run_http_service, serve};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum GatewayRunError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] config::ValidationError),
    #[error("startup failed: {0}")]
    Startup(#[from] errors::GatewayError),
}

/// Runs the public gateway listener and the admin listener until either fails.
pub async fn run(config: config::Config) -> Result<(), GatewayRunError> {
    config.validate()?;
    let config = Arc::new(config);
    let ready = Arc::new(AtomicBool::new(false));

    let service = GatewayService::new(config.clone())?;

    let admin_ready = ready.clone();
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::new(move || admin_ready.load(Ordering::Relaxed)),
    );

    let gateway_task = async {
        let listener =
            TcpListener::bind(format!("{}:{}", config.listener.host, config.listener.port))
                .await?;
        tracing::info!(
            address = %listener.local_addr()?,
            upstream = config.upstream.trimmed_base(),
            prefix = %config.upstream.prefix,
            ruleset_version = classifier::RULESET_VERSION,
            "Gateway listening"
        );
        ready.store(true, Ordering::Relaxed);
        serve(listener, service).await
    };

    tokio::try_join!(gateway_task, admin_task)?;
    Ok(())
}

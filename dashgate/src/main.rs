use clap::{Parser, Subcommand};
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;

#[derive(Parser)]
#[command(name = "dashgate", about = "Gateway between the dashboard and the backend API")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the gateway
    Gateway(RunArgs),
    /// Load and validate the config file, then exit
    CheckConfig(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    #[arg(long, env = "DASHGATE_CONFIG")]
    config_file_path: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Gateway(args) => {
            let config = load_config(&args.config_file_path);
            let _sentry = init_logging(&config.common.logging);

            if let Some(metrics) = &config.common.metrics {
                init_metrics(metrics);
            }

            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start tokio runtime");
                    process::exit(1);
                }
            };

            tracing::info!("Starting gateway");
            if let Err(e) = runtime.block_on(gateway::run(config.gateway)) {
                tracing::error!(error = %e, "Gateway stopped");
                process::exit(1);
            }
        }
        CliCommand::CheckConfig(args) => {
            let config = load_config(&args.config_file_path);
            match config.gateway.validate() {
                Ok(()) => println!("Config OK"),
                Err(e) => {
                    eprintln!("Invalid config: {e}");
                    process::exit(1);
                }
            }
        }
    }
}

fn load_config(path: &std::path::Path) -> Config {
    match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", path.display());
            process::exit(1);
        }
    }
}

/// Installs the tracing subscriber, with Sentry reporting when a DSN is set.
/// The returned guard must live until shutdown.
fn init_logging(logging: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let guard = logging.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) {
    let recorder = match StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some("dashgate"))
    {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build statsd recorder, metrics disabled");
            return;
        }
    };

    if let Err(e) = metrics::set_global_recorder(recorder) {
        tracing::error!(error = %e, "Failed to install metrics recorder");
        return;
    }

    shared::metrics_defs::describe_all(gateway::metrics_defs::ALL_METRICS);
}

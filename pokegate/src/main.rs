mod config;

use clap::{Args, Parser, Subcommand};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{Config, LoggingConfig, MetricsConfig};

#[derive(Parser)]
#[command(name = "pokegate", about = "Aggregation gateway for the Pokemon services")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the gateway
    Gateway(ConfigArgs),
    /// Load and validate the configuration, then exit
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, env = "POKEGATE_CONFIG", default_value = "pokegate.yaml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Gateway(args) => {
            let config = match Config::from_file(&args.config) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{}: {e}", args.config.display());
                    return ExitCode::FAILURE;
                }
            };

            let _sentry = init_logging(&config.logging);
            if let Some(metrics) = &config.metrics {
                init_metrics(metrics);
            }

            run_gateway(config)
        }
        CliCommand::CheckConfig(args) => match Config::from_file(&args.config) {
            Ok(config) => {
                println!(
                    "{}: ok ({} backends, {} proxy routes, {} search targets)",
                    args.config.display(),
                    config.gateway.backends.len(),
                    config.gateway.proxy_routes.len(),
                    config.gateway.search.targets.len()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {e}", args.config.display());
                ExitCode::FAILURE
            }
        },
    }
}

#[tokio::main]
async fn run_gateway(config: Config) -> ExitCode {
    match gateway::run(config.gateway, shutdown_signal()).await {
        Ok(()) => {
            tracing::info!("gateway stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "gateway failed");
            ExitCode::FAILURE
        }
    }
}

/// Installs the tracing subscriber, plus the Sentry layer when a DSN is set.
/// The returned guard flushes Sentry on drop and must outlive the gateway.
fn init_logging(logging: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let guard = match logging
        .sentry_dsn
        .as_deref()
        .map(str::parse::<sentry::types::Dsn>)
    {
        Some(Ok(dsn)) => Some(sentry::init(sentry::ClientOptions {
            dsn: Some(dsn),
            release: sentry::release_name!(),
            ..Default::default()
        })),
        Some(Err(e)) => {
            eprintln!("invalid sentry_dsn, sentry disabled: {e}");
            None
        }
        None => None,
    };
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(metrics: &MetricsConfig) {
    let recorder = match StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some("pokegate"))
    {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::warn!(error = %e, "could not build statsd recorder, metrics disabled");
            return;
        }
    };

    if let Err(e) = metrics::set_global_recorder(recorder) {
        tracing::warn!(error = %e, "could not install metrics recorder");
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "could not listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

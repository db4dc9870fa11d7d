//! Transaction-token exchange service binary.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use txn_token_service::{cli::Cli, config::Config, server::Service, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        trust_domain = %config.trust_domain,
        validators = config.validators.len(),
        issuers = config.issuers.len(),
        "Starting transaction token service"
    );

    let service = match Service::build(config).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to build service: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = service.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

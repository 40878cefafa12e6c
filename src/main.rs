//! cert-bootstrap - agent-side TLS credential bootstrap
//!
//! Obtains and validates the X.509 credentials an agent needs to speak to
//! its CA-backed infrastructure, then exits.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use cert_bootstrap::{
    cli::Cli,
    config::Config,
    setup_tracing,
    ssl::{Outcome, StateMachine},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(ref certname) = cli.certname {
                config.certname = certname.clone();
            }
            if let Some(ref server) = cli.server {
                config.ca_server = server.clone();
            }
            if let Some(port) = cli.port {
                config.ca_port = port;
            }
            if let Some(waitforcert) = cli.waitforcert {
                config.waitforcert = waitforcert;
            }
            if cli.onetime {
                config.onetime = true;
            }
            if let Err(e) = config.validate() {
                error!("Failed to load configuration: {e}");
                return ExitCode::FAILURE;
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
        certname = %config.certname,
        ca = %config.ca_base_url(),
        "Starting certificate bootstrap"
    );

    let machine = match StateMachine::new(config) {
        Ok(m) => m,
        Err(e) => {
            error!("Failed to initialize: {e}");
            return ExitCode::FAILURE;
        }
    };

    match machine.run().await {
        Ok(Outcome::Complete(context)) => {
            info!(
                cacerts = context.cacerts().len(),
                crls = context.crls().len(),
                "Certificate bootstrap complete"
            );
            ExitCode::SUCCESS
        }
        Ok(Outcome::Exit { code, message }) => {
            println!("{message}");
            ExitCode::from(code)
        }
        Err(e) => {
            error!("Certificate bootstrap failed: {e}");
            ExitCode::from(2)
        }
    }
}

//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Bootstrap agent TLS credentials against a certificate authority
#[derive(Parser, Debug)]
#[command(name = "cert-bootstrap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CERT_BOOTSTRAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Agent identity (certificate subject CN)
    #[arg(long, env = "CERT_BOOTSTRAP_CERTNAME")]
    pub certname: Option<String>,

    /// CA server hostname
    #[arg(long, env = "CERT_BOOTSTRAP_CA_SERVER")]
    pub server: Option<String>,

    /// CA server port
    #[arg(long, env = "CERT_BOOTSTRAP_CA_PORT")]
    pub port: Option<u16>,

    /// Seconds between certificate polls (0 disables polling)
    #[arg(long)]
    pub waitforcert: Option<u64>,

    /// Exit instead of polling when the certificate is not yet signed
    #[arg(long)]
    pub onetime: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CERT_BOOTSTRAP_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CERT_BOOTSTRAP_LOG_FORMAT")]
    pub log_format: Option<String>,
}

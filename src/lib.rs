//! Certificate bootstrap agent library
//!
//! Drives a node from an empty on-disk state to a complete TLS credential
//! set issued by a central CA: download the CA bundle and CRLs, generate a
//! key pair, submit a certificate signing request, poll until the CA signs
//! it, and hand back an immutable [`ssl::SslContext`] for higher layers.
//!
//! # Flow
//!
//! ```text
//! NeedCACerts → NeedCRLs → NeedKey → NeedSubmitCSR → NeedCert → Done
//!                                                         ╲
//!                                                          ╲→ Wait → NeedCACerts
//! ```
//!
//! Local artifacts are preferred over the network at every step; anything
//! fetched is validated before it is persisted, and the private key is never
//! overwritten once written.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod ssl;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}

//! Error types for the certificate bootstrap agent

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for the bootstrap agent
pub type Result<T> = std::result::Result<T, Error>;

/// Bootstrap agent errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The CA has no CA certificate to hand out
    #[error("CA certificate is missing from the server")]
    CaCertMissing,

    /// The CA has no revocation list to hand out
    #[error("CRL is missing from the server")]
    CrlMissing,

    /// Unexpected response while downloading the CA bundle
    #[error("Could not download CA certificate: {0}")]
    CaCertDownload(String),

    /// Unexpected response while downloading the CRL bundle
    #[error("Could not download CRLs: {0}")]
    CrlDownload(String),

    /// The CA rejected the certificate signing request
    #[error("Failed to submit the CSR, HTTP response was {0}")]
    CsrSubmit(u16),

    /// An on-disk artifact is present but not valid PEM/DER
    #[error("Failed to parse {artifact} from '{path}': {detail}")]
    MalformedArtifact {
        /// Human-readable artifact name ("CA certificates", "private key", …)
        artifact: &'static str,
        /// Path of the offending file
        path: PathBuf,
        /// Parser diagnostic
        detail: String,
    },

    /// The CA returned a body that does not parse as the requested artifact
    #[error("Failed to parse {artifact} sent by the CA: {detail}")]
    MalformedResponse {
        /// Human-readable artifact name
        artifact: &'static str,
        /// Parser diagnostic
        detail: String,
    },

    /// An on-disk client certificate does not belong to the private key
    #[error("The certificate for '{subject}' does not match its private key")]
    CertKeyMismatch {
        /// Subject DN of the offending certificate
        subject: String,
    },

    /// A client certificate does not validate against the CA bundle
    #[error("The certificate for '{subject}' is not trusted by the CA bundle: {detail}")]
    UntrustedCert {
        /// Subject DN of the offending certificate
        subject: String,
        /// Verification diagnostic
        detail: String,
    },

    /// Certificate or key generation failed
    #[error("Failed to generate {0}: {1}")]
    Generation(&'static str, String),

    /// TLS configuration could not be built from the credential set
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

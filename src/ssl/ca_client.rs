//! Typed HTTP client for the CA's certificate endpoints.
//!
//! Speaks the four `/puppet-ca/v1` routes the bootstrap needs:
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | GET | `/certificate/ca` | CA certificate bundle |
//! | GET | `/certificate_revocation_list/ca` | CRL bundle |
//! | PUT | `/certificate_request/{certname}` | submit a CSR |
//! | GET | `/certificate/{certname}` | poll for the signed certificate |
//!
//! Every method takes the current [`SslContext`]: the context carries both
//! the peer-verification flag and the CA bundle used as trust roots, so the
//! one request allowed to skip verification — the initial bundle download —
//! is visible at the call site.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use crate::config::HttpConfig;
use crate::ssl::context::SslContext;
use crate::{Error, Result};

/// 400 bodies carrying one of these substrings mean the CA already holds a
/// request or certificate for this name; the submission is idempotent and
/// the machine proceeds to poll.
const ALREADY_EXISTS_MARKERS: [&str; 3] = [
    "already has a requested certificate",
    "already has a signed certificate",
    "already has a revoked certificate",
];

/// Outcome of a CSR submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrSubmission {
    /// The CA accepted the request
    Accepted,
    /// The CA already holds a request or certificate for this name
    AlreadyExists,
}

/// Outcome of polling for the agent certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertResponse {
    /// The CA returned a certificate body
    Issued(String),
    /// The CA has not issued the certificate; carries the HTTP status
    NotReady(u16),
}

/// HTTP client for the CA API.
#[derive(Debug, Clone)]
pub struct CaClient {
    base_url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl CaClient {
    /// Create a client for the CA at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `base_url` is not a valid URL.
    pub fn new(base_url: &str, http: &HttpConfig) -> Result<Self> {
        let url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid CA URL '{base_url}': {e}")))?;
        Ok(Self {
            base_url: url.as_str().trim_end_matches('/').to_string(),
            connect_timeout: http.connect_timeout,
            request_timeout: http.request_timeout,
        })
    }

    /// Download the CA certificate bundle.
    ///
    /// # Errors
    ///
    /// `404` maps to [`Error::CaCertMissing`]; any other non-2xx status maps
    /// to [`Error::CaCertDownload`] with the status line.
    pub async fn fetch_cacerts(&self, ssl: &SslContext) -> Result<String> {
        debug!(verify_peer = ssl.verify_peer(), "Downloading CA bundle");
        let response = self
            .build_client(ssl)?
            .get(format!("{}/puppet-ca/v1/certificate/ca", self.base_url))
            .header(ACCEPT, "text/plain")
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.text().await?),
            StatusCode::NOT_FOUND => Err(Error::CaCertMissing),
            status => Err(Error::CaCertDownload(status_line(status))),
        }
    }

    /// Download the CRL bundle.
    ///
    /// # Errors
    ///
    /// `404` maps to [`Error::CrlMissing`]; any other non-2xx status maps to
    /// [`Error::CrlDownload`] with the status line.
    pub async fn fetch_crls(&self, ssl: &SslContext) -> Result<String> {
        debug!("Downloading CRL bundle");
        let response = self
            .build_client(ssl)?
            .get(format!(
                "{}/puppet-ca/v1/certificate_revocation_list/ca",
                self.base_url
            ))
            .header(ACCEPT, "text/plain")
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.text().await?),
            StatusCode::NOT_FOUND => Err(Error::CrlMissing),
            status => Err(Error::CrlDownload(status_line(status))),
        }
    }

    /// Submit a PEM CSR for `certname`.
    ///
    /// # Errors
    ///
    /// Any status other than 2xx or an idempotent 400 maps to
    /// [`Error::CsrSubmit`].
    pub async fn submit_csr(
        &self,
        ssl: &SslContext,
        certname: &str,
        csr_pem: &str,
    ) -> Result<CsrSubmission> {
        debug!(certname, "Submitting certificate request");
        let response = self
            .build_client(ssl)?
            .put(format!(
                "{}/puppet-ca/v1/certificate_request/{certname}",
                self.base_url
            ))
            .header(CONTENT_TYPE, "text/plain")
            .body(csr_pem.to_string())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(CsrSubmission::Accepted);
        }
        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await?;
            if is_already_exists(&body) {
                debug!(certname, "CA already has a certificate or request");
                return Ok(CsrSubmission::AlreadyExists);
            }
        }
        Err(Error::CsrSubmit(status.as_u16()))
    }

    /// Poll for the signed certificate of `certname`.
    ///
    /// Any non-2xx status is reported as [`CertResponse::NotReady`], never
    /// as an error: issuance simply has not happened yet.
    ///
    /// # Errors
    ///
    /// Only transport-level failures are surfaced.
    pub async fn fetch_client_cert(
        &self,
        ssl: &SslContext,
        certname: &str,
    ) -> Result<CertResponse> {
        debug!(certname, "Polling for certificate");
        let response = self
            .build_client(ssl)?
            .get(format!(
                "{}/puppet-ca/v1/certificate/{certname}",
                self.base_url
            ))
            .header(ACCEPT, "text/plain")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(CertResponse::Issued(response.text().await?))
        } else {
            Ok(CertResponse::NotReady(status.as_u16()))
        }
    }

    /// Build a request client from the context's trust material.
    fn build_client(&self, ssl: &SslContext) -> Result<Client> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout);

        if ssl.verify_peer() {
            let certs = ssl
                .cacerts()
                .iter()
                .map(|cert| reqwest::Certificate::from_der(cert))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            builder = builder.tls_certs_only(certs);
        } else {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(builder.build()?)
    }
}

/// Whether a 400 body is one of the idempotent "already exists" responses.
fn is_already_exists(body: &str) -> bool {
    ALREADY_EXISTS_MARKERS
        .iter()
        .any(|marker| body.contains(marker))
}

/// Human-readable status line ("403 Forbidden").
fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! The credential bootstrap state machine.
//!
//! Drives a node from an empty on-disk state to a complete credential set:
//!
//! ```text
//! NeedCACerts → NeedCRLs → NeedKey → NeedSubmitCSR → NeedCert → Done
//!                                                         ╲
//!                                                          ╲→ Wait → NeedCACerts
//! ```
//!
//! Each state is a variant carrying exactly the data its successor needs;
//! there is no shared mutable machine object.  Local artifacts are
//! preferred over the network at every step, fetched artifacts are parsed
//! before they are persisted, and the private key is never overwritten.
//!
//! # Failure semantics
//!
//! Parse errors and unexpected server responses are fatal and propagate to
//! the caller.  "Certificate not issued yet" conditions — a non-2xx poll
//! response, an unusable body, a key mismatch on a *fetched* certificate —
//! are never fatal and route through [`Wait`], which either sleeps and
//! restarts the chain or terminates via [`Outcome::Exit`] when polling is
//! disabled.
//!
//! [`Wait`]: State::Wait

use std::time::Duration;

use rcgen::{KeyPair, RsaKeySize};
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::ssl::ca_client::{CaClient, CertResponse, CsrSubmission};
use crate::ssl::context::{self, SslContext};
use crate::ssl::csr::{CsrAttributes, CsrParams, build_csr};
use crate::ssl::provider::{self, CertProvider};
use crate::{Error, Result};

/// Message printed when Wait is entered with polling disabled.
const WAIT_DISABLED_MESSAGE: &str = "Exiting; no certificate found and waitforcert is disabled";

/// Terminal result of a bootstrap run.
#[derive(Debug)]
pub enum Outcome {
    /// The credential set is complete and self-consistent on disk.
    Complete(SslContext),
    /// The run stopped without credentials; the binary prints `message` and
    /// exits with `code`.
    Exit {
        /// Process exit code
        code: u8,
        /// Operator-facing message
        message: String,
    },
}

/// Trust material accepted earlier in the run, threaded between states.
struct Trust {
    cacerts: Vec<CertificateDer<'static>>,
    crls: Vec<CertificateRevocationListDer<'static>>,
}

impl Trust {
    /// A verifying context over this trust material.
    fn context(&self) -> SslContext {
        SslContext::trusted(self.cacerts.clone(), self.crls.clone())
    }
}

/// The transition graph; each variant owns what the next step consumes.
enum State {
    NeedCaCerts,
    NeedCrls {
        cacerts: Vec<CertificateDer<'static>>,
    },
    NeedKey {
        trust: Trust,
    },
    NeedSubmitCsr {
        trust: Trust,
        key: KeyPair,
    },
    NeedCert {
        trust: Trust,
        key: KeyPair,
    },
    Wait,
    Done(SslContext),
    Exit {
        code: u8,
        message: String,
    },
}

/// Runs the bootstrap to completion.
pub struct StateMachine {
    config: Config,
    provider: CertProvider,
    ca: CaClient,
}

impl StateMachine {
    /// Create a machine for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA URL in the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        let provider = CertProvider::new(&config);
        let ca = CaClient::new(&config.ca_base_url(), &config.http)?;
        Ok(Self {
            config,
            provider,
            ca,
        })
    }

    /// Run the machine until it terminates.
    ///
    /// # Errors
    ///
    /// Propagates fatal conditions: malformed artifacts, unexpected CA
    /// responses, a mismatched on-disk certificate, and transport failures.
    pub async fn run(&self) -> Result<Outcome> {
        let mut state = State::NeedCaCerts;
        loop {
            state = match state {
                State::NeedCaCerts => self.need_cacerts().await?,
                State::NeedCrls { cacerts } => self.need_crls(cacerts).await?,
                State::NeedKey { trust } => self.need_key(trust)?,
                State::NeedSubmitCsr { trust, key } => self.need_submit_csr(trust, key).await?,
                State::NeedCert { trust, key } => self.need_cert(trust, key).await?,
                State::Wait => self.wait().await,
                State::Done(context) => return Ok(Outcome::Complete(context)),
                State::Exit { code, message } => return Ok(Outcome::Exit { code, message }),
            };
        }
    }

    /// Obtain the CA bundle: prefer disk, otherwise fetch unverified (the
    /// only unverified request in a run), validate, persist.
    async fn need_cacerts(&self) -> Result<State> {
        if let Some(cacerts) = self.provider.load_cacerts()? {
            debug!(count = cacerts.len(), "Using CA bundle from disk");
            return Ok(State::NeedCrls { cacerts });
        }

        let pem = self.ca.fetch_cacerts(&SslContext::insecure()).await?;
        let cacerts = provider::parse_cert_bundle(pem.as_bytes()).map_err(|detail| {
            Error::MalformedResponse {
                artifact: "CA certificates",
                detail,
            }
        })?;
        self.provider.save_cacerts(&pem)?;
        info!(count = cacerts.len(), "Downloaded CA certificate");

        Ok(State::NeedCrls { cacerts })
    }

    /// Obtain the CRL bundle, or skip entirely when revocation is disabled.
    async fn need_crls(&self, cacerts: Vec<CertificateDer<'static>>) -> Result<State> {
        if !self.config.certificate_revocation {
            debug!("Certificate revocation disabled, skipping CRLs");
            return Ok(State::NeedKey {
                trust: Trust {
                    cacerts,
                    crls: Vec::new(),
                },
            });
        }

        if let Some(crls) = self.provider.load_crls()? {
            debug!(count = crls.len(), "Using CRLs from disk");
            return Ok(State::NeedKey {
                trust: Trust { cacerts, crls },
            });
        }

        let ssl = SslContext::trusted(cacerts.clone(), Vec::new());
        let pem = self.ca.fetch_crls(&ssl).await?;
        let crls =
            provider::parse_crl_bundle(pem.as_bytes()).map_err(|detail| Error::MalformedResponse {
                artifact: "CRLs",
                detail,
            })?;
        self.provider.save_crls(&pem)?;
        info!(count = crls.len(), "Downloaded CRLs");

        Ok(State::NeedKey {
            trust: Trust { cacerts, crls },
        })
    }

    /// Load or create the private key.  When both key and certificate are
    /// already on disk and agree, the run short-circuits to Done without any
    /// network traffic; a disagreement between them is fatal.
    fn need_key(&self, trust: Trust) -> Result<State> {
        match self.provider.load_private_key()? {
            Some(key) => match self.provider.load_client_cert()? {
                Some(cert) => {
                    let context = SslContext::with_client_credentials(
                        trust.cacerts,
                        trust.crls,
                        key,
                        cert,
                    )?;
                    debug!("Using existing private key and certificate");
                    Ok(State::Done(context))
                }
                None => {
                    debug!("Using existing private key");
                    Ok(State::NeedSubmitCsr { trust, key })
                }
            },
            None => {
                info!(
                    certname = %self.config.certname,
                    bits = self.config.keylength,
                    "Creating a new RSA key"
                );
                let key = generate_rsa_key(self.config.keylength)?;
                self.provider.save_private_key(&key.serialize_pem())?;
                Ok(State::NeedSubmitCsr { trust, key })
            }
        }
    }

    /// Build and submit the CSR.  An idempotent "already exists" response is
    /// success; anything else non-2xx is fatal.
    async fn need_submit_csr(&self, trust: Trust, key: KeyPair) -> Result<State> {
        let attributes = match &self.config.csr_attributes {
            Some(path) => Some(CsrAttributes::load(path)?),
            None => None,
        };
        let params = CsrParams {
            certname: &self.config.certname,
            dns_alt_names: self.config.dns_alt_names.as_deref(),
            attributes: attributes.as_ref(),
        };
        let csr_pem = build_csr(&params, &key)?;

        match self
            .ca
            .submit_csr(&trust.context(), &self.config.certname, &csr_pem)
            .await?
        {
            CsrSubmission::Accepted => {
                info!(certname = %self.config.certname, "Submitted certificate request");
            }
            CsrSubmission::AlreadyExists => {
                info!(
                    certname = %self.config.certname,
                    "Certificate request already submitted, waiting for it to be signed"
                );
            }
        }

        Ok(State::NeedCert { trust, key })
    }

    /// Poll for the signed certificate.  Anything short of a parseable,
    /// key-matching, chain-valid certificate routes to Wait; only a valid
    /// certificate is persisted.
    async fn need_cert(&self, trust: Trust, key: KeyPair) -> Result<State> {
        let pem = match self
            .ca
            .fetch_client_cert(&trust.context(), &self.config.certname)
            .await?
        {
            CertResponse::NotReady(status) => {
                info!(status, "Certificate not yet issued");
                return Ok(State::Wait);
            }
            CertResponse::Issued(pem) => pem,
        };

        let cert = match provider::parse_certificate(pem.as_bytes()) {
            Ok(cert) => cert,
            Err(detail) => {
                warn!(%detail, "CA returned an unusable certificate body");
                return Ok(State::Wait);
            }
        };

        if !context::cert_matches_key(&cert, &key) {
            warn!(
                subject = %context::cert_subject(&cert),
                "Certificate does not match the private key, waiting for a new one"
            );
            return Ok(State::Wait);
        }

        match SslContext::with_client_credentials(trust.cacerts, trust.crls, key, cert) {
            Ok(context) => {
                self.provider.save_client_cert(&pem)?;
                info!(certname = %self.config.certname, "Downloaded certificate");
                Ok(State::Done(context))
            }
            Err(e) => {
                warn!(error = %e, "Rejecting certificate");
                Ok(State::Wait)
            }
        }
    }

    /// Sleep before restarting the chain, or terminate when polling is
    /// disabled.  The restart goes back through NeedCACerts so a rotated CA
    /// or CRL is picked up between attempts.
    async fn wait(&self) -> State {
        if self.config.onetime || self.config.waitforcert == 0 {
            return State::Exit {
                code: 1,
                message: WAIT_DISABLED_MESSAGE.to_string(),
            };
        }

        info!(
            seconds = self.config.waitforcert,
            "Certificate not signed yet; will try again"
        );
        sleep(Duration::from_secs(self.config.waitforcert)).await;
        State::NeedCaCerts
    }
}

/// Generate a fresh RSA key of the configured size.
fn generate_rsa_key(bits: u32) -> Result<KeyPair> {
    let size = match bits {
        2048 => RsaKeySize::_2048,
        3072 => RsaKeySize::_3072,
        _ => RsaKeySize::_4096,
    };
    KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, size)
        .map_err(|e| Error::Generation("RSA key", e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_with(config: Config) -> StateMachine {
        StateMachine::new(config).unwrap()
    }

    fn base_config() -> Config {
        Config {
            certname: "agent01.example.com".to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn wait_exits_when_onetime_is_set() {
        let config = Config {
            onetime: true,
            waitforcert: 120,
            ..base_config()
        };
        let machine = machine_with(config);

        match machine.wait().await {
            State::Exit { code, message } => {
                assert_eq!(code, 1);
                assert_eq!(
                    message,
                    "Exiting; no certificate found and waitforcert is disabled"
                );
            }
            _ => panic!("expected Exit"),
        }
    }

    #[tokio::test]
    async fn wait_exits_when_polling_is_disabled() {
        let config = Config {
            waitforcert: 0,
            ..base_config()
        };
        let machine = machine_with(config);

        assert!(matches!(machine.wait().await, State::Exit { code: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sleeps_then_restarts_the_chain() {
        let config = Config {
            waitforcert: 15,
            ..base_config()
        };
        let machine = machine_with(config);

        let start = tokio::time::Instant::now();
        let next = machine.wait().await;
        assert!(matches!(next, State::NeedCaCerts));
        assert!(start.elapsed() >= Duration::from_secs(15));
    }
}

//! Immutable trust material handed to higher layers.
//!
//! An [`SslContext`] is built incrementally by the state machine: first an
//! unverified context for the very first CA download, then a verifying
//! context once a CA bundle has been accepted, and finally a context
//! carrying the agent's own key and certificate.  Each step produces a new
//! value; a context is never mutated after construction.

use rcgen::{KeyPair, PublicKeyData};
use rustls::RootCertStore;
use rustls::pki_types::{
    CertificateDer, CertificateRevocationListDer, PrivateKeyDer, PrivatePkcs8KeyDer,
};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// SslContext
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable collection of trust material for TLS connections.
#[derive(Debug)]
pub struct SslContext {
    cacerts: Vec<CertificateDer<'static>>,
    crls: Vec<CertificateRevocationListDer<'static>>,
    verify_peer: bool,
    private_key: Option<KeyPair>,
    client_cert: Option<CertificateDer<'static>>,
}

impl SslContext {
    /// Context for the very first CA bundle download, before any trust
    /// anchors exist.  Peer verification is disabled; no other request in a
    /// run may use this context.
    #[must_use]
    pub fn insecure() -> Self {
        Self {
            cacerts: Vec::new(),
            crls: Vec::new(),
            verify_peer: false,
            private_key: None,
            client_cert: None,
        }
    }

    /// Verifying context from an accepted CA bundle and CRL set.
    #[must_use]
    pub fn trusted(
        cacerts: Vec<CertificateDer<'static>>,
        crls: Vec<CertificateRevocationListDer<'static>>,
    ) -> Self {
        Self {
            cacerts,
            crls,
            verify_peer: true,
            private_key: None,
            client_cert: None,
        }
    }

    /// Completed context carrying the agent's own credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CertKeyMismatch`] if the certificate's public key is
    /// not the key pair's public key, and [`Error::UntrustedCert`] if the
    /// certificate does not validate against the CA bundle.
    pub fn with_client_credentials(
        cacerts: Vec<CertificateDer<'static>>,
        crls: Vec<CertificateRevocationListDer<'static>>,
        private_key: KeyPair,
        client_cert: CertificateDer<'static>,
    ) -> Result<Self> {
        let subject = cert_subject(&client_cert);

        if !cert_matches_key(&client_cert, &private_key) {
            return Err(Error::CertKeyMismatch { subject });
        }

        verify_cert_chain(&client_cert, &cacerts)
            .map_err(|detail| Error::UntrustedCert { subject, detail })?;

        Ok(Self {
            cacerts,
            crls,
            verify_peer: true,
            private_key: Some(private_key),
            client_cert: Some(client_cert),
        })
    }

    /// CA certificate chain, root last.
    #[must_use]
    pub fn cacerts(&self) -> &[CertificateDer<'static>] {
        &self.cacerts
    }

    /// Revocation lists aligned with [`Self::cacerts`]; empty when
    /// revocation checking is disabled.
    #[must_use]
    pub fn crls(&self) -> &[CertificateRevocationListDer<'static>] {
        &self.crls
    }

    /// Whether TLS peers are verified against [`Self::cacerts`].
    #[must_use]
    pub fn verify_peer(&self) -> bool {
        self.verify_peer
    }

    /// The agent's private key, once established.
    #[must_use]
    pub fn private_key(&self) -> Option<&KeyPair> {
        self.private_key.as_ref()
    }

    /// The agent's client certificate, once established.
    #[must_use]
    pub fn client_cert(&self) -> Option<&CertificateDer<'static>> {
        self.client_cert.as_ref()
    }

    /// Build a `rustls::ClientConfig` from this context.
    ///
    /// The CA bundle becomes the only trust roots; when the agent
    /// credentials are present they are installed for client authentication.
    /// CRL enforcement is left to the consumer's verifier configuration —
    /// the lists are carried as data on the context.
    ///
    /// # Errors
    ///
    /// Refuses to build from an unverified context, and fails if any CA
    /// certificate is rejected by the trust store or the credential pair is
    /// rejected by rustls.
    pub fn client_config(&self) -> Result<rustls::ClientConfig> {
        if !self.verify_peer {
            return Err(Error::Tls(
                "refusing to build a client config without peer verification".to_string(),
            ));
        }

        let mut roots = RootCertStore::empty();
        for cert in &self.cacerts {
            roots
                .add(cert.clone())
                .map_err(|e| Error::Tls(format!("Failed to add CA cert to trust store: {e}")))?;
        }

        let builder = rustls::ClientConfig::builder().with_root_certificates(roots);

        match (&self.private_key, &self.client_cert) {
            (Some(key), Some(cert)) => {
                let key_der: PrivateKeyDer<'static> =
                    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
                builder
                    .with_client_auth_cert(vec![cert.clone()], key_der)
                    .map_err(|e| Error::Tls(format!("TLS config error (cert/key mismatch?): {e}")))
            }
            _ => Ok(builder.with_no_client_auth()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificate checks
// ─────────────────────────────────────────────────────────────────────────────

/// Subject DN of a certificate, or a placeholder when it does not parse.
pub(crate) fn cert_subject(cert: &CertificateDer<'_>) -> String {
    match X509Certificate::from_der(cert) {
        Ok((_, parsed)) => parsed.subject().to_string(),
        Err(_) => "<unparsed>".to_string(),
    }
}

/// Whether the certificate's SubjectPublicKeyInfo equals the key pair's.
pub(crate) fn cert_matches_key(cert: &CertificateDer<'_>, key: &KeyPair) -> bool {
    match X509Certificate::from_der(cert) {
        Ok((_, parsed)) => parsed.public_key().raw == key.subject_public_key_info().as_slice(),
        Err(_) => false,
    }
}

/// Validate an end-entity certificate against the CA bundle.
///
/// Flat trust-store model: the leaf's validity window is checked, its
/// issuer is looked up in the bundle by subject DN, and that issuer's
/// signature over the leaf is verified.  The bundle's own certificates are
/// trusted as delivered.
pub(crate) fn verify_cert_chain(
    cert: &CertificateDer<'_>,
    cacerts: &[CertificateDer<'static>],
) -> std::result::Result<(), String> {
    let (_, leaf) = X509Certificate::from_der(cert).map_err(|e| e.to_string())?;

    if !leaf.validity().is_valid() {
        return Err(format!(
            "certificate is outside its validity window (not before {}, not after {})",
            leaf.validity().not_before,
            leaf.validity().not_after
        ));
    }

    let issuer_dn = leaf.issuer().to_string();
    for ca_der in cacerts {
        let (_, ca) = X509Certificate::from_der(ca_der).map_err(|e| e.to_string())?;
        if ca.subject().to_string() == issuer_dn {
            return leaf
                .verify_signature(Some(ca.public_key()))
                .map_err(|e| format!("signature verification failed: {e}"));
        }
    }

    Err(format!("issuer '{issuer_dn}' not found in the CA bundle"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

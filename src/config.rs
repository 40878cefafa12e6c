//! Configuration management

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Accepted RSA modulus sizes for the agent key.
const VALID_KEYLENGTHS: [u32; 3] = [2048, 3072, 4096];

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent identity; subject CN of the certificate and the path component
    /// of per-node CA requests. Must be lowercase.
    pub certname: String,

    /// Hostname of the CA server
    pub ca_server: String,

    /// Port of the CA server
    pub ca_port: u16,

    /// Full base URL override for the CA API (scheme included). Normally
    /// derived from `ca_server`/`ca_port`
    pub ca_url: Option<String>,

    /// Base directory for credential artifacts; the default artifact paths
    /// below are resolved beneath it
    pub ssldir: PathBuf,

    /// Override path for the CA certificate bundle
    pub localcacert: Option<PathBuf>,

    /// Override path for the CRL bundle
    pub hostcrl: Option<PathBuf>,

    /// Override path for the agent private key
    pub hostprivkey: Option<PathBuf>,

    /// Override path for the agent certificate
    pub hostcert: Option<PathBuf>,

    /// Comma-separated subject alternative names to request on the
    /// certificate (`DNS:name`, `IP:addr`, or bare names)
    pub dns_alt_names: Option<String>,

    /// Path to a YAML document with `custom_attributes` and
    /// `extension_requests` to embed in the CSR
    pub csr_attributes: Option<PathBuf>,

    /// When `false`, CRLs are neither loaded nor fetched and no CRL file is
    /// created
    pub certificate_revocation: bool,

    /// Seconds to sleep between certificate polls; `0` disables polling
    pub waitforcert: u64,

    /// Exit instead of sleeping when the certificate has not been issued yet
    pub onetime: bool,

    /// RSA modulus size in bits for a newly generated key (2048, 3072 or 4096)
    pub keylength: u32,

    /// HTTP client configuration
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            certname: String::new(),
            ca_server: "puppet".to_string(),
            ca_port: 8140,
            ca_url: None,
            ssldir: PathBuf::from("ssl"),
            localcacert: None,
            hostcrl: None,
            hostprivkey: None,
            hostcert: None,
            dns_alt_names: None,
            csr_attributes: None,
            certificate_revocation: true,
            waitforcert: 120,
            onetime: false,
            keylength: 4096,
            http: HttpConfig::default(),
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Whole-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (CERT_BOOTSTRAP_ prefix)
        figment = figment.merge(Env::prefixed("CERT_BOOTSTRAP_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns an error for an empty or uppercase certname, or an RSA key
    /// length the CA stack does not accept.
    pub fn validate(&self) -> Result<()> {
        if self.certname.is_empty() {
            return Err(Error::Config(
                "certname must be set (config file, CERT_BOOTSTRAP_CERTNAME, or --certname)"
                    .to_string(),
            ));
        }
        if self.certname.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(Error::Config(format!(
                "Certname '{}' must not contain uppercase characters",
                self.certname
            )));
        }
        if !VALID_KEYLENGTHS.contains(&self.keylength) {
            return Err(Error::Config(format!(
                "keylength must be one of 2048, 3072 or 4096, got {}",
                self.keylength
            )));
        }
        Ok(())
    }

    /// Base URL of the CA API
    #[must_use]
    pub fn ca_base_url(&self) -> String {
        self.ca_url
            .clone()
            .unwrap_or_else(|| format!("https://{}:{}", self.ca_server, self.ca_port))
    }

    /// Path of the CA certificate bundle
    #[must_use]
    pub fn localcacert(&self) -> PathBuf {
        self.localcacert
            .clone()
            .unwrap_or_else(|| self.ssldir.join("certs").join("ca.pem"))
    }

    /// Path of the CRL bundle
    #[must_use]
    pub fn hostcrl(&self) -> PathBuf {
        self.hostcrl
            .clone()
            .unwrap_or_else(|| self.ssldir.join("crl.pem"))
    }

    /// Path of the agent private key
    #[must_use]
    pub fn hostprivkey(&self) -> PathBuf {
        self.hostprivkey.clone().unwrap_or_else(|| {
            self.ssldir
                .join("private_keys")
                .join(format!("{}.pem", self.certname))
        })
    }

    /// Path of the agent certificate
    #[must_use]
    pub fn hostcert(&self) -> PathBuf {
        self.hostcert.clone().unwrap_or_else(|| {
            self.ssldir
                .join("certs")
                .join(format!("{}.pem", self.certname))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(certname: &str) -> Config {
        Config {
            certname: certname.to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn defaults_poll_every_two_minutes_with_revocation_on() {
        let config = Config::default();
        assert_eq!(config.waitforcert, 120);
        assert!(!config.onetime);
        assert!(config.certificate_revocation);
        assert_eq!(config.keylength, 4096);
        assert_eq!(config.ca_port, 8140);
    }

    #[test]
    fn artifact_paths_resolve_under_ssldir() {
        let config = named("agent01.example.com");
        assert_eq!(config.localcacert(), PathBuf::from("ssl/certs/ca.pem"));
        assert_eq!(config.hostcrl(), PathBuf::from("ssl/crl.pem"));
        assert_eq!(
            config.hostprivkey(),
            PathBuf::from("ssl/private_keys/agent01.example.com.pem")
        );
        assert_eq!(
            config.hostcert(),
            PathBuf::from("ssl/certs/agent01.example.com.pem")
        );
    }

    #[test]
    fn explicit_paths_override_ssldir_layout() {
        let mut config = named("agent01.example.com");
        config.localcacert = Some(PathBuf::from("/etc/agent/ca.pem"));
        assert_eq!(config.localcacert(), PathBuf::from("/etc/agent/ca.pem"));
    }

    #[test]
    fn empty_certname_fails_validation() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn uppercase_certname_fails_validation() {
        let config = named("Agent01.Example.Com");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("uppercase"));
    }

    #[test]
    fn odd_keylength_fails_validation() {
        let mut config = named("agent01");
        config.keylength = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn ca_base_url_uses_server_and_port() {
        let mut config = named("agent01");
        config.ca_server = "ca.example.com".to_string();
        config.ca_port = 8141;
        assert_eq!(config.ca_base_url(), "https://ca.example.com:8141");
    }

    #[test]
    fn ca_url_override_wins_over_server_and_port() {
        let mut config = named("agent01");
        config.ca_url = Some("https://ca.internal:9999/prefix".to_string());
        assert_eq!(config.ca_base_url(), "https://ca.internal:9999/prefix");
    }

    #[test]
    fn yaml_deserialises_durations_as_humantime() {
        let yaml = "certname: agent01\nhttp:\n  connect_timeout: 5s\n  request_timeout: 1m";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.http.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.http.request_timeout, Duration::from_secs(60));
    }
}

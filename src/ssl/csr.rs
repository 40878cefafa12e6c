//! PKCS#10 certificate signing request construction.
//!
//! Builds the CSR the agent submits to the CA: subject CN from the
//! configured certname, subject alternative names from the `dns_alt_names`
//! option, plus operator-supplied custom attributes and extension requests
//! from a `csr_attributes` YAML document.
//!
//! # Attribute OIDs
//!
//! Attribute and extension keys are dotted-numeric OIDs or well-known short
//! names: `challengePassword`, and the `pp_*` registered extension names
//! under the `1.3.6.1.4.1.34380.1` private arc.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use rcgen::string::Ia5String;
use rcgen::{
    Attribute, CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair, SanType,
};
use serde::Deserialize;
use tracing::debug;

use crate::{Error, Result};

/// id-ce-subjectAltName; alt names travel in the SAN extension proper, never
/// as an operator-supplied extension request.
const OID_SUBJECT_ALT_NAME: [u64; 4] = [2, 5, 29, 17];

/// Short names accepted in `csr_attributes` documents.
///
/// `challengePassword` is the PKCS#9 attribute most CAs use for pre-shared
/// autosign secrets; the `pp_*` entries are the registered extension OIDs
/// under the configuration-management private arc.
const OID_SHORT_NAMES: &[(&str, &[u64])] = &[
    ("challengePassword", &[1, 2, 840, 113549, 1, 9, 7]),
    ("pp_uuid", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 1]),
    ("pp_instance_id", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 2]),
    ("pp_image_name", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 3]),
    ("pp_preshared_key", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 4]),
    ("pp_cost_center", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 5]),
    ("pp_product", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 6]),
    ("pp_project", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 7]),
    ("pp_application", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 8]),
    ("pp_service", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 9]),
    ("pp_employee", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 10]),
    ("pp_created_by", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 11]),
    ("pp_environment", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 12]),
    ("pp_role", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 13]),
    ("pp_software_version", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 14]),
    ("pp_department", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 15]),
    ("pp_cluster", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 16]),
    ("pp_provisioner", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 17]),
    ("pp_region", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 18]),
    ("pp_datacenter", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 19]),
    ("pp_zone", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 20]),
    ("pp_network", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 21]),
    ("pp_securitypolicy", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 22]),
    ("pp_cloudplatform", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 23]),
    ("pp_apptier", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 24]),
    ("pp_hostname", &[1, 3, 6, 1, 4, 1, 34380, 1, 1, 25]),
    ("pp_authorization", &[1, 3, 6, 1, 4, 1, 34380, 1, 3, 1]),
    ("pp_auth_role", &[1, 3, 6, 1, 4, 1, 34380, 1, 3, 13]),
];

// ─────────────────────────────────────────────────────────────────────────────
// CSR attributes document
// ─────────────────────────────────────────────────────────────────────────────

/// Operator-supplied CSR attributes, loaded from a YAML document.
///
/// ```yaml
/// custom_attributes:
///   challengePassword: "342thbjkt82094y0uthhor289jnqthpc2290"
/// extension_requests:
///   pp_uuid: "ED803750-E3C7-44F5-BB08-41A04433FE2E"
///   pp_role: "webserver"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CsrAttributes {
    /// PKCS#10 attributes placed directly on the CSR (OID → value)
    pub custom_attributes: BTreeMap<String, String>,

    /// X.509 extensions carried in the `extensionRequest` attribute
    /// (OID → value)
    pub extension_requests: BTreeMap<String, String>,
}

impl CsrAttributes {
    /// Load a CSR attributes document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file is missing or not valid
    /// YAML for this schema.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Cannot read csr_attributes file '{}': {e}",
                path.display()
            ))
        })?;
        let attributes: Self = serde_yaml::from_str(&raw).map_err(|e| {
            Error::Config(format!(
                "Invalid csr_attributes file '{}': {e}",
                path.display()
            ))
        })?;
        debug!(
            custom = attributes.custom_attributes.len(),
            extensions = attributes.extension_requests.len(),
            "Loaded CSR attributes"
        );
        Ok(attributes)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CSR construction
// ─────────────────────────────────────────────────────────────────────────────

/// Inputs for building the agent's certificate signing request.
#[derive(Debug)]
pub struct CsrParams<'a> {
    /// Subject CN and implicit DNS alt name.
    pub certname: &'a str,
    /// Raw `dns_alt_names` option value, if configured.
    pub dns_alt_names: Option<&'a str>,
    /// Parsed CSR attributes document, if configured.
    pub attributes: Option<&'a CsrAttributes>,
}

/// Build a PEM-encoded PKCS#10 CSR signed by `key`.
///
/// # Errors
///
/// Returns an error for malformed alt names, unknown attribute OIDs, or a
/// CSR serialization failure.
pub fn build_csr(params: &CsrParams<'_>, key: &KeyPair) -> Result<String> {
    let mut cert_params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, params.certname);
    cert_params.distinguished_name = dn;

    if let Some(raw) = params.dns_alt_names {
        cert_params.subject_alt_names = parse_alt_names(params.certname, raw)?;
    }

    let mut attributes: Vec<Attribute> = Vec::new();
    if let Some(doc) = params.attributes {
        for (name, value) in &doc.extension_requests {
            let oid = resolve_oid(name)?;
            if oid == OID_SUBJECT_ALT_NAME {
                return Err(Error::Config(
                    "Subject alternative names must be requested via dns_alt_names, \
                     not extension_requests"
                        .to_string(),
                ));
            }
            cert_params
                .custom_extensions
                .push(CustomExtension::from_oid_content(&oid, der_utf8(value)));
        }
        for (name, value) in &doc.custom_attributes {
            let oid = resolve_oid(name)?;
            attributes.push(Attribute {
                // rcgen wants a 'static OID
                oid: Box::leak(oid.into_boxed_slice()),
                values: der_utf8_set(value),
            });
        }
    }

    let csr = if attributes.is_empty() {
        cert_params.serialize_request(key)
    } else {
        cert_params.serialize_request_with_attributes(key, attributes)
    }
    .map_err(|e| Error::Generation("CSR", e.to_string()))?;

    csr.pem().map_err(|e| Error::Generation("CSR", e.to_string()))
}

/// Parse the `dns_alt_names` option into SAN entries.
///
/// Tokens are comma-separated: `DNS:<name>`, `IP:<addr>`, or a bare name
/// which defaults to DNS.  When any alt names are configured the certname is
/// appended as a DNS name so the certificate always matches the agent's own
/// identity.
pub(crate) fn parse_alt_names(certname: &str, raw: &str) -> Result<Vec<SanType>> {
    let mut sans: Vec<SanType> = Vec::new();
    let mut dns_names: Vec<String> = Vec::new();

    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if let Some(addr) = token.strip_prefix("IP:") {
            let addr = addr.trim();
            let parsed: IpAddr = addr
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IP alt name '{addr}': {e}")))?;
            sans.push(SanType::IpAddress(parsed));
        } else {
            let name = token.strip_prefix("DNS:").unwrap_or(token).trim();
            push_dns_name(&mut sans, &mut dns_names, name)?;
        }
    }

    if !sans.is_empty() && !dns_names.iter().any(|n| n == certname) {
        push_dns_name(&mut sans, &mut dns_names, certname)?;
    }

    Ok(sans)
}

fn push_dns_name(
    sans: &mut Vec<SanType>,
    dns_names: &mut Vec<String>,
    name: &str,
) -> Result<()> {
    if dns_names.iter().any(|n| n == name) {
        return Ok(());
    }
    let ia5 = Ia5String::try_from(name)
        .map_err(|e| Error::Config(format!("Invalid DNS alt name '{name}': {e}")))?;
    sans.push(SanType::DnsName(ia5));
    dns_names.push(name.to_string());
    Ok(())
}

/// Resolve a short name or dotted-numeric OID into its components.
fn resolve_oid(name: &str) -> Result<Vec<u64>> {
    if let Some((_, oid)) = OID_SHORT_NAMES.iter().find(|(short, _)| *short == name) {
        return Ok(oid.to_vec());
    }

    let components: std::result::Result<Vec<u64>, _> =
        name.split('.').map(str::parse::<u64>).collect();
    match components {
        Ok(oid) if oid.len() >= 2 => Ok(oid),
        _ => Err(Error::Config(format!(
            "Unknown CSR attribute OID '{name}'"
        ))),
    }
}

/// DER-encode a UTF8String.
fn der_utf8(value: &str) -> Vec<u8> {
    yasna::construct_der(|writer| writer.write_utf8_string(value))
}

/// DER-encode a SET holding a single UTF8String, the shape PKCS#10 attribute
/// values take.
fn der_utf8_set(value: &str) -> Vec<u8> {
    yasna::construct_der(|writer| {
        writer.write_set(|writer| {
            writer.next().write_utf8_string(value);
        });
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

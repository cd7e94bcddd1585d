//! Certificate issuance for plugin registrations
//!
//! Every plugin registration gets exactly one self-signed server
//! certificate whose subject alternative name is the plugin host. The
//! controller trusts that certificate (and only that certificate) when it
//! dials the plugin, and the plugin serves with the matching key.
//!
//! # Security Model
//!
//! - Keys are ECDSA P-256, which is stronger than RSA-2048
//! - Certificates are valid for 365 days and are never rotated
//! - The private key PEM is zeroized when the certificate is dropped
//! - Nothing is persisted by this module; callers store the PEMs only after
//!   signing succeeded, so a failure here leaves no partial state behind

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, Ia5String,
    IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber, PKCS_ECDSA_P256_SHA256,
};
use rand::RngCore;
use thiserror::Error;
use ::time::{Duration, OffsetDateTime};
use x509_parser::prelude::*;
use zeroize::Zeroizing;

/// Validity period of an issued certificate
pub const CERTIFICATE_VALIDITY_DAYS: i64 = 365;

/// Organization placed in every issued certificate's subject
pub const CERTIFICATE_ORGANIZATION: &str = "cosi.io";

/// Common name placed in every issued certificate's subject
pub const CERTIFICATE_COMMON_NAME: &str = "PluginCertificate";

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Host cannot be used as a subject alternative name
    #[error("invalid certificate subject: {0}")]
    InvalidSubject(String),

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Read the expiry of a PEM-encoded certificate
pub fn certificate_expiry(cert_pem: &str) -> Result<DateTime<Utc>> {
    let der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;
    DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| PkiError::ParseError("certificate expiry out of range".to_string()))
}

/// Subject alternative name for a plugin host
///
/// IP literals become IP SANs; everything else must be a valid DNS name.
pub fn subject_alt_name(host: &str) -> Result<SanType> {
    let host = host.trim();
    if host.is_empty() {
        return Err(PkiError::InvalidSubject("host is empty".to_string()));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    let name = Ia5String::try_from(host.to_string())
        .map_err(|e| PkiError::InvalidSubject(format!("{host}: {e}")))?;
    Ok(SanType::DnsName(name))
}

/// Random positive 128-bit serial number
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    // Keep the DER INTEGER positive
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

/// A freshly issued plugin certificate and its private key
pub struct PluginCertificate {
    cert_pem: String,
    key_pem: Zeroizing<String>,
    not_after: DateTime<Utc>,
}

impl PluginCertificate {
    /// Generate a key pair and a self-signed server certificate for `host`
    ///
    /// `host` must not carry a port.
    pub fn issue(host: &str) -> Result<Self> {
        let san = subject_alt_name(host)?;

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(CERTIFICATE_ORGANIZATION.to_string()),
        );
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(CERTIFICATE_COMMON_NAME.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.subject_alt_names = vec![san];
        params.serial_number = Some(random_serial());

        let not_before = OffsetDateTime::now_utc();
        let not_after = not_before + Duration::days(CERTIFICATE_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate plugin key: {}", e))
        })?;

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!(
                "failed to sign plugin certificate: {}",
                e
            ))
        })?;

        let not_after = DateTime::from_timestamp(not_after.unix_timestamp(), 0).ok_or_else(|| {
            PkiError::CertificateGenerationFailed("certificate expiry out of range".to_string())
        })?;

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: Zeroizing::new(key_pair.serialize_pem()),
            not_after,
        })
    }

    /// PEM-encoded certificate
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// PEM-encoded private key
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// End of the validity period
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }
}

impl std::fmt::Debug for PluginCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCertificate")
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parsed(cert: &PluginCertificate) -> Vec<u8> {
        parse_pem(cert.cert_pem()).unwrap()
    }

    #[test]
    fn certificate_and_key_are_pem_encoded() {
        let cert = PluginCertificate::issue("s3-plugin.plugins.svc").unwrap();
        assert!(cert.cert_pem().contains("BEGIN CERTIFICATE"));
        assert!(cert.key_pem().contains("PRIVATE KEY"));
        assert!(!cert.cert_pem().contains("PRIVATE KEY"));
    }

    #[test]
    fn debug_output_never_contains_key_material() {
        let cert = PluginCertificate::issue("10.0.0.7").unwrap();
        let debug = format!("{:?}", cert);
        assert!(!debug.contains("PRIVATE KEY"));
        assert!(debug.contains("not_after"));
    }

    #[test]
    fn subject_identifies_plugin_certificates() {
        let cert = PluginCertificate::issue("plugin.example.com").unwrap();
        let der = parsed(&cert);
        let (_, x509) = X509Certificate::from_der(&der).unwrap();

        let org = x509
            .subject()
            .iter_organization()
            .next()
            .and_then(|o| o.as_str().ok());
        let cn = x509
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok());
        assert_eq!(org, Some(CERTIFICATE_ORGANIZATION));
        assert_eq!(cn, Some(CERTIFICATE_COMMON_NAME));

        // Self-signed: issuer and subject are the same
        assert_eq!(x509.issuer(), x509.subject());
    }

    #[test]
    fn certificate_is_a_server_leaf() {
        let cert = PluginCertificate::issue("plugin.example.com").unwrap();
        let der = parsed(&cert);
        let (_, x509) = X509Certificate::from_der(&der).unwrap();

        assert!(!x509.is_ca());
        let eku = x509.extended_key_usage().unwrap().unwrap();
        assert!(eku.value.server_auth);
        let ku = x509.key_usage().unwrap().unwrap();
        assert!(ku.value.digital_signature());
        assert!(ku.value.key_encipherment());
    }

    #[test]
    fn certificate_is_valid_for_a_year() {
        let before = Utc::now();
        let cert = PluginCertificate::issue("plugin.example.com").unwrap();

        let days = (cert.not_after() - before).num_days();
        assert!((364..=365).contains(&days), "validity was {days} days");

        // The recorded expiry matches what is encoded in the certificate
        let encoded = certificate_expiry(cert.cert_pem()).unwrap();
        assert_eq!(encoded, cert.not_after());
    }

    #[test]
    fn serials_are_unique_per_issuance() {
        let a = PluginCertificate::issue("plugin.example.com").unwrap();
        let b = PluginCertificate::issue("plugin.example.com").unwrap();
        let der_a = parsed(&a);
        let der_b = parsed(&b);
        let (_, xa) = X509Certificate::from_der(&der_a).unwrap();
        let (_, xb) = X509Certificate::from_der(&der_b).unwrap();
        assert_ne!(xa.raw_serial(), xb.raw_serial());
        assert_ne!(a.key_pem(), b.key_pem());
    }

    #[rstest]
    #[case::ipv4("10.96.0.12", true)]
    #[case::ipv6("fd00::12", true)]
    #[case::dns("s3-plugin.plugins.svc.cluster.local", false)]
    #[case::short_dns("localhost", false)]
    fn san_matches_host_kind(#[case] host: &str, #[case] expect_ip: bool) {
        let cert = PluginCertificate::issue(host).unwrap();
        let der = parsed(&cert);
        let (_, x509) = X509Certificate::from_der(&der).unwrap();

        let san = x509.subject_alternative_name().unwrap().unwrap();
        assert_eq!(san.value.general_names.len(), 1);
        match &san.value.general_names[0] {
            GeneralName::IPAddress(bytes) => {
                assert!(expect_ip, "{host} should not be an IP SAN");
                let ip: IpAddr = host.parse().unwrap();
                let expected = match ip {
                    IpAddr::V4(v4) => v4.octets().to_vec(),
                    IpAddr::V6(v6) => v6.octets().to_vec(),
                };
                assert_eq!(bytes.to_vec(), expected);
            }
            GeneralName::DNSName(name) => {
                assert!(!expect_ip, "{host} should not be a DNS SAN");
                assert_eq!(*name, host);
            }
            other => panic!("unexpected SAN {other:?}"),
        }
    }

    #[test]
    fn empty_or_non_ascii_hosts_are_rejected() {
        assert!(matches!(
            PluginCertificate::issue(""),
            Err(PkiError::InvalidSubject(_))
        ));
        assert!(matches!(
            subject_alt_name("plügin.example.com"),
            Err(PkiError::InvalidSubject(_))
        ));
    }

    #[test]
    fn malformed_pem_is_a_parse_error() {
        assert!(matches!(
            parse_pem("not a pem"),
            Err(PkiError::ParseError(_))
        ));
        assert!(matches!(
            certificate_expiry("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n"),
            Err(PkiError::ParseError(_))
        ));
    }
}

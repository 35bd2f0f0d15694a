//! # Certificate Material
//!
//! RSA-2048 self-signed certificates valid for a fixed number of days, and the
//! checks that decide when an existing one has to be replaced.

use super::CertificateError;
use crate::constants::{CERTIFICATE_ROTATION_THRESHOLD_DAYS, CERTIFICATE_VALIDITY_DAYS};
use rcgen::{
    string::Ia5String, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, RsaKeySize, SanType, SerialNumber,
    PKCS_RSA_SHA256,
};
use std::fmt;
use std::net::IpAddr;
use ::time::{Duration, OffsetDateTime};
use x509_parser::prelude::*;
use zeroize::Zeroizing;

/// PEM-encoded certificate and private key
#[derive(Clone)]
pub struct CertificateMaterial {
    pub cert_pem: String,
    pub key_pem: Zeroizing<String>,
}

impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("cert_pem", &format!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Generate a certificate valid from now for the configured number of days
///
/// The first hostname becomes the subject CN; all hostnames are SANs.
pub fn generate_self_signed(hostnames: &[String]) -> Result<CertificateMaterial, CertificateError> {
    let now = OffsetDateTime::now_utc();
    generate_with_validity(
        hostnames,
        now,
        now + Duration::days(CERTIFICATE_VALIDITY_DAYS),
    )
}

/// Generate a certificate with an explicit validity window
pub fn generate_with_validity(
    hostnames: &[String],
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Result<CertificateMaterial, CertificateError> {
    let primary = hostnames.first().ok_or(CertificateError::NoHostnames)?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(primary.clone()));
    params.distinguished_name = dn;
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.not_before = not_before;
    params.not_after = not_after;
    params.serial_number = Some(SerialNumber::from_slice(&random_serial()));
    params.subject_alt_names = hostnames
        .iter()
        .map(|name| subject_alt_name(name))
        .collect::<Result<Vec<_>, _>>()?;

    let key = KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_2048)
        .map_err(CertificateError::KeyGeneration)?;
    let cert = params
        .self_signed(&key)
        .map_err(CertificateError::Generation)?;

    Ok(CertificateMaterial {
        cert_pem: cert.pem(),
        key_pem: Zeroizing::new(key.serialize_pem()),
    })
}

fn subject_alt_name(name: &str) -> Result<SanType, CertificateError> {
    if name.is_empty() {
        return Err(CertificateError::InvalidHostname {
            hostname: name.to_string(),
            reason: "empty".to_string(),
        });
    }
    if let Ok(ip) = name.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    Ia5String::try_from(name.to_string())
        .map(SanType::DnsName)
        .map_err(|e| CertificateError::InvalidHostname {
            hostname: name.to_string(),
            reason: e.to_string(),
        })
}

/// 128 random bits with the sign bit cleared so the DER integer stays positive
fn random_serial() -> [u8; 16] {
    let mut serial: [u8; 16] = rand::random();
    serial[0] &= 0x7f;
    if serial[0] == 0 {
        serial[0] = 1;
    }
    serial
}

/// What [`inspect`] learned from a stored certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Expiry as a Unix timestamp
    pub not_after: i64,
    pub common_name: Option<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
}

impl CertificateInfo {
    pub fn from_pem(pem_data: &[u8]) -> Result<Self, CertificateError> {
        let block = ::pem::parse(pem_data)
            .map_err(|e| CertificateError::Parse(format!("invalid PEM: {e}")))?;
        let (_, cert) = X509Certificate::from_der(block.contents())
            .map_err(|e| CertificateError::Parse(format!("invalid X.509 data: {e}")))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        let general_names: Vec<GeneralName<'_>> = cert
            .subject_alternative_name()
            .map_err(|e| CertificateError::Parse(format!("invalid SAN extension: {e}")))?
            .map(|san| san.value.general_names.clone())
            .unwrap_or_default();
        let dns_names = general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some((*dns).to_string()),
                _ => None,
            })
            .collect();
        let ip_addresses = general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::IPAddress(octets) => ip_from_octets(octets),
                _ => None,
            })
            .collect();

        Ok(Self {
            not_after: cert.validity().not_after.timestamp(),
            common_name,
            dns_names,
            ip_addresses,
        })
    }

    /// Whether the certificate is valid for `hostname`
    ///
    /// IP literals are matched against the IP SANs only. For names, DNS SANs
    /// take precedence and the CN is only consulted when there are none.
    pub fn covers(&self, hostname: &str) -> bool {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return self.ip_addresses.contains(&ip);
        }
        if self.dns_names.is_empty() {
            return self
                .common_name
                .as_deref()
                .is_some_and(|cn| hostname_matches(cn, hostname));
        }
        self.dns_names
            .iter()
            .any(|pattern| hostname_matches(pattern, hostname))
    }
}

fn ip_from_octets(octets: &[u8]) -> Option<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(octets) {
        return Some(IpAddr::from(v4));
    }
    <[u8; 16]>::try_from(octets).ok().map(IpAddr::from)
}

/// Exact, case-insensitive match, or a `*.` wildcard covering exactly one label
pub fn hostname_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let hostname = hostname.to_ascii_lowercase();
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return hostname
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix);
    }
    pattern == hostname
}

/// Whether a stored certificate can stay in place
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    /// Not parseable as a PEM X.509 certificate
    Corrupt(String),
    /// Expires within the rotation threshold
    Expiring { days_left: i64 },
    /// Does not cover the primary hostname
    HostnameMismatch,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Corrupt(reason) => write!(f, "corrupt ({reason})"),
            Self::Expiring { days_left } => write!(f, "expiring in {days_left} days"),
            Self::HostnameMismatch => write!(f, "hostname mismatch"),
        }
    }
}

/// Check a stored certificate against the primary hostname at `now`
///
/// A certificate is kept only when it expires more than the rotation
/// threshold after `now` and covers `primary_hostname`.
pub fn inspect(cert_pem: &[u8], primary_hostname: &str, now: OffsetDateTime) -> Verdict {
    let info = match CertificateInfo::from_pem(cert_pem) {
        Ok(info) => info,
        Err(e) => return Verdict::Corrupt(e.to_string()),
    };
    let remaining = info.not_after - now.unix_timestamp();
    if remaining <= Duration::days(CERTIFICATE_ROTATION_THRESHOLD_DAYS).whole_seconds() {
        return Verdict::Expiring {
            days_left: remaining.div_euclid(86_400),
        };
    }
    if !info.covers(primary_hostname) {
        return Verdict::HostnameMismatch;
    }
    Verdict::Valid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn test_generated_certificate_is_valid_for_a_year() {
        let names = hosts(&["api.example.com", "api.licensing.svc"]);
        let material = generate_self_signed(&names).expect("generate");
        let info = CertificateInfo::from_pem(material.cert_pem.as_bytes()).expect("parse");

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let days = (info.not_after - now) / 86_400;
        assert!((364..=365).contains(&days), "validity was {days} days");
        assert_eq!(info.common_name.as_deref(), Some("api.example.com"));
        assert_eq!(info.dns_names, names);
        assert!(material.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_ip_literals_are_not_dns_names() {
        let material = generate_self_signed(&hosts(&["svc.local", "10.0.0.7"])).expect("generate");
        let info = CertificateInfo::from_pem(material.cert_pem.as_bytes()).expect("parse");
        assert_eq!(info.dns_names, vec!["svc.local".to_string()]);
    }

    #[test]
    fn test_ip_primary_hostname_is_covered_by_its_ip_san() {
        let material =
            generate_self_signed(&hosts(&["10.0.0.5", "svc.ns.svc"])).expect("generate");
        let info = CertificateInfo::from_pem(material.cert_pem.as_bytes()).expect("parse");
        assert_eq!(info.ip_addresses, vec!["10.0.0.5".parse::<IpAddr>().expect("ip")]);
        assert!(info.covers("10.0.0.5"));
        assert!(!info.covers("10.0.0.6"));

        let now = OffsetDateTime::now_utc();
        assert_eq!(
            inspect(material.cert_pem.as_bytes(), "10.0.0.5", now),
            Verdict::Valid
        );
    }

    #[test]
    fn test_ipv6_san_round_trips() {
        let material = generate_self_signed(&hosts(&["svc.local", "fd00::1"])).expect("generate");
        let info = CertificateInfo::from_pem(material.cert_pem.as_bytes()).expect("parse");
        assert!(info.covers("fd00::1"));
    }

    #[test]
    fn test_no_hostnames_is_rejected() {
        assert!(matches!(
            generate_self_signed(&[]),
            Err(CertificateError::NoHostnames)
        ));
    }

    #[test]
    fn test_rotation_threshold_boundary() {
        let now = OffsetDateTime::now_utc();
        let names = hosts(&["svc.local"]);

        let soon = generate_with_validity(&names, now - Duration::days(1), now + Duration::days(89))
            .expect("generate");
        assert!(matches!(
            inspect(soon.cert_pem.as_bytes(), "svc.local", now),
            Verdict::Expiring { .. }
        ));

        let later =
            generate_with_validity(&names, now - Duration::days(1), now + Duration::days(91))
                .expect("generate");
        assert_eq!(
            inspect(later.cert_pem.as_bytes(), "svc.local", now),
            Verdict::Valid
        );
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let now = OffsetDateTime::now_utc();
        assert!(matches!(
            inspect(b"not a certificate", "svc.local", now),
            Verdict::Corrupt(_)
        ));
    }

    #[test]
    fn test_hostname_change_is_detected() {
        let material = generate_self_signed(&hosts(&["old.example.com"])).expect("generate");
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            inspect(material.cert_pem.as_bytes(), "new.example.com", now),
            Verdict::HostnameMismatch
        );
    }

    #[test]
    fn test_wildcard_covers_one_label() {
        assert!(hostname_matches("*.apps.example.com", "api.apps.example.com"));
        assert!(hostname_matches("API.example.com", "api.EXAMPLE.com"));
        assert!(!hostname_matches("*.apps.example.com", "a.b.apps.example.com"));
        assert!(!hostname_matches("*.apps.example.com", "apps.example.com"));
    }

    #[test]
    fn test_material_debug_hides_key() {
        let material = CertificateMaterial {
            cert_pem: "cert".to_string(),
            key_pem: Zeroizing::new("secret".to_string()),
        };
        assert!(!format!("{material:?}").contains("secret"));
    }
}

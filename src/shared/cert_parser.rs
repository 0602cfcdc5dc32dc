//! X.509 summaries for logging loaded client and trust certificates.
//!
//! Only public certificate fields are extracted; key material never passes
//! through here.

use std::net::{Ipv4Addr, Ipv6Addr};
use x509_parser::prelude::*;

/// Public fields of a DER-encoded certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicCertInfo {
    pub issuer: Option<String>,
    pub subject: Option<String>,
    /// Unix timestamp.
    pub valid_from: Option<i64>,
    /// Unix timestamp.
    pub valid_to: Option<i64>,
    pub san: Vec<String>,
}

impl BasicCertInfo {
    /// True when `now` (Unix seconds) is past the end of the validity period.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.valid_to.map(|end| now > end).unwrap_or(false)
    }
}

fn common_name_or_full(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| name.to_string())
}

/// Parses the public fields of `der`. Unparseable input yields an empty summary.
pub fn parse_x509_basic(der: &[u8]) -> BasicCertInfo {
    let Ok((_, cert)) = X509Certificate::from_der(der) else {
        return BasicCertInfo::default();
    };

    let mut info = BasicCertInfo {
        issuer: Some(common_name_or_full(cert.issuer())),
        subject: Some(common_name_or_full(cert.subject())),
        valid_from: Some(cert.validity().not_before.timestamp()),
        valid_to: Some(cert.validity().not_after.timestamp()),
        san: Vec::new(),
    };

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            match name {
                GeneralName::DNSName(dns) => info.san.push(dns.to_string()),
                GeneralName::IPAddress(ip) => {
                    if let Ok(octets) = <[u8; 4]>::try_from(*ip) {
                        info.san.push(Ipv4Addr::from(octets).to_string());
                    } else if let Ok(octets) = <[u8; 16]>::try_from(*ip) {
                        info.san.push(Ipv6Addr::from(octets).to_string());
                    }
                }
                _ => {}
            }
        }
    }

    info
}

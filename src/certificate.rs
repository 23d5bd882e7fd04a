//! Self-signed certificate generation and fingerprint helpers.
//!
//! Useful for tests and for deployments that authenticate servers by pinned
//! fingerprint instead of a CA hierarchy.

use rcgen::{
    Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};

use crate::credential::CertifiedKey;
use crate::Error;

/// Generate a self-signed P-256 certificate for `name`, valid for one year.
pub fn generate_self_signed(name: &str) -> Result<CertifiedKey, Error> {
    let failed = |e: rcgen::RcgenError| Error::ConfigError(format!("certificate generation: {e}"));

    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256).map_err(failed)?;

    let mut params = CertificateParams::new(vec![name.to_string()]);
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "pakls".to_string());
    dn.push(DnType::CommonName, name.to_string());
    params.distinguished_name = dn;
    params.is_ca = IsCa::NoCa;
    params.key_pair = Some(key_pair);

    let not_before = time::OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(365);

    let cert = RcgenCertificate::from_params(params).map_err(failed)?;
    let cert_der = cert.serialize_der().map_err(failed)?;
    let key_der = cert.serialize_private_key_der();

    CertifiedKey::new(key_der, vec![cert_der])
}

/// SHA-256 over the DER certificate.
pub fn fingerprint(cert_der: &[u8]) -> [u8; 32] {
    Sha256::digest(cert_der).into()
}

/// Format a fingerprint as colon separated hex, e.g. "AF:12:F6:...".
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_usable_key() {
        let ck = generate_self_signed("unit.test").unwrap();
        assert_eq!(ck.chain().len(), 1);
        assert!(!ck.private_key().is_empty());
        assert_ne!(fingerprint(ck.leaf()), [0; 32]);
    }

    #[test]
    fn fingerprint_formatting() {
        assert_eq!(format_fingerprint(&[0xAF, 0x12, 0xF6, 0x38, 0x2A]), "AF:12:F6:38:2A");
        let formatted = format_fingerprint(&fingerprint(b"anything"));
        assert_eq!(formatted.len(), 95);
        assert!(formatted.split(':').all(|s| u8::from_str_radix(s, 16).is_ok()));
    }
}

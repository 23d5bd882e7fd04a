//! ECDSA P-256 signing and certificate signature verification.

use der::Decode;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use x509_cert::spki::ObjectIdentifier;
use x509_cert::Certificate as X509Certificate;

use crate::buffer::Buf;
use crate::crypto::provider::CryptoError;

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

pub(super) fn sign(private_key: &[u8], message: &[u8]) -> Result<Buf, CryptoError> {
    let key = SigningKey::from_pkcs8_der(private_key)
        .map_err(|_| CryptoError::InvalidInput("private key is not PKCS#8 P-256".into()))?;
    let signature: Signature = key
        .try_sign(message)
        .map_err(|_| CryptoError::Backend("signing failed".into()))?;
    Ok(Buf::from_slice(signature.to_der().as_bytes()))
}

pub(super) fn verify(cert_der: &[u8], message: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
    let cert = X509Certificate::from_der(cert_der)
        .map_err(|e| CryptoError::InvalidInput(format!("failed to parse certificate: {e}")))?;
    let spki = &cert.tbs_certificate.subject_public_key_info;

    if spki.algorithm.oid != OID_EC_PUBLIC_KEY {
        return Err(CryptoError::InvalidInput(format!(
            "unsupported public key algorithm: {}",
            spki.algorithm.oid
        )));
    }
    let curve: ObjectIdentifier = spki
        .algorithm
        .parameters
        .as_ref()
        .ok_or_else(|| CryptoError::InvalidInput("missing EC curve parameter".into()))?
        .decode_as()
        .map_err(|_| CryptoError::InvalidInput("invalid EC curve parameter".into()))?;
    if curve != OID_P256 {
        return Err(CryptoError::InvalidInput(format!("unsupported EC curve: {}", curve)));
    }

    let pubkey_bytes = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| CryptoError::InvalidInput("invalid subject_public_key bitstring".into()))?;
    let key = VerifyingKey::from_sec1_bytes(pubkey_bytes)
        .map_err(|_| CryptoError::InvalidInput("invalid P-256 public key".into()))?;

    let Ok(sig) = Signature::from_der(signature) else {
        return Ok(false);
    };
    Ok(key.verify(message, &sig).is_ok())
}

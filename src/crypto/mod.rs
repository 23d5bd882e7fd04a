//! Cryptographic capability interface and the RustCrypto backend.

pub mod provider;
pub mod rust_crypto;

pub use provider::{ActiveKeyExchange, AeadContext, CryptoError, CryptoProvider, CryptoSafe};
pub use provider::{PakeOutcome, PakeProver, PakeResponse, TrafficKeys};

pub use crate::types::HashAlgorithm;

/// Build the AAD of a protected record.
///
/// `content_type | version | sequence | plaintext length`.
pub(crate) fn record_aad(content_type: u8, version: u16, seq: u64, len: usize) -> [u8; 13] {
    let mut aad = [0u8; 13];
    aad[0] = content_type;
    aad[1..3].copy_from_slice(&version.to_be_bytes());
    aad[3..11].copy_from_slice(&seq.to_be_bytes());
    aad[11..13].copy_from_slice(&(len as u16).to_be_bytes());
    aad
}

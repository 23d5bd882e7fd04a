//! RustCrypto backend, the production [`CryptoProvider`].
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use pakls::Config;
//! use pakls::crypto::rust_crypto;
//!
//! let config = Config::builder()
//!     .with_crypto_provider(rust_crypto::default_provider())
//!     .build()
//!     .unwrap();
//! # let _ = Arc::new(config);
//! ```
//!
//! # Supported Cipher Suites
//!
//! - `TLS_AES_128_GCM_SHA256` (0x1301), `TLS_AES_256_GCM_SHA384` (0x1302)
//! - `TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256` (0xC02B)
//! - `TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384` (0xC02C)
//!
//! # Key Exchange
//!
//! X25519 for the ephemeral exchange, ECDSA P-256 for certificate signatures,
//! SPAKE2+ on P-256 for password authentication.
//!
//! # Random Number Generation
//!
//! Uses `OsRng` from the `rand` crate.

mod cipher_suite;
mod hkdf;
mod kx_group;
mod sign;
pub mod spake2plus;

use std::sync::Arc;

use rand::RngCore;

use crate::buffer::Buf;
use crate::credential::{PakeOption, SPAKE2PLUS_PRERELEASE};
use crate::crypto::provider::{
    ActiveKeyExchange, CryptoError, CryptoProvider, PakeProver, PakeResponse, TrafficKeys,
};
use crate::types::{CipherSuite, HashAlgorithm, ProtocolVersion, Random, Role};

use cipher_suite::{AesGcm, ALL_CIPHER_SUITES, IV_LEN};

static PAKE_ALGORITHMS: &[&str] = &[SPAKE2PLUS_PRERELEASE];

/// Provider backed by RustCrypto crates.
#[derive(Debug, Default)]
pub struct RustCryptoProvider;

/// The default RustCrypto provider as a shareable trait object.
pub fn default_provider() -> Arc<dyn CryptoProvider> {
    Arc::new(RustCryptoProvider)
}

impl CryptoProvider for RustCryptoProvider {
    fn cipher_suites(&self) -> &[CipherSuite] {
        ALL_CIPHER_SUITES
    }

    fn pake_algorithms(&self) -> &[&'static str] {
        PAKE_ALGORITHMS
    }

    fn fill_random(&self, out: &mut [u8]) -> Result<(), CryptoError> {
        rand::rngs::OsRng
            .try_fill_bytes(out)
            .map_err(|e| CryptoError::Backend(format!("OsRng: {e}")))
    }

    fn start_key_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, CryptoError> {
        Ok(Box::new(kx_group::X25519KeyExchange::new()))
    }

    fn hash(&self, alg: HashAlgorithm, data: &[u8]) -> Buf {
        hkdf::hash(alg, data)
    }

    fn derive_master_secret(
        &self,
        version: ProtocolVersion,
        suite: CipherSuite,
        pre_master: &[u8],
        client_random: &Random,
        server_random: &Random,
    ) -> Result<Buf, CryptoError> {
        hkdf::master_secret(version, suite, pre_master, client_random, server_random)
    }

    fn derive_keys(
        &self,
        suite: CipherSuite,
        master_secret: &[u8],
        client_random: &Random,
        server_random: &Random,
    ) -> Result<TrafficKeys, CryptoError> {
        let block = zeroize::Zeroizing::new(hkdf::key_block(
            suite,
            master_secret,
            client_random,
            server_random,
            IV_LEN,
        )?);
        let k = suite.key_len();
        let (client_key, rest) = block.split_at(k);
        let (server_key, rest) = rest.split_at(k);
        let (client_iv, server_iv) = rest.split_at(IV_LEN);

        Ok(TrafficKeys {
            client_write: Box::new(AesGcm::new(client_key, client_iv)?),
            server_write: Box::new(AesGcm::new(server_key, server_iv)?),
        })
    }

    fn finished_mac(
        &self,
        suite: CipherSuite,
        master_secret: &[u8],
        sender: Role,
        transcript_hash: &[u8],
    ) -> Result<Buf, CryptoError> {
        hkdf::finished(suite, master_secret, sender, transcript_hash)
    }

    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Buf, CryptoError> {
        sign::sign(private_key, message)
    }

    fn verify_signature(
        &self,
        cert_der: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, CryptoError> {
        sign::verify(cert_der, message, signature)
    }

    fn start_pake_prover(
        &self,
        option: &PakeOption,
        client_id: &[u8],
        server_id: &[u8],
    ) -> Result<Box<dyn PakeProver>, CryptoError> {
        Ok(Box::new(spake2plus::Spake2PlusProver::new(
            option, client_id, server_id,
        )?))
    }

    fn pake_respond(
        &self,
        option: &PakeOption,
        client_id: &[u8],
        server_id: &[u8],
        prover_share: &[u8],
    ) -> Result<PakeResponse, CryptoError> {
        spake2plus::respond(option, client_id, server_id, prover_share)
    }
}

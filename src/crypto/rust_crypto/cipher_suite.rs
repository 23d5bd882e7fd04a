//! AES-GCM record protection using RustCrypto.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Key};
use zeroize::Zeroizing;

use crate::buffer::Buf;
use crate::crypto::provider::{AeadContext, CryptoError};
use crate::types::CipherSuite;

pub(super) const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Suites implemented by this backend, in preference order.
pub(super) static ALL_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS_AES_128_GCM_SHA256,
    CipherSuite::TLS_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
];

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

/// AES-GCM with a static IV, one per direction.
pub(super) struct AesGcm {
    cipher: Cipher,
    iv: Zeroizing<[u8; IV_LEN]>,
}

impl std::fmt::Debug for AesGcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cipher {
            Cipher::Aes128(_) => f.debug_tuple("AesGcm::Aes128").finish(),
            Cipher::Aes256(_) => f.debug_tuple("AesGcm::Aes256").finish(),
        }
    }
}

impl AesGcm {
    pub(super) fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let cipher = match key.len() {
            16 => Cipher::Aes128(Box::new(Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key)))),
            32 => Cipher::Aes256(Box::new(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))),
            n => {
                return Err(CryptoError::InvalidInput(format!(
                    "invalid AES-GCM key size: {}",
                    n
                )))
            }
        };
        let iv: [u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| CryptoError::InvalidInput(format!("invalid IV size: {}", iv.len())))?;
        Ok(AesGcm {
            cipher,
            iv: Zeroizing::new(iv),
        })
    }

    fn nonce(&self, seq: u64) -> [u8; IV_LEN] {
        let mut nonce = *self.iv;
        for (n, s) in nonce[IV_LEN - 8..].iter_mut().zip(seq.to_be_bytes()) {
            *n ^= s;
        }
        nonce
    }
}

impl AeadContext for AesGcm {
    fn tag_len(&self) -> usize {
        TAG_LEN
    }

    fn seal(&mut self, seq: u64, aad: &[u8], data: &mut Buf) -> Result<(), CryptoError> {
        let nonce = self.nonce(seq);
        let nonce = GenericArray::from_slice(&nonce);
        let res = match &self.cipher {
            Cipher::Aes128(c) => c.encrypt_in_place(nonce, aad, data),
            Cipher::Aes256(c) => c.encrypt_in_place(nonce, aad, data),
        };
        res.map_err(|_| CryptoError::Backend("AES-GCM encryption failed".into()))
    }

    fn open(&mut self, seq: u64, aad: &[u8], data: &mut Buf) -> Result<(), CryptoError> {
        if data.len() < TAG_LEN {
            return Err(CryptoError::Authentication);
        }
        let nonce = self.nonce(seq);
        let nonce = GenericArray::from_slice(&nonce);
        let res = match &self.cipher {
            Cipher::Aes128(c) => c.decrypt_in_place(nonce, aad, data),
            Cipher::Aes256(c) => c.decrypt_in_place(nonce, aad, data),
        };
        res.map_err(|_| CryptoError::Authentication)
    }
}

//! HKDF/HMAC key schedule using RustCrypto crates.
//!
//! ```text
//! master   = HKDF-Expand(HKDF-Extract(client_random || server_random, pre_master),
//!                        "master secret" || version || suite, hash_len)
//! keys     = HKDF-Expand(master, "key expansion" || client_random || server_random,
//!                        2 * key_len + 2 * iv_len)
//! finished = HMAC(HKDF-Expand(master, "client finished" | "server finished", hash_len),
//!                 transcript_hash)
//! ```

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384};

use crate::buffer::Buf;
use crate::crypto::provider::CryptoError;
use crate::types::{CipherSuite, HashAlgorithm, ProtocolVersion, Random, Role};

pub(super) fn hash(alg: HashAlgorithm, data: &[u8]) -> Buf {
    match alg {
        HashAlgorithm::SHA256 => Buf::from_slice(&Sha256::digest(data)),
        HashAlgorithm::SHA384 => Buf::from_slice(&Sha384::digest(data)),
    }
}

fn extract(alg: HashAlgorithm, salt: &[u8], ikm: &[u8]) -> Buf {
    match alg {
        HashAlgorithm::SHA256 => {
            let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
            Buf::from_slice(&prk)
        }
        HashAlgorithm::SHA384 => {
            let (prk, _) = Hkdf::<Sha384>::extract(Some(salt), ikm);
            Buf::from_slice(&prk)
        }
    }
}

pub(super) fn expand(
    alg: HashAlgorithm,
    prk: &[u8],
    info: &[u8],
    len: usize,
) -> Result<Buf, CryptoError> {
    let mut out = Buf::new();
    out.resize(len, 0);
    let res = match alg {
        HashAlgorithm::SHA256 => Hkdf::<Sha256>::from_prk(prk)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid PRK: {:?}", e)))?
            .expand(info, &mut out),
        HashAlgorithm::SHA384 => Hkdf::<Sha384>::from_prk(prk)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid PRK: {:?}", e)))?
            .expand(info, &mut out),
    };
    res.map_err(|e| CryptoError::Backend(format!("HKDF expand failed: {:?}", e)))?;
    Ok(out)
}

pub(super) fn hmac(alg: HashAlgorithm, key: &[u8], data: &[u8]) -> Result<Buf, CryptoError> {
    let tag = match alg {
        HashAlgorithm::SHA256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                .map_err(|_| CryptoError::InvalidInput("invalid HMAC key".into()))?;
            mac.update(data);
            Buf::from_slice(&mac.finalize().into_bytes())
        }
        HashAlgorithm::SHA384 => {
            let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key)
                .map_err(|_| CryptoError::InvalidInput("invalid HMAC key".into()))?;
            mac.update(data);
            Buf::from_slice(&mac.finalize().into_bytes())
        }
    };
    Ok(tag)
}

pub(super) fn master_secret(
    version: ProtocolVersion,
    suite: CipherSuite,
    pre_master: &[u8],
    client_random: &Random,
    server_random: &Random,
) -> Result<Buf, CryptoError> {
    let alg = suite.hash_algorithm();
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(&client_random.0);
    salt[32..].copy_from_slice(&server_random.0);
    let prk = extract(alg, &salt, pre_master);

    let mut info = b"master secret".to_vec();
    info.extend_from_slice(&version.as_u16().to_be_bytes());
    info.extend_from_slice(&suite.as_u16().to_be_bytes());
    expand(alg, &prk, &info, alg.output_len())
}

/// `(client_key, server_key, client_iv, server_iv)` laid out in one block.
pub(super) fn key_block(
    suite: CipherSuite,
    master: &[u8],
    client_random: &Random,
    server_random: &Random,
    iv_len: usize,
) -> Result<Buf, CryptoError> {
    let key_len = suite.key_len();
    if key_len == 0 {
        return Err(CryptoError::InvalidInput(format!("unsupported suite {:?}", suite)));
    }
    let mut info = b"key expansion".to_vec();
    info.extend_from_slice(&client_random.0);
    info.extend_from_slice(&server_random.0);
    expand(suite.hash_algorithm(), master, &info, 2 * key_len + 2 * iv_len)
}

pub(super) fn finished(
    suite: CipherSuite,
    master: &[u8],
    sender: Role,
    transcript_hash: &[u8],
) -> Result<Buf, CryptoError> {
    let alg = suite.hash_algorithm();
    let label: &[u8] = match sender {
        Role::Client => b"client finished",
        Role::Server => b"server finished",
    };
    let key = expand(alg, master, label, alg.output_len())?;
    hmac(alg, &key, transcript_hash)
}

//! SPAKE2+ over P-256 (RFC 9383 constants).
//!
//! # Protocol Flow
//!
//! ```text
//! Prover (client)                          Verifier (server)
//! X = x*G + w0*M           ---- X ---->
//!                                          Y = y*G + w0*N
//!                                          Z = y*(X - w0*M), V = y*L
//!                          <-- Y, cV --
//! Z = x*(Y - w0*N)
//! V = w1*(Y - w0*N)
//! check cV                 ---- cP --->    check cP
//! ```
//!
//! `L = w1*G` is the registration record the server stores instead of the
//! password. Both confirmation keys and the shared key come from
//! `SHA-256(TT)` where `TT` is the length-prefixed protocol transcript.

use elliptic_curve::bigint::U256;
use elliptic_curve::ops::Reduce;
use elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use hkdf::Hkdf;
use p256::{AffinePoint, EncodedPoint, FieldBytes, NonZeroScalar, ProjectivePoint, Scalar};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::hkdf::{expand, hmac};
use crate::buffer::Buf;
use crate::credential::{PakeOption, SPAKE2PLUS_PRERELEASE};
use crate::crypto::provider::{CryptoError, PakeOutcome, PakeProver, PakeResponse};
use crate::types::HashAlgorithm;

const M_BYTES: [u8; 33] = [
    0x02, 0x88, 0x6e, 0x2f, 0x97, 0xac, 0xe4, 0x6e, 0x55, 0xba, 0x9d,
    0xd7, 0x24, 0x25, 0x79, 0xf2, 0x99, 0x3b, 0x64, 0xe1, 0x6e, 0xf3,
    0xdc, 0xab, 0x95, 0xaf, 0xd4, 0x97, 0x33, 0x3d, 0x8f, 0xa1, 0x2f,
];

const N_BYTES: [u8; 33] = [
    0x03, 0xd8, 0xbb, 0xd6, 0xc6, 0x39, 0xc6, 0x29, 0x37, 0xb0, 0x4d,
    0x99, 0x7f, 0x38, 0xc3, 0x77, 0x07, 0x19, 0xc6, 0x29, 0xd7, 0x01,
    0x4d, 0x49, 0xa2, 0x4b, 0x4f, 0x98, 0xba, 0xa1, 0x29, 0x2b, 0x49,
];

const CONTEXT: &[u8] = b"pakls SPAKE2+ P256-SHA256-HKDF-HMAC";
const REGISTRATION_SALT: &[u8] = b"pakls SPAKE2+ registration";

/// Password derived SPAKE2+ material.
///
/// The client keeps `w0` and `w1`. The server keeps `w0` and the
/// registration record `L = w1*G`.
#[derive(Clone)]
pub struct Registration {
    pub w0: Zeroizing<[u8; 32]>,
    pub w1: Zeroizing<[u8; 32]>,
    pub registration_record: [u8; 65],
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").finish_non_exhaustive()
    }
}

/// Derive `w0`, `w1` and the registration record from a password.
///
/// Identities are bound into the derivation, so the same password yields
/// different material for different `(client_id, server_id)` pairs.
pub fn register(
    password: &[u8],
    client_id: &[u8],
    server_id: &[u8],
) -> Result<Registration, CryptoError> {
    let mut info = Vec::new();
    push_prefixed(&mut info, client_id);
    push_prefixed(&mut info, server_id);

    let mut okm = Zeroizing::new([0u8; 64]);
    Hkdf::<Sha256>::new(Some(REGISTRATION_SALT), password)
        .expand(&info, &mut okm[..])
        .map_err(|e| CryptoError::Backend(format!("HKDF expand failed: {:?}", e)))?;

    let w0 = reduce(&okm[..32]);
    let w1 = reduce(&okm[32..]);
    let l = ProjectivePoint::GENERATOR * w1;

    let mut registration_record = [0u8; 65];
    registration_record.copy_from_slice(&encode_point(&l));
    Ok(Registration {
        w0: Zeroizing::new(w0.to_bytes().into()),
        w1: Zeroizing::new(w1.to_bytes().into()),
        registration_record,
    })
}

fn push_prefixed(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u64).to_le_bytes());
    out.extend_from_slice(data);
}

fn reduce(bytes: &[u8]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(bytes))
}

fn scalar(bytes: &[u8]) -> Result<Scalar, CryptoError> {
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidInput("SPAKE2+ scalar must be 32 bytes".into()));
    }
    Ok(reduce(bytes))
}

fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint, CryptoError> {
    let encoded = EncodedPoint::from_bytes(bytes)
        .map_err(|_| CryptoError::InvalidInput("invalid point encoding".into()))?;
    let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    let point = ProjectivePoint::from(
        affine.ok_or_else(|| CryptoError::InvalidInput("point not on curve".into()))?,
    );
    if point == ProjectivePoint::IDENTITY {
        return Err(CryptoError::InvalidInput("identity point".into()));
    }
    Ok(point)
}

fn encode_point(point: &ProjectivePoint) -> Vec<u8> {
    AffinePoint::from(*point)
        .to_encoded_point(false)
        .as_bytes()
        .to_vec()
}

fn constants() -> Result<(ProjectivePoint, ProjectivePoint), CryptoError> {
    Ok((decode_point(&M_BYTES)?, decode_point(&N_BYTES)?))
}

struct Keys {
    confirm_p: Zeroizing<Buf>,
    confirm_v: Zeroizing<Buf>,
    shared: Buf,
}

fn derive_keys(
    client_id: &[u8],
    server_id: &[u8],
    x_share: &[u8],
    y_share: &[u8],
    z: &ProjectivePoint,
    v: &ProjectivePoint,
    w0: &Scalar,
) -> Result<Keys, CryptoError> {
    if *z == ProjectivePoint::IDENTITY || *v == ProjectivePoint::IDENTITY {
        return Err(CryptoError::InvalidInput("degenerate SPAKE2+ share".into()));
    }
    let mut tt = Zeroizing::new(Vec::new());
    push_prefixed(&mut tt, CONTEXT);
    push_prefixed(&mut tt, client_id);
    push_prefixed(&mut tt, server_id);
    push_prefixed(&mut tt, &M_BYTES);
    push_prefixed(&mut tt, &N_BYTES);
    push_prefixed(&mut tt, x_share);
    push_prefixed(&mut tt, y_share);
    push_prefixed(&mut tt, &encode_point(z));
    push_prefixed(&mut tt, &encode_point(v));
    push_prefixed(&mut tt, &w0.to_bytes());

    let k_main = Zeroizing::new(Buf::from_slice(&Sha256::digest(&tt[..])));
    let confirmation = Zeroizing::new(expand(
        HashAlgorithm::SHA256,
        &k_main,
        b"ConfirmationKeys",
        64,
    )?);
    let shared = expand(HashAlgorithm::SHA256, &k_main, b"SharedKey", 32)?;

    Ok(Keys {
        confirm_p: Zeroizing::new(Buf::from_slice(&confirmation[..32])),
        confirm_v: Zeroizing::new(Buf::from_slice(&confirmation[32..])),
        shared,
    })
}

fn check_algorithm(option: &PakeOption) -> Result<(), CryptoError> {
    if option.algorithm() != SPAKE2PLUS_PRERELEASE {
        return Err(CryptoError::InvalidInput(format!(
            "unsupported PAKE algorithm {}",
            option.algorithm()
        )));
    }
    Ok(())
}

// ============================================================================
// Prover
// ============================================================================

pub(super) struct Spake2PlusProver {
    client_id: Buf,
    server_id: Buf,
    w0: Scalar,
    w1: Scalar,
    x: NonZeroScalar,
    share: Vec<u8>,
}

impl std::fmt::Debug for Spake2PlusProver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spake2PlusProver")
            .field("share_len", &self.share.len())
            .finish_non_exhaustive()
    }
}

impl Spake2PlusProver {
    pub(super) fn new(
        option: &PakeOption,
        client_id: &[u8],
        server_id: &[u8],
    ) -> Result<Self, CryptoError> {
        check_algorithm(option)?;
        let (w0, w1) = match option.component("password") {
            Some(password) => {
                let reg = register(password, client_id, server_id)?;
                (scalar(&reg.w0[..])?, scalar(&reg.w1[..])?)
            }
            None => {
                let missing = || CryptoError::InvalidInput("missing w0/w1".into());
                (
                    scalar(option.component("w0").ok_or_else(missing)?)?,
                    scalar(option.component("w1").ok_or_else(missing)?)?,
                )
            }
        };

        let (m, _) = constants()?;
        let x = NonZeroScalar::random(&mut rand::rngs::OsRng);
        let share = encode_point(&(ProjectivePoint::GENERATOR * *x + m * w0));

        Ok(Spake2PlusProver {
            client_id: Buf::from_slice(client_id),
            server_id: Buf::from_slice(server_id),
            w0,
            w1,
            x,
            share,
        })
    }
}

impl PakeProver for Spake2PlusProver {
    fn algorithm(&self) -> &str {
        SPAKE2PLUS_PRERELEASE
    }

    fn share(&self) -> &[u8] {
        &self.share
    }

    fn finish(
        self: Box<Self>,
        verifier_share: &[u8],
        verifier_confirm: &[u8],
    ) -> Result<PakeOutcome, CryptoError> {
        let (_, n) = constants()?;
        let y = decode_point(verifier_share)?;
        let t = y - n * self.w0;
        let z = t * *self.x;
        let v = t * self.w1;

        let keys = derive_keys(
            &self.client_id,
            &self.server_id,
            &self.share,
            verifier_share,
            &z,
            &v,
            &self.w0,
        )?;

        let expected = hmac(HashAlgorithm::SHA256, &keys.confirm_v, &self.share)?;
        if !bool::from(expected.ct_eq(verifier_confirm)) {
            return Err(CryptoError::Authentication);
        }

        Ok(PakeOutcome {
            shared_secret: keys.shared,
            confirm: hmac(HashAlgorithm::SHA256, &keys.confirm_p, verifier_share)?,
        })
    }
}

// ============================================================================
// Verifier
// ============================================================================

pub(super) fn respond(
    option: &PakeOption,
    client_id: &[u8],
    server_id: &[u8],
    prover_share: &[u8],
) -> Result<PakeResponse, CryptoError> {
    check_algorithm(option)?;
    let missing = || CryptoError::InvalidInput("missing w0/registrationRecord".into());
    let w0 = scalar(option.component("w0").ok_or_else(missing)?)?;
    let l = decode_point(option.component("registrationRecord").ok_or_else(missing)?)?;

    let (m, n) = constants()?;
    let x = decode_point(prover_share)?;
    let y = NonZeroScalar::random(&mut rand::rngs::OsRng);
    let share = encode_point(&(ProjectivePoint::GENERATOR * *y + n * w0));

    let z = (x - m * w0) * *y;
    let v = l * *y;

    let keys = derive_keys(client_id, server_id, prover_share, &share, &z, &v, &w0)?;

    Ok(PakeResponse {
        confirm: hmac(HashAlgorithm::SHA256, &keys.confirm_v, prover_share)?,
        expected_confirm: hmac(HashAlgorithm::SHA256, &keys.confirm_p, &share)?,
        share: Buf::from_slice(&share),
        shared_secret: keys.shared,
    })
}

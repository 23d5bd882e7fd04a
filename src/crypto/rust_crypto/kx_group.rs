//! X25519 key exchange using x25519-dalek.

use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::buffer::Buf;
use crate::crypto::provider::{ActiveKeyExchange, CryptoError};

pub(super) struct X25519KeyExchange {
    secret: EphemeralSecret,
    public_key: [u8; 32],
}

impl std::fmt::Debug for X25519KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X25519KeyExchange").finish_non_exhaustive()
    }
}

impl X25519KeyExchange {
    pub(super) fn new() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
        let public_key = PublicKey::from(&secret).to_bytes();
        X25519KeyExchange { secret, public_key }
    }
}

impl ActiveKeyExchange for X25519KeyExchange {
    fn pub_key(&self) -> &[u8] {
        &self.public_key
    }

    fn complete(self: Box<Self>, peer_pub: &[u8]) -> Result<Buf, CryptoError> {
        let peer: [u8; 32] = peer_pub
            .try_into()
            .map_err(|_| CryptoError::InvalidInput("X25519 share must be 32 bytes".into()))?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidInput("low order X25519 share".into()));
        }
        Ok(Buf::from_slice(shared.as_bytes()))
    }
}

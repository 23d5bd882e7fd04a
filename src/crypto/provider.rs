//! Cryptographic provider traits.
//!
//! The engine never performs a cryptographic transform itself. Everything from
//! randomness to record protection goes through one capability object, a
//! [`CryptoProvider`], shared between engines as `Arc<dyn CryptoProvider>`.
//!
//! The production backend is [`rust_crypto`](crate::crypto::rust_crypto).
//! Tests swap in doubles that wrap it and override single operations.
//!
//! # Thread Safety
//!
//! All provider traits require `Send + Sync + UnwindSafe + RefUnwindSafe` so a
//! provider can be shared by engines on different threads.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

use thiserror::Error;

use crate::buffer::Buf;
use crate::credential::PakeOption;
use crate::types::{CipherSuite, HashAlgorithm, ProtocolVersion, Random, Role};

/// Marker trait for types that are safe to use in crypto provider components.
pub trait CryptoSafe: Send + Sync + Debug + UnwindSafe + RefUnwindSafe {}

impl<T: Send + Sync + Debug + UnwindSafe + RefUnwindSafe> CryptoSafe for T {}

/// Failure of a provider operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// An integrity check failed: AEAD tag, MAC or PAKE confirmation.
    #[error("authentication failed")]
    Authentication,
    /// The caller handed the provider something it cannot use.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The backend itself failed.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Directional record protection for one negotiated suite.
///
/// The context owns its key and static IV. The per-record nonce is the IV
/// XORed with the record sequence number.
pub trait AeadContext: CryptoSafe {
    /// Bytes added by [`seal`](Self::seal).
    fn tag_len(&self) -> usize;

    /// Encrypt `data` in place and append the tag.
    fn seal(&mut self, seq: u64, aad: &[u8], data: &mut Buf) -> Result<(), CryptoError>;

    /// Verify and strip the tag, decrypting `data` in place.
    ///
    /// Fails with [`CryptoError::Authentication`] when the tag does not verify.
    fn open(&mut self, seq: u64, aad: &[u8], data: &mut Buf) -> Result<(), CryptoError>;
}

/// Both directions of traffic protection derived from one master secret.
#[derive(Debug)]
pub struct TrafficKeys {
    pub client_write: Box<dyn AeadContext>,
    pub server_write: Box<dyn AeadContext>,
}

impl TrafficKeys {
    /// Split into `(write, read)` contexts for the given side.
    pub fn split(self, role: Role) -> (Box<dyn AeadContext>, Box<dyn AeadContext>) {
        match role {
            Role::Client => (self.client_write, self.server_write),
            Role::Server => (self.server_write, self.client_write),
        }
    }
}

/// Ephemeral key exchange for one handshake.
pub trait ActiveKeyExchange: CryptoSafe {
    /// Our public share.
    fn pub_key(&self) -> &[u8];

    /// Consume the exchange and compute the shared secret with `peer_pub`.
    fn complete(self: Box<Self>, peer_pub: &[u8]) -> Result<Buf, CryptoError>;
}

/// Result of a finished PAKE run on either side.
#[derive(Debug)]
pub struct PakeOutcome {
    /// Key material mixed into the pre-master secret.
    pub shared_secret: Buf,
    /// Confirmation value to send to the peer.
    pub confirm: Buf,
}

/// Client half of a PAKE run, created when the ClientHello is built.
pub trait PakeProver: CryptoSafe {
    /// Algorithm name this prover runs.
    fn algorithm(&self) -> &str;

    /// Share sent in the ClientHello offer.
    fn share(&self) -> &[u8];

    /// Process the verifier's share and confirmation.
    ///
    /// Fails with [`CryptoError::Authentication`] when the verifier's
    /// confirmation does not match, which is what a wrong password looks like.
    fn finish(
        self: Box<Self>,
        verifier_share: &[u8],
        verifier_confirm: &[u8],
    ) -> Result<PakeOutcome, CryptoError>;
}

/// Server answer to a prover share.
#[derive(Debug)]
pub struct PakeResponse {
    /// Verifier share sent back in PakeVerify.
    pub share: Buf,
    /// Verifier confirmation sent back in PakeVerify.
    pub confirm: Buf,
    /// Confirmation the prover must send for the run to succeed.
    pub expected_confirm: Buf,
    pub shared_secret: Buf,
}

/// The capability object the engine delegates every cryptographic operation to.
pub trait CryptoProvider: CryptoSafe {
    /// Suites this provider implements, in preference order.
    fn cipher_suites(&self) -> &[CipherSuite];

    /// PAKE algorithm names this provider implements.
    fn pake_algorithms(&self) -> &[&'static str];

    fn fill_random(&self, out: &mut [u8]) -> Result<(), CryptoError>;

    fn start_key_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, CryptoError>;

    /// Hash of the handshake transcript so far.
    fn hash(&self, alg: HashAlgorithm, data: &[u8]) -> Buf;

    fn derive_master_secret(
        &self,
        version: ProtocolVersion,
        suite: CipherSuite,
        pre_master: &[u8],
        client_random: &Random,
        server_random: &Random,
    ) -> Result<Buf, CryptoError>;

    fn derive_keys(
        &self,
        suite: CipherSuite,
        master_secret: &[u8],
        client_random: &Random,
        server_random: &Random,
    ) -> Result<TrafficKeys, CryptoError>;

    /// verify_data of the Finished message sent by `sender`.
    fn finished_mac(
        &self,
        suite: CipherSuite,
        master_secret: &[u8],
        sender: Role,
        transcript_hash: &[u8],
    ) -> Result<Buf, CryptoError>;

    /// Sign `message` with a PKCS#8 DER private key.
    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Buf, CryptoError>;

    /// Check the signature against the public key of a DER leaf certificate.
    fn verify_signature(
        &self,
        cert_der: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, CryptoError>;

    fn start_pake_prover(
        &self,
        option: &PakeOption,
        client_id: &[u8],
        server_id: &[u8],
    ) -> Result<Box<dyn PakeProver>, CryptoError>;

    fn pake_respond(
        &self,
        option: &PakeOption,
        client_id: &[u8],
        server_id: &[u8],
        prover_share: &[u8],
    ) -> Result<PakeResponse, CryptoError>;
}

//! Shared helpers for engine integration tests.

#![allow(unused)]

use std::sync::Arc;
use std::time::SystemTime;

use pakls::certificate::generate_self_signed;
use pakls::crypto::rust_crypto::spake2plus::register;
use pakls::crypto::rust_crypto::RustCryptoProvider;
use pakls::crypto::{
    ActiveKeyExchange, AeadContext, CryptoError, CryptoProvider, PakeProver, PakeResponse,
    TrafficKeys,
};
use pakls::{
    Buf, CertifiedKey, CipherSuite, Config, Credential, Engine, Error, HashAlgorithm, Link,
    PakeClientParams, PakeCredential, PakeOption, PakeServerParams, ProtocolVersion, Random, Role,
    Status, SPAKE2PLUS_PRERELEASE,
};

/// Large enough for two full records.
pub const BUF_LEN: usize = 40 * 1024;

/// Config with its own session cache.
pub fn config() -> Arc<Config> {
    Arc::new(Config::builder().build().expect("default config"))
}

pub fn server_key() -> CertifiedKey {
    generate_self_signed("server.test").expect("self-signed certificate")
}

pub fn cert_pair() -> (Engine, Engine, CertifiedKey) {
    let key = server_key();
    let client = Engine::client(config(), SystemTime::now());
    let server = Engine::server(config(), Credential::Certificate(key.clone()), SystemTime::now())
        .expect("server engine");
    (client, server, key)
}

/// Wrap until the engine has nothing more to send.
pub fn wrap_all(engine: &mut Engine) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; BUF_LEN];
    loop {
        let res = engine.wrap(&[], &mut buf)?;
        out.extend_from_slice(&buf[..res.produced]);
        if res.status != Status::BufferOverflow || res.produced == 0 {
            return Ok(out);
        }
    }
}

/// Feed `bytes` to `engine`, returning any application data.
pub fn feed(engine: &mut Engine, bytes: &[u8]) -> Result<Vec<u8>, Error> {
    let mut plain = vec![0u8; BUF_LEN];
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let res = engine.unwrap(&bytes[offset..], &mut plain)?;
        offset += res.consumed;
        out.extend_from_slice(&plain[..res.produced]);
        if res.status == Status::Closed {
            break;
        }
        if res.consumed == 0 && res.produced == 0 {
            break;
        }
    }
    Ok(out)
}

/// Exchange flights until both sides are established.
///
/// Returns the number of non-empty flights that crossed the wire.
pub fn drive(client: &mut Engine, server: &mut Engine) -> Result<usize, Error> {
    let mut flights = 0;
    for _ in 0..10 {
        if client.is_established() && server.is_established() {
            return Ok(flights);
        }
        let c = wrap_all(client)?;
        if !c.is_empty() {
            flights += 1;
            feed(server, &c)?;
        }
        let s = wrap_all(server)?;
        if !s.is_empty() {
            flights += 1;
            feed(client, &s)?;
        }
    }
    panic!("handshake did not complete: {:?} / {:?}", client, server);
}

/// Which side failed first while driving a handshake.
#[derive(Debug, PartialEq, Eq)]
pub enum Failure {
    Client(Error),
    Server(Error),
}

/// Like [`drive`], but tells which side raised the error.
pub fn drive_expect_failure(client: &mut Engine, server: &mut Engine) -> Failure {
    for _ in 0..10 {
        let c = match wrap_all(client) {
            Ok(c) => c,
            Err(e) => return Failure::Client(e),
        };
        if let Err(e) = feed(server, &c) {
            return Failure::Server(e);
        }
        let s = match wrap_all(server) {
            Ok(s) => s,
            Err(e) => return Failure::Server(e),
        };
        if let Err(e) = feed(client, &s) {
            return Failure::Client(e);
        }
        if client.is_established() && server.is_established() {
            panic!("handshake unexpectedly succeeded");
        }
    }
    panic!("handshake neither completed nor failed");
}

/// Wrap all of `data` and return the ciphertext.
pub fn seal(engine: &mut Engine, data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; BUF_LEN];
    let mut offset = 0;
    while offset < data.len() {
        let res = engine.wrap(&data[offset..], &mut buf)?;
        assert_eq!(res.status, Status::Ok);
        offset += res.consumed;
        out.extend_from_slice(&buf[..res.produced]);
    }
    Ok(out)
}

// ----------------------------------------------------------------------------
// PAKE
// ----------------------------------------------------------------------------

pub fn password_option(password: &[u8]) -> PakeOption {
    PakeOption::builder(SPAKE2PLUS_PRERELEASE)
        .component("password", password)
        .build()
        .expect("client option")
}

/// Server side option for `password` bound to the given identities.
pub fn registered_option(password: &[u8], client_id: &[u8], server_id: &[u8]) -> PakeOption {
    let reg = register(password, client_id, server_id).expect("register");
    PakeOption::builder(SPAKE2PLUS_PRERELEASE)
        .component("w0", &reg.w0[..])
        .component("registrationRecord", &reg.registration_record)
        .build()
        .expect("server option")
}

pub fn pake_client(
    config: Arc<Config>,
    client_id: &[u8],
    server_id: &[u8],
    password: &[u8],
) -> Engine {
    let params = PakeClientParams::new(
        Some(client_id),
        Some(server_id),
        vec![password_option(password)],
    )
    .expect("client params");
    Engine::client(config, SystemTime::now())
        .with_credential(Credential::Pake(PakeCredential::Client(params)))
        .expect("client credential")
}

/// Server with links `(A, B)` and `(C, D)`, each with its own password.
pub fn pake_server(config: Arc<Config>) -> Engine {
    let params = PakeServerParams::builder()
        .link(
            Link::new(Some(&b"A"[..]), Some(&b"B"[..])),
            vec![registered_option(b"password-ab", b"A", b"B")],
        )
        .link(
            Link::new(Some(&b"C"[..]), Some(&b"D"[..])),
            vec![registered_option(b"password-cd", b"C", b"D")],
        )
        .build()
        .expect("server params");
    Engine::server(
        config,
        Credential::Pake(PakeCredential::Server(params)),
        SystemTime::now(),
    )
    .expect("server engine")
}

// ----------------------------------------------------------------------------
// Provider test double
// ----------------------------------------------------------------------------

/// RustCrypto provider whose client-to-server record protection never opens.
#[derive(Debug, Default)]
pub struct FailingOpenProvider {
    inner: RustCryptoProvider,
}

#[derive(Debug)]
struct FailingOpen(Box<dyn AeadContext>);

impl AeadContext for FailingOpen {
    fn tag_len(&self) -> usize {
        self.0.tag_len()
    }

    fn seal(&mut self, seq: u64, aad: &[u8], data: &mut Buf) -> Result<(), CryptoError> {
        self.0.seal(seq, aad, data)
    }

    fn open(&mut self, _seq: u64, _aad: &[u8], _data: &mut Buf) -> Result<(), CryptoError> {
        Err(CryptoError::Authentication)
    }
}

impl CryptoProvider for FailingOpenProvider {
    fn cipher_suites(&self) -> &[CipherSuite] {
        self.inner.cipher_suites()
    }

    fn pake_algorithms(&self) -> &[&'static str] {
        self.inner.pake_algorithms()
    }

    fn fill_random(&self, out: &mut [u8]) -> Result<(), CryptoError> {
        self.inner.fill_random(out)
    }

    fn start_key_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, CryptoError> {
        self.inner.start_key_exchange()
    }

    fn hash(&self, alg: HashAlgorithm, data: &[u8]) -> Buf {
        self.inner.hash(alg, data)
    }

    fn derive_master_secret(
        &self,
        version: ProtocolVersion,
        suite: CipherSuite,
        pre_master: &[u8],
        client_random: &Random,
        server_random: &Random,
    ) -> Result<Buf, CryptoError> {
        self.inner
            .derive_master_secret(version, suite, pre_master, client_random, server_random)
    }

    fn derive_keys(
        &self,
        suite: CipherSuite,
        master_secret: &[u8],
        client_random: &Random,
        server_random: &Random,
    ) -> Result<TrafficKeys, CryptoError> {
        let keys = self
            .inner
            .derive_keys(suite, master_secret, client_random, server_random)?;
        Ok(TrafficKeys {
            client_write: Box::new(FailingOpen(keys.client_write)),
            server_write: keys.server_write,
        })
    }

    fn finished_mac(
        &self,
        suite: CipherSuite,
        master_secret: &[u8],
        sender: Role,
        transcript_hash: &[u8],
    ) -> Result<Buf, CryptoError> {
        self.inner
            .finished_mac(suite, master_secret, sender, transcript_hash)
    }

    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Buf, CryptoError> {
        self.inner.sign(private_key, message)
    }

    fn verify_signature(
        &self,
        cert_der: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, CryptoError> {
        self.inner.verify_signature(cert_der, message, signature)
    }

    fn start_pake_prover(
        &self,
        option: &PakeOption,
        client_id: &[u8],
        server_id: &[u8],
    ) -> Result<Box<dyn PakeProver>, CryptoError> {
        self.inner.start_pake_prover(option, client_id, server_id)
    }

    fn pake_respond(
        &self,
        option: &PakeOption,
        client_id: &[u8],
        server_id: &[u8],
        prover_share: &[u8],
    ) -> Result<PakeResponse, CryptoError> {
        self.inner
            .pake_respond(option, client_id, server_id, prover_share)
    }
}

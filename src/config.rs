use std::fmt;
use std::sync::Arc;

use crate::buffer::Buf;
use crate::cache::SessionCache;
use crate::certificate::{fingerprint, format_fingerprint};
use crate::crypto::rust_crypto;
use crate::crypto::CryptoProvider;
use crate::record::MAX_FRAGMENT_LEN;
use crate::types::{CipherSuite, ProtocolVersion, Role};
use crate::Error;

/// Smallest fragment length we agree to run with.
pub const MIN_FRAGMENT_LEN: usize = 512;

/// Engine configuration.
///
/// Built once, shared as `Arc<Config>` by every engine created from it.
#[derive(Clone)]
pub struct Config {
    crypto_provider: Arc<dyn CryptoProvider>,
    versions: Vec<ProtocolVersion>,
    cipher_suites: Vec<CipherSuite>,
    max_fragment_length: usize,
    client_session_cache: Arc<SessionCache>,
    server_session_cache: Arc<SessionCache>,
    session_tickets: bool,
    enable_session_creation: bool,
    trust_policy: Arc<dyn TrustPolicy>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            crypto_provider: None,
            versions: vec![ProtocolVersion::Tls13, ProtocolVersion::Tls12],
            cipher_suites: None,
            max_fragment_length: MAX_FRAGMENT_LEN,
            client_session_cache: None,
            server_session_cache: None,
            session_tickets: true,
            enable_session_creation: true,
            trust_policy: None,
        }
    }

    /// Cryptographic provider.
    ///
    /// Every transform the engine needs, from randomness to record protection.
    #[inline(always)]
    pub fn crypto_provider(&self) -> &Arc<dyn CryptoProvider> {
        &self.crypto_provider
    }

    /// Enabled protocol versions in preference order.
    #[inline(always)]
    pub fn versions(&self) -> &[ProtocolVersion] {
        &self.versions
    }

    /// Enabled cipher suites in preference order.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// Largest plaintext fragment in one record.
    #[inline(always)]
    pub fn max_fragment_length(&self) -> usize {
        self.max_fragment_length
    }

    /// Sessions this side can offer when acting as a client.
    #[inline(always)]
    pub fn client_session_cache(&self) -> &Arc<SessionCache> {
        &self.client_session_cache
    }

    /// Sessions this side can resume when acting as a server.
    ///
    /// Kept apart from the client cache: both ends of one connection record
    /// the same id with a different peer identity.
    #[inline(always)]
    pub fn server_session_cache(&self) -> &Arc<SessionCache> {
        &self.server_session_cache
    }

    /// The cache used by engines of `role`.
    pub fn session_cache(&self, role: Role) -> &Arc<SessionCache> {
        match role {
            Role::Client => &self.client_session_cache,
            Role::Server => &self.server_session_cache,
        }
    }

    /// Whether tickets are requested (client) or issued (server).
    #[inline(always)]
    pub fn session_tickets(&self) -> bool {
        self.session_tickets
    }

    /// Whether a server assigns session ids to new sessions.
    ///
    /// With this off, no full handshake produces a resumable session.
    #[inline(always)]
    pub fn enable_session_creation(&self) -> bool {
        self.enable_session_creation
    }

    /// Policy deciding on peer chains and renegotiation.
    #[inline(always)]
    pub fn trust_policy(&self) -> &Arc<dyn TrustPolicy> {
        &self.trust_policy
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("versions", &self.versions)
            .field("cipher_suites", &self.cipher_suites)
            .field("max_fragment_length", &self.max_fragment_length)
            .field("session_tickets", &self.session_tickets)
            .field("enable_session_creation", &self.enable_session_creation)
            .field("trust_policy", &self.trust_policy)
            .finish_non_exhaustive()
    }
}

/// Builder for engine configuration.
pub struct ConfigBuilder {
    crypto_provider: Option<Arc<dyn CryptoProvider>>,
    versions: Vec<ProtocolVersion>,
    cipher_suites: Option<Vec<CipherSuite>>,
    max_fragment_length: usize,
    client_session_cache: Option<Arc<SessionCache>>,
    server_session_cache: Option<Arc<SessionCache>>,
    session_tickets: bool,
    enable_session_creation: bool,
    trust_policy: Option<Arc<dyn TrustPolicy>>,
}

impl ConfigBuilder {
    /// Set the crypto provider.
    ///
    /// Defaults to the RustCrypto backend.
    pub fn with_crypto_provider(mut self, provider: Arc<dyn CryptoProvider>) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    /// Set the enabled protocol versions, most preferred first.
    ///
    /// Defaults to TLS 1.3, TLS 1.2.
    pub fn versions(mut self, versions: &[ProtocolVersion]) -> Self {
        self.versions = versions.to_vec();
        self
    }

    /// Set the enabled cipher suites, most preferred first.
    ///
    /// Defaults to every suite of the crypto provider.
    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = Some(suites.to_vec());
        self
    }

    /// Set the maximum fragment length.
    ///
    /// Defaults to 16384. Must be within 512..=16384.
    pub fn max_fragment_length(mut self, len: usize) -> Self {
        self.max_fragment_length = len;
        self
    }

    /// Share a client session cache between several configs.
    ///
    /// Defaults to a fresh cache of 100 entries with an 8 hour TTL.
    pub fn client_session_cache(mut self, cache: Arc<SessionCache>) -> Self {
        self.client_session_cache = Some(cache);
        self
    }

    /// Share a server session cache between several configs.
    ///
    /// Defaults to a fresh cache of 100 entries with an 8 hour TTL.
    pub fn server_session_cache(mut self, cache: Arc<SessionCache>) -> Self {
        self.server_session_cache = Some(cache);
        self
    }

    /// Set whether session tickets are used.
    ///
    /// Defaults to true.
    pub fn session_tickets(mut self, enabled: bool) -> Self {
        self.session_tickets = enabled;
        self
    }

    /// Set whether a server creates resumable sessions.
    ///
    /// Defaults to true.
    pub fn enable_session_creation(mut self, enabled: bool) -> Self {
        self.enable_session_creation = enabled;
        self
    }

    /// Set the trust policy.
    ///
    /// Defaults to [`DefaultTrustPolicy`].
    pub fn trust_policy(mut self, policy: Arc<dyn TrustPolicy>) -> Self {
        self.trust_policy = Some(policy);
        self
    }

    /// Build the configuration.
    ///
    /// Fails with [`Error::ConfigError`] when the version or suite lists are
    /// empty, name something the provider cannot do, or when the fragment
    /// length is out of range.
    pub fn build(self) -> Result<Config, Error> {
        let crypto_provider = self
            .crypto_provider
            .unwrap_or_else(rust_crypto::default_provider);

        let mut versions = Vec::with_capacity(self.versions.len());
        for v in self.versions {
            if !versions.contains(&v) {
                versions.push(v);
            }
        }
        if versions.is_empty() {
            return Err(Error::ConfigError("no protocol versions enabled".into()));
        }

        let supported = crypto_provider.cipher_suites();
        let cipher_suites = match self.cipher_suites {
            Some(suites) => {
                if let Some(s) = suites.iter().find(|s| !supported.contains(s)) {
                    return Err(Error::ConfigError(format!(
                        "cipher suite {:?} not supported by provider",
                        s
                    )));
                }
                // First occurrence wins, which also bounds the list by the provider's.
                let mut unique: Vec<CipherSuite> = Vec::with_capacity(suites.len());
                for s in suites {
                    if !unique.contains(&s) {
                        unique.push(s);
                    }
                }
                unique
            }
            None => supported.to_vec(),
        };
        let usable = cipher_suites
            .iter()
            .any(|s| versions.iter().any(|v| s.is_valid_for(*v)));
        if !usable {
            return Err(Error::ConfigError(
                "no cipher suite usable with the enabled versions".into(),
            ));
        }

        if !(MIN_FRAGMENT_LEN..=MAX_FRAGMENT_LEN).contains(&self.max_fragment_length) {
            return Err(Error::ConfigError(format!(
                "max_fragment_length {} outside {}..={}",
                self.max_fragment_length, MIN_FRAGMENT_LEN, MAX_FRAGMENT_LEN
            )));
        }

        Ok(Config {
            crypto_provider,
            versions,
            cipher_suites,
            max_fragment_length: self.max_fragment_length,
            client_session_cache: self
                .client_session_cache
                .unwrap_or_else(|| Arc::new(SessionCache::default())),
            server_session_cache: self
                .server_session_cache
                .unwrap_or_else(|| Arc::new(SessionCache::default())),
            session_tickets: self.session_tickets,
            enable_session_creation: self.enable_session_creation,
            trust_policy: self
                .trust_policy
                .unwrap_or_else(|| Arc::new(DefaultTrustPolicy)),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        let crypto_provider = rust_crypto::default_provider();
        let cipher_suites = crypto_provider.cipher_suites().to_vec();
        Config {
            crypto_provider,
            versions: vec![ProtocolVersion::Tls13, ProtocolVersion::Tls12],
            cipher_suites,
            max_fragment_length: MAX_FRAGMENT_LEN,
            client_session_cache: Arc::new(SessionCache::default()),
            server_session_cache: Arc::new(SessionCache::default()),
            session_tickets: true,
            enable_session_creation: true,
            trust_policy: Arc::new(DefaultTrustPolicy),
        }
    }
}

// ============================================================================
// Trust policy
// ============================================================================

/// Decisions delegated to the embedding application.
///
/// Consulted by the handshake, never evaluated by it.
pub trait TrustPolicy: Send + Sync + fmt::Debug {
    /// Accept or reject the certificate chain presented by the server.
    ///
    /// The CertificateVerify signature has already been checked against the
    /// leaf when this is called.
    fn verify_peer_chain(&self, chain: &[Buf]) -> Result<(), Error>;

    /// Whether an established connection may start a new handshake.
    fn allow_renegotiation(&self) -> bool {
        false
    }
}

/// Accepts any non-empty chain and refuses renegotiation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTrustPolicy;

impl TrustPolicy for DefaultTrustPolicy {
    fn verify_peer_chain(&self, chain: &[Buf]) -> Result<(), Error> {
        if chain.is_empty() {
            return Err(Error::CertificateRejected("empty chain".into()));
        }
        Ok(())
    }
}

/// Accepts only leaf certificates with a pinned SHA-256 fingerprint.
#[derive(Debug, Clone, Default)]
pub struct FingerprintTrustPolicy {
    pinned: Vec<[u8; 32]>,
    renegotiation: bool,
}

impl FingerprintTrustPolicy {
    pub fn new(pinned: Vec<[u8; 32]>) -> Self {
        FingerprintTrustPolicy {
            pinned,
            renegotiation: false,
        }
    }

    /// Allow established connections to renegotiate.
    pub fn allow_renegotiation(mut self, allow: bool) -> Self {
        self.renegotiation = allow;
        self
    }
}

impl TrustPolicy for FingerprintTrustPolicy {
    fn verify_peer_chain(&self, chain: &[Buf]) -> Result<(), Error> {
        let leaf = chain
            .first()
            .ok_or_else(|| Error::CertificateRejected("empty chain".into()))?;
        let fp = fingerprint(leaf);
        if self.pinned.contains(&fp) {
            Ok(())
        } else {
            Err(Error::CertificateRejected(format!(
                "fingerprint {} not pinned",
                format_fingerprint(&fp)
            )))
        }
    }

    fn allow_renegotiation(&self) -> bool {
        self.renegotiation
    }
}

//! Credentials an engine presents during the handshake.
//!
//! A [`Credential`] is either a certificate chain with its private key or a
//! PAKE parameter set. All of them are validated on construction, so an engine
//! only ever holds a credential that can be used.

use std::collections::BTreeMap;
use std::fmt;

use zeroize::Zeroizing;

use crate::buffer::{Buf, ToBuf};
use crate::message::{MAX_CHAIN_BYTES, MAX_CHAIN_LEN};
use crate::Error;

/// Name of the SPAKE2+ algorithm implemented by the RustCrypto backend.
pub const SPAKE2PLUS_PRERELEASE: &str = "SPAKE2PLUS_PRERELEASE";

/// Length of a P-256 scalar.
const SCALAR_LEN: usize = 32;
/// Length of an uncompressed P-256 point.
const POINT_LEN: usize = 65;

/// Longest client or server identity.
pub const MAX_IDENTITY_LEN: usize = u16::MAX as usize;

/// Most PAKE options one client may offer.
pub const MAX_PAKE_OPTIONS: usize = u8::MAX as usize;

/// The credential an engine presents.
#[derive(Debug, Clone)]
pub enum Credential {
    Certificate(CertifiedKey),
    Pake(PakeCredential),
}

/// A certificate chain, leaf first, and the leaf's private key.
#[derive(Clone)]
pub struct CertifiedKey {
    private_key: Zeroizing<Vec<u8>>,
    chain: Vec<Buf>,
}

impl CertifiedKey {
    /// `private_key` is PKCS#8 DER, `chain` DER certificates leaf first.
    pub fn new(private_key: Vec<u8>, chain: Vec<Vec<u8>>) -> Result<Self, Error> {
        if private_key.is_empty() {
            return Err(Error::ConfigError("empty private key".into()));
        }
        if chain.is_empty() || chain.iter().any(|c| c.is_empty()) {
            return Err(Error::ConfigError("certificate chain must not be empty".into()));
        }
        if chain.len() > MAX_CHAIN_LEN {
            return Err(Error::ConfigError(format!(
                "certificate chain of {} exceeds {} entries",
                chain.len(),
                MAX_CHAIN_LEN
            )));
        }
        let encoded: usize = chain.iter().map(|c| 3 + c.len()).sum();
        if encoded > MAX_CHAIN_BYTES {
            return Err(Error::ConfigError(format!(
                "certificate chain of {} bytes is too large",
                encoded
            )));
        }
        Ok(CertifiedKey {
            private_key: Zeroizing::new(private_key),
            chain: chain.into_iter().map(ToBuf::to_buf).collect(),
        })
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn chain(&self) -> &[Buf] {
        &self.chain
    }

    pub fn leaf(&self) -> &[u8] {
        &self.chain[0]
    }
}

impl fmt::Debug for CertifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertifiedKey")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// PAKE options
// ============================================================================

/// One PAKE algorithm with its named message components.
#[derive(Clone, PartialEq, Eq)]
pub struct PakeOption {
    algorithm: String,
    components: BTreeMap<String, Zeroizing<Vec<u8>>>,
}

impl PakeOption {
    pub fn builder(algorithm: &str) -> PakeOptionBuilder {
        PakeOptionBuilder {
            algorithm: algorithm.to_string(),
            components: BTreeMap::new(),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn component(&self, name: &str) -> Option<&[u8]> {
        self.components.get(name).map(|v| v.as_slice())
    }

    fn validate_client(&self) -> Result<(), Error> {
        if self.algorithm != SPAKE2PLUS_PRERELEASE {
            return Ok(());
        }
        let has_password = self.component("password").is_some();
        let w0 = self.component("w0");
        let w1 = self.component("w1");
        match (has_password, w0, w1) {
            (true, None, None) => Ok(()),
            (false, Some(w0), Some(w1)) if w0.len() == SCALAR_LEN && w1.len() == SCALAR_LEN => {
                Ok(())
            }
            _ => Err(Error::InvalidPakeOption(format!(
                "{} client option needs password, or w0 and w1 of {} bytes",
                self.algorithm, SCALAR_LEN
            ))),
        }
    }

    fn validate_server(&self) -> Result<(), Error> {
        if self.algorithm != SPAKE2PLUS_PRERELEASE {
            return Ok(());
        }
        let w0 = self.component("w0").map(|v| v.len());
        let record = self.component("registrationRecord").map(|v| v.len());
        if w0 != Some(SCALAR_LEN) || record != Some(POINT_LEN) {
            return Err(Error::InvalidPakeOption(format!(
                "{} server option needs w0 ({} bytes) and registrationRecord ({} bytes)",
                self.algorithm, SCALAR_LEN, POINT_LEN
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for PakeOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PakeOption")
            .field("algorithm", &self.algorithm)
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct PakeOptionBuilder {
    algorithm: String,
    components: BTreeMap<String, Zeroizing<Vec<u8>>>,
}

impl PakeOptionBuilder {
    pub fn component(mut self, name: &str, value: &[u8]) -> Self {
        self.components
            .insert(name.to_string(), Zeroizing::new(value.to_vec()));
        self
    }

    pub fn build(self) -> Result<PakeOption, Error> {
        if self.algorithm.is_empty() {
            return Err(Error::InvalidPakeOption("empty algorithm name".into()));
        }
        if self.algorithm.len() > u8::MAX as usize {
            return Err(Error::InvalidPakeOption("algorithm name too long".into()));
        }
        if self.components.is_empty() {
            return Err(Error::InvalidPakeOption(format!(
                "{} has no message components",
                self.algorithm
            )));
        }
        Ok(PakeOption {
            algorithm: self.algorithm,
            components: self.components,
        })
    }
}

fn check_option_list(options: &[PakeOption]) -> Result<(), Error> {
    if options.is_empty() {
        return Err(Error::InvalidPakeOption("option list is empty".into()));
    }
    for (i, o) in options.iter().enumerate() {
        if options[..i].iter().any(|p| p.algorithm == o.algorithm) {
            return Err(Error::InvalidPakeOption(format!(
                "duplicate option {}",
                o.algorithm
            )));
        }
    }
    Ok(())
}

// ============================================================================
// PAKE credentials
// ============================================================================

#[derive(Debug, Clone)]
pub enum PakeCredential {
    Client(PakeClientParams),
    Server(PakeServerParams),
}

/// Client side PAKE parameters: identities plus the options to offer.
#[derive(Debug, Clone)]
pub struct PakeClientParams {
    client_id: Option<Buf>,
    server_id: Option<Buf>,
    options: Vec<PakeOption>,
}

impl PakeClientParams {
    pub fn new(
        client_id: Option<&[u8]>,
        server_id: Option<&[u8]>,
        options: Vec<PakeOption>,
    ) -> Result<Self, Error> {
        check_option_list(&options)?;
        if options.len() > MAX_PAKE_OPTIONS {
            return Err(Error::InvalidPakeOption(format!(
                "{} options exceed {}",
                options.len(),
                MAX_PAKE_OPTIONS
            )));
        }
        for o in &options {
            o.validate_client()?;
        }
        for id in [client_id, server_id].into_iter().flatten() {
            if id.len() > MAX_IDENTITY_LEN {
                return Err(Error::ConfigError(format!(
                    "identity of {} bytes exceeds {}",
                    id.len(),
                    MAX_IDENTITY_LEN
                )));
            }
        }
        Ok(PakeClientParams {
            client_id: non_empty(client_id),
            server_id: non_empty(server_id),
            options,
        })
    }

    pub fn client_id(&self) -> Option<&[u8]> {
        self.client_id.as_deref()
    }

    pub fn server_id(&self) -> Option<&[u8]> {
        self.server_id.as_deref()
    }

    pub fn options(&self) -> &[PakeOption] {
        &self.options
    }
}

/// A `(clientId, serverId)` pairing. `None` is a wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub client_id: Option<Buf>,
    pub server_id: Option<Buf>,
}

impl Link {
    pub fn new(client_id: Option<&[u8]>, server_id: Option<&[u8]>) -> Self {
        Link {
            client_id: non_empty(client_id),
            server_id: non_empty(server_id),
        }
    }

    /// Link matching any identities.
    pub fn wildcard() -> Self {
        Link::new(None, None)
    }

    fn matches(&self, client_id: Option<&[u8]>, server_id: Option<&[u8]>) -> bool {
        fn part(want: &Option<Buf>, got: Option<&[u8]>) -> bool {
            match want {
                None => true,
                Some(w) => got == Some(w.as_ref()),
            }
        }
        part(&self.client_id, client_id) && part(&self.server_id, server_id)
    }

    /// Exact links rank 0, partial wildcards 1, the full wildcard 2.
    fn rank(&self) -> u8 {
        self.client_id.is_none() as u8 + self.server_id.is_none() as u8
    }

    fn is_client_only(&self) -> bool {
        self.client_id.is_some() && self.server_id.is_none()
    }

    fn is_server_only(&self) -> bool {
        self.client_id.is_none() && self.server_id.is_some()
    }
}

/// Server side PAKE parameters: a table of links, each with its own options.
#[derive(Debug, Clone)]
pub struct PakeServerParams {
    links: Vec<(Link, Vec<PakeOption>)>,
}

impl PakeServerParams {
    pub fn builder() -> PakeServerParamsBuilder {
        PakeServerParamsBuilder { links: Vec::new() }
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().map(|(l, _)| l)
    }

    /// Options for the identities presented by a client.
    ///
    /// An exact link wins over a partial wildcard, which wins over the full
    /// wildcard. Construction guarantees at most one candidate per rank.
    pub fn options_for(
        &self,
        client_id: Option<&[u8]>,
        server_id: Option<&[u8]>,
    ) -> Result<&[PakeOption], Error> {
        self.links
            .iter()
            .filter(|(l, _)| l.matches(client_id, server_id))
            .min_by_key(|(l, _)| l.rank())
            .map(|(_, o)| o.as_slice())
            .ok_or(Error::NoMatchingPakeOption)
    }
}

pub struct PakeServerParamsBuilder {
    links: Vec<(Link, Vec<PakeOption>)>,
}

impl PakeServerParamsBuilder {
    pub fn link(mut self, link: Link, options: Vec<PakeOption>) -> Self {
        self.links.push((link, options));
        self
    }

    pub fn build(self) -> Result<PakeServerParams, Error> {
        if self.links.is_empty() {
            return Err(Error::ConfigError("at least one link is required".into()));
        }
        for (i, (link, options)) in self.links.iter().enumerate() {
            if self.links[..i].iter().any(|(l, _)| l == link) {
                return Err(Error::AmbiguousPakeLink(format!("duplicate link {:?}", link)));
            }
            check_option_list(options)?;
            for o in options {
                o.validate_server()?;
            }
        }
        let client_only = self.links.iter().any(|(l, _)| l.is_client_only());
        let server_only = self.links.iter().any(|(l, _)| l.is_server_only());
        if client_only && server_only {
            return Err(Error::AmbiguousPakeLink(
                "client-only and server-only wildcard links can overlap".into(),
            ));
        }
        Ok(PakeServerParams { links: self.links })
    }
}

fn non_empty(id: Option<&[u8]>) -> Option<Buf> {
    id.filter(|v| !v.is_empty()).map(Buf::from_slice)
}

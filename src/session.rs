//! Negotiated session parameters.
//!
//! A [`SessionBuilder`] starts empty at handshake start and is filled in as the
//! handshake negotiates each field. On successful completion it is frozen
//! into an `Arc<Session>` which is never mutated again; resumption shares the
//! same `Arc`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nom::bytes::complete::tag;
use nom::combinator::{all_consuming, verify};
use nom::multi::count;
use nom::number::complete::{be_u16, be_u64, be_u8};
use nom::IResult;
use zeroize::Zeroizing;

use crate::buffer::{Buf, ToBuf};
use crate::message::{optional, put_u16_prefixed, put_u24_prefixed, u16_prefixed, u24_prefixed};
use crate::message::{put_u8_prefixed, u8_prefixed, MAX_CHAIN_LEN};
use crate::types::{CipherSuite, ProtocolVersion, SessionId};
use crate::Error;

const MAGIC: &[u8] = b"PKLS";
const FORMAT_VERSION: u8 = 1;

/// Who the peer turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerIdentity {
    /// Server certificate chain, leaf first, as seen by a client.
    Certificates(Vec<Buf>),
    /// Identities bound into a successful PAKE run.
    Pake {
        client_id: Option<Buf>,
        server_id: Option<Buf>,
    },
    /// A client that did not authenticate, as seen by a certificate server.
    Anonymous,
}

/// A frozen, resumable session.
pub struct Session {
    id: SessionId,
    version: ProtocolVersion,
    cipher_suite: CipherSuite,
    master_secret: Zeroizing<Buf>,
    peer: PeerIdentity,
    ticket: Option<Buf>,
    created: SystemTime,
    last_access: AtomicU64,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    pub(crate) fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }

    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    /// Resumption ticket, if the server issued one.
    pub fn ticket(&self) -> Option<&[u8]> {
        self.ticket.as_deref()
    }

    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// Time of the most recent lookup or resumption.
    pub fn last_access(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.last_access.load(Ordering::Relaxed))
    }

    pub(crate) fn touch(&self, now: SystemTime) {
        self.last_access.store(unix_secs(now), Ordering::Relaxed);
    }

    /// Whether the session outlived `ttl` at `now`.
    pub fn is_expired(&self, now: SystemTime, ttl: Duration) -> bool {
        match now.duration_since(self.created) {
            Ok(age) => age > ttl,
            Err(_) => false,
        }
    }

    /// Encode for the persistent store.
    ///
    /// `"PKLS" | format(1) | id | version(2) | suite(2) | master | created(8) | peer | ticket`
    pub fn encode(&self) -> Buf {
        let mut out = Buf::new();
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        put_u8_prefixed(&mut out, self.id.as_slice());
        out.extend_from_slice(&self.version.as_u16().to_be_bytes());
        out.extend_from_slice(&self.cipher_suite.as_u16().to_be_bytes());
        put_u8_prefixed(&mut out, &self.master_secret);
        out.extend_from_slice(&unix_secs(self.created).to_be_bytes());

        match &self.peer {
            PeerIdentity::Anonymous => out.push(0),
            PeerIdentity::Certificates(chain) => {
                out.push(1);
                out.push(chain.len() as u8);
                for cert in chain {
                    put_u24_prefixed(&mut out, cert);
                }
            }
            PeerIdentity::Pake {
                client_id,
                server_id,
            } => {
                out.push(2);
                put_optional(&mut out, client_id.as_deref());
                put_optional(&mut out, server_id.as_deref());
            }
        }
        put_optional(&mut out, self.ticket.as_deref());
        out
    }

    /// Decode a session written by [`encode`](Self::encode).
    ///
    /// Trailing or missing bytes, unknown format versions and unknown
    /// protocol versions are all errors.
    pub fn decode(input: &[u8]) -> Result<Session, Error> {
        let (_, raw) = all_consuming(parse_raw)(input)
            .map_err(|_| Error::StoreError("malformed session record".into()))?;

        let id = SessionId::try_new(raw.id)?;
        let version = ProtocolVersion::from_u16(raw.version)?;
        let cipher_suite = CipherSuite::from_u16(raw.suite);
        if !cipher_suite.is_valid_for(version) {
            return Err(Error::StoreError(format!(
                "suite {:?} invalid for {}",
                cipher_suite, version
            )));
        }
        let created = UNIX_EPOCH + Duration::from_secs(raw.created);

        Ok(Session {
            id,
            version,
            cipher_suite,
            master_secret: Zeroizing::new(raw.master.to_buf()),
            peer: raw.peer,
            ticket: raw.ticket.map(ToBuf::to_buf),
            created,
            last_access: AtomicU64::new(raw.created),
        })
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.version == other.version
            && self.cipher_suite == other.cipher_suite
            && *self.master_secret == *other.master_secret
            && self.peer == other.peer
            && self.ticket == other.ticket
            && unix_secs(self.created) == unix_secs(other.created)
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("cipher_suite", &self.cipher_suite)
            .field("peer", &self.peer)
            .field("ticket", &self.ticket.as_ref().map(|t| t.len()))
            .finish_non_exhaustive()
    }
}

struct RawSession<'a> {
    id: &'a [u8],
    version: u16,
    suite: u16,
    master: &'a [u8],
    created: u64,
    peer: PeerIdentity,
    ticket: Option<&'a [u8]>,
}

fn parse_raw(input: &[u8]) -> IResult<&[u8], RawSession<'_>> {
    let (input, _) = tag(MAGIC)(input)?;
    let (input, _) = verify(be_u8, |v: &u8| *v == FORMAT_VERSION)(input)?;
    let (input, id) = u8_prefixed(input)?;
    let (input, version) = be_u16(input)?;
    let (input, suite) = be_u16(input)?;
    let (input, master) = u8_prefixed(input)?;
    let (input, created) = be_u64(input)?;
    let (input, peer) = parse_peer(input)?;
    let (input, ticket) = optional(u16_prefixed)(input)?;
    Ok((
        input,
        RawSession {
            id,
            version,
            suite,
            master,
            created,
            peer,
            ticket,
        },
    ))
}

fn parse_peer(input: &[u8]) -> IResult<&[u8], PeerIdentity> {
    let (input, kind) = be_u8(input)?;
    match kind {
        0 => Ok((input, PeerIdentity::Anonymous)),
        1 => {
            let (input, n) = be_u8(input)?;
            let (input, chain) = count(u24_prefixed, n as usize)(input)?;
            let chain = chain.into_iter().map(ToBuf::to_buf).collect();
            Ok((input, PeerIdentity::Certificates(chain)))
        }
        2 => {
            let (input, client_id) = optional(u16_prefixed)(input)?;
            let (input, server_id) = optional(u16_prefixed)(input)?;
            Ok((
                input,
                PeerIdentity::Pake {
                    client_id: client_id.map(ToBuf::to_buf),
                    server_id: server_id.map(ToBuf::to_buf),
                },
            ))
        }
        _ => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Switch,
        ))),
    }
}

fn put_optional(out: &mut Buf, value: Option<&[u8]>) {
    match value {
        None => out.push(0),
        Some(v) => {
            out.push(1);
            put_u16_prefixed(out, v);
        }
    }
}

pub(crate) fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Session under construction.
#[derive(Debug, Default)]
pub struct SessionBuilder {
    id: Option<SessionId>,
    version: Option<ProtocolVersion>,
    cipher_suite: Option<CipherSuite>,
    master_secret: Option<Zeroizing<Buf>>,
    peer: Option<PeerIdentity>,
    ticket: Option<Buf>,
    created: Option<SystemTime>,
}

impl SessionBuilder {
    pub fn new(created: SystemTime) -> Self {
        SessionBuilder {
            created: Some(created),
            ..Default::default()
        }
    }

    pub fn id(&mut self, id: SessionId) -> &mut Self {
        self.id = Some(id);
        self
    }

    /// The id assigned so far, if any.
    pub fn current_id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    pub fn version(&mut self, version: ProtocolVersion) -> &mut Self {
        self.version = Some(version);
        self
    }

    pub fn cipher_suite(&mut self, suite: CipherSuite) -> &mut Self {
        self.cipher_suite = Some(suite);
        self
    }

    pub fn master_secret(&mut self, secret: &[u8]) -> &mut Self {
        self.master_secret = Some(Zeroizing::new(Buf::from_slice(secret)));
        self
    }

    pub fn peer(&mut self, peer: PeerIdentity) -> &mut Self {
        self.peer = Some(peer);
        self
    }

    pub fn ticket(&mut self, ticket: &[u8]) -> &mut Self {
        self.ticket = Some(Buf::from_slice(ticket));
        self
    }

    /// Freeze into an immutable session.
    ///
    /// Fails with [`Error::HandshakeFailure`] if any negotiated field is missing.
    pub fn freeze(self) -> Result<Arc<Session>, Error> {
        fn missing(what: &str) -> Error {
            Error::HandshakeFailure(format!("session incomplete: no {}", what))
        }
        let created = self.created.ok_or_else(|| missing("creation time"))?;
        if let Some(PeerIdentity::Certificates(chain)) = &self.peer {
            if chain.len() > MAX_CHAIN_LEN {
                return Err(Error::HandshakeFailure(format!(
                    "peer chain of {} certificates cannot be stored",
                    chain.len()
                )));
            }
        }
        Ok(Arc::new(Session {
            id: self.id.ok_or_else(|| missing("id"))?,
            version: self.version.ok_or_else(|| missing("version"))?,
            cipher_suite: self.cipher_suite.ok_or_else(|| missing("cipher suite"))?,
            master_secret: self.master_secret.ok_or_else(|| missing("master secret"))?,
            peer: self.peer.ok_or_else(|| missing("peer identity"))?,
            ticket: self.ticket,
            created,
            last_access: AtomicU64::new(unix_secs(created)),
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample(id: u8, created: SystemTime) -> Arc<Session> {
        let mut b = SessionBuilder::new(created);
        b.id(SessionId::try_new(&[id; 32]).unwrap())
            .version(ProtocolVersion::Tls13)
            .cipher_suite(CipherSuite::TLS_AES_128_GCM_SHA256)
            .master_secret(&[id; 32])
            .peer(PeerIdentity::Pake {
                client_id: Some(Buf::from_slice(b"alice")),
                server_id: None,
            });
        b.freeze().unwrap()
    }

    #[test]
    fn freeze_requires_every_field() {
        let mut b = SessionBuilder::new(SystemTime::now());
        b.id(SessionId::empty())
            .version(ProtocolVersion::Tls12)
            .cipher_suite(CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256);
        assert!(matches!(b.freeze(), Err(Error::HandshakeFailure(_))));
    }

    #[test]
    fn oversized_peer_chain_is_refused() {
        let mut b = SessionBuilder::new(SystemTime::now());
        b.id(SessionId::empty())
            .version(ProtocolVersion::Tls13)
            .cipher_suite(CipherSuite::TLS_AES_128_GCM_SHA256)
            .master_secret(&[0; 32])
            .peer(PeerIdentity::Certificates(vec![
                Buf::from_slice(&[1]);
                MAX_CHAIN_LEN + 1
            ]));
        assert!(matches!(b.freeze(), Err(Error::HandshakeFailure(_))));
    }

    #[test]
    fn persisted_form_is_stable() {
        let created = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let mut b = SessionBuilder::new(created);
        b.id(SessionId::try_new(&[9; 16]).unwrap())
            .version(ProtocolVersion::Tls12)
            .cipher_suite(CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384)
            .master_secret(&[3; 48])
            .peer(PeerIdentity::Certificates(vec![Buf::from_slice(&[0x30, 0x01])]))
            .ticket(&[5; 8]);
        let session = b.freeze().unwrap();

        let encoded = session.encode();
        assert_eq!(&encoded[..5], b"PKLS\x01");
        let decoded = Session::decode(&encoded).unwrap();
        assert_eq!(decoded, *session);
    }

    #[test]
    fn truncated_or_padded_records_are_rejected() {
        let encoded = sample(1, SystemTime::now()).encode();
        assert!(Session::decode(&encoded[..encoded.len() - 1]).is_err());

        let mut padded = encoded.to_vec();
        padded.push(0);
        assert!(Session::decode(&padded).is_err());

        let mut wrong_format = encoded.to_vec();
        wrong_format[4] = 2;
        assert!(matches!(
            Session::decode(&wrong_format),
            Err(Error::StoreError(_))
        ));
    }

    #[test]
    fn expiry_uses_creation_time() {
        let created = SystemTime::now();
        let s = sample(2, created);
        let ttl = Duration::from_secs(60);
        assert!(!s.is_expired(created + Duration::from_secs(60), ttl));
        assert!(s.is_expired(created + Duration::from_secs(61), ttl));
    }
}

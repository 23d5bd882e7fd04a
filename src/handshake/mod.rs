//! Handshake state machine.
//!
//! [`client::Client`] and [`server::Server`] each own a private `State` enum
//! and pull handshake messages from a shared [`Context`] one at a time. Every
//! message is checked against the types the current state accepts before it
//! is parsed, so an out-of-order message fails with
//! [`Error::UnexpectedMessage`] and never reaches a parser.
//!
//! Outbound work is queued as [`Outgoing`] items. Key changes travel in the
//! same queue so the engine switches write protection exactly between the
//! Finished record and whatever follows it.

pub(crate) mod client;
pub(crate) mod server;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::buffer::Buf;
use crate::crypto::{AeadContext, CryptoError, CryptoProvider};
use crate::message::{Body, Finished, Handshake, MessageType};
use crate::session::{PeerIdentity, Session, SessionBuilder};
use crate::types::{CipherSuite, ContentType, ProtocolVersion, Random, Role};
use crate::{Config, Error};

/// Publicly observable handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    ClientHelloSent,
    ClientHelloReceived,
    ServerHelloSent,
    ServerHelloReceived,
    KeyExchange,
    CertificateReceived,
    /// Peer authenticated by certificate or PAKE.
    Verified,
    FinishedSent,
    FinishedReceived,
    Established,
}

/// Work for the record layer, in order.
pub(crate) enum Outgoing {
    Record(ContentType, Buf),
    /// Protect every following record with this context.
    ActivateWrite(Box<dyn AeadContext>),
}

impl std::fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outgoing::Record(ct, b) => write!(f, "Record({:?}, {})", ct, b.len()),
            Outgoing::ActivateWrite(_) => write!(f, "ActivateWrite"),
        }
    }
}

/// Prefix of the content covered by CertificateVerify.
const SIGNATURE_CONTEXT: &[u8] = b"pakls server CertificateVerify\0";

/// State shared by both sides of one handshake.
pub(crate) struct Context {
    config: Arc<Config>,
    provider: Arc<dyn CryptoProvider>,
    role: Role,
    now: SystemTime,

    /// Every handshake message so far, headers included.
    transcript: Buf,

    incoming: VecDeque<Buf>,
    outgoing: VecDeque<Outgoing>,

    /// Derived, not yet active.
    pending_write: Option<Box<dyn AeadContext>>,
    pending_read: Option<Box<dyn AeadContext>>,
    /// Active once the engine takes it.
    ready_read: Option<Box<dyn AeadContext>>,

    client_random: Random,
    server_random: Random,
    version: Option<ProtocolVersion>,
    suite: Option<CipherSuite>,
    /// Record plaintext limit agreed in the hellos.
    max_fragment: Option<usize>,
    master_secret: Option<Zeroizing<Buf>>,
    peer: Option<PeerIdentity>,

    resumed: bool,
    session: SessionBuilder,
    established: Option<Arc<Session>>,
}

impl Context {
    pub fn new(config: Arc<Config>, role: Role, now: SystemTime) -> Self {
        let provider = config.crypto_provider().clone();
        Context {
            config,
            provider,
            role,
            now,
            transcript: Buf::new(),
            incoming: VecDeque::new(),
            outgoing: VecDeque::new(),
            pending_write: None,
            pending_read: None,
            ready_read: None,
            client_random: Random::default(),
            server_random: Random::default(),
            version: None,
            suite: None,
            max_fragment: None,
            master_secret: None,
            peer: None,
            resumed: false,
            session: SessionBuilder::new(now),
            established: None,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn CryptoProvider> {
        &self.provider
    }

    pub fn now(&self) -> SystemTime {
        self.now
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    pub fn suite(&self) -> Option<CipherSuite> {
        self.suite
    }

    pub fn peer(&self) -> Option<&PeerIdentity> {
        self.peer.as_ref()
    }

    pub fn max_fragment(&self) -> Option<usize> {
        self.max_fragment
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn established(&self) -> Option<&Arc<Session>> {
        self.established.as_ref()
    }

    fn set_negotiated(&mut self, version: ProtocolVersion, suite: CipherSuite) {
        self.version = Some(version);
        self.suite = Some(suite);
        self.session.version(version).cipher_suite(suite);
    }

    fn set_max_fragment(&mut self, len: usize) {
        debug!("Record fragment limit {}", len);
        self.max_fragment = Some(len);
    }

    fn set_peer(&mut self, peer: PeerIdentity) {
        self.session.peer(peer.clone());
        self.peer = Some(peer);
    }

    fn random(&self) -> Result<Random, Error> {
        let mut r = Random::default();
        self.provider.fill_random(&mut r.0)?;
        Ok(r)
    }

    fn negotiated(&self) -> Result<(ProtocolVersion, CipherSuite), Error> {
        match (self.version, self.suite) {
            (Some(v), Some(s)) => Ok((v, s)),
            _ => Err(Error::HandshakeFailure("parameters not negotiated".into())),
        }
    }

    // ------------------------------------------------------------------------
    // Message queues
    // ------------------------------------------------------------------------

    pub fn push_incoming(&mut self, message: Buf) {
        self.incoming.push_back(message);
    }

    /// Pop the next incoming message if it is one of `expected`.
    fn next_message(&mut self, expected: &[MessageType]) -> Result<Option<Buf>, Error> {
        let Some(front) = self.incoming.front() else {
            return Ok(None);
        };
        let Some(&type_byte) = front.first() else {
            return Err(Error::MalformedMessage("empty handshake record".into()));
        };
        let msg_type = MessageType::from_u8(type_byte);
        if !expected.contains(&msg_type) {
            return Err(Error::UnexpectedMessage(format!(
                "{:?}, expected one of {:?}",
                msg_type, expected
            )));
        }
        Ok(self.incoming.pop_front())
    }

    /// Record a received message in the transcript.
    fn received(&mut self, raw: &[u8]) {
        self.transcript.extend_from_slice(raw);
    }

    /// Serialize, record in the transcript and queue for sending.
    fn send(&mut self, body: Body<'_>) {
        let mut out = Buf::new();
        let msg_type = body.msg_type();
        Handshake::new(body).serialize(&mut out);
        trace!("Queue {:?} ({} bytes)", msg_type, out.len());
        self.transcript.extend_from_slice(&out);
        self.outgoing.push_back(Outgoing::Record(ContentType::Handshake, out));
    }

    pub fn pop_outgoing(&mut self) -> Option<Outgoing> {
        self.outgoing.pop_front()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    pub fn take_read_keys(&mut self) -> Option<Box<dyn AeadContext>> {
        self.ready_read.take()
    }

    // ------------------------------------------------------------------------
    // Key schedule
    // ------------------------------------------------------------------------

    fn transcript_hash(&self) -> Result<Buf, Error> {
        let (_, suite) = self.negotiated()?;
        Ok(self.provider.hash(suite.hash_algorithm(), &self.transcript))
    }

    /// Content covered by the server's CertificateVerify signature.
    fn signed_content(&self) -> Result<Buf, Error> {
        let mut content = Buf::from_slice(SIGNATURE_CONTEXT);
        content.extend_from_slice(&self.transcript_hash()?);
        Ok(content)
    }

    /// Derive the master secret of a full handshake, then the traffic keys.
    fn derive_from_pre_master(&mut self, pre_master: &[u8]) -> Result<(), Error> {
        let (version, suite) = self.negotiated()?;
        let master = self.provider.derive_master_secret(
            version,
            suite,
            pre_master,
            &self.client_random,
            &self.server_random,
        )?;
        self.session.master_secret(&master);
        self.master_secret = Some(Zeroizing::new(master));
        self.derive_traffic_keys()
    }

    /// Reuse the master secret of a cached session.
    fn resume_master(&mut self, session: &Session) -> Result<(), Error> {
        self.master_secret = Some(Zeroizing::new(Buf::from_slice(session.master_secret())));
        self.resumed = true;
        self.derive_traffic_keys()
    }

    fn derive_traffic_keys(&mut self) -> Result<(), Error> {
        let (_, suite) = self.negotiated()?;
        let master = self.master()?;
        let keys = self.provider.derive_keys(
            suite,
            master,
            &self.client_random,
            &self.server_random,
        )?;
        let (write, read) = keys.split(self.role);
        self.pending_write = Some(write);
        self.pending_read = Some(read);
        Ok(())
    }

    fn master(&self) -> Result<&[u8], Error> {
        self.master_secret
            .as_deref()
            .map(|m| &m[..])
            .ok_or_else(|| Error::HandshakeFailure("no master secret".into()))
    }

    fn finished_mac(&self, sender: Role) -> Result<Buf, Error> {
        let (_, suite) = self.negotiated()?;
        let hash = self.transcript_hash()?;
        Ok(self
            .provider
            .finished_mac(suite, self.master()?, sender, &hash)?)
    }

    /// Queue our Finished, followed by activation of the new write keys.
    fn send_finished(&mut self) -> Result<(), Error> {
        let verify_data = self.finished_mac(self.role)?;
        self.send(Body::Finished(Finished::new(&verify_data)));

        let write = self
            .pending_write
            .take()
            .ok_or_else(|| Error::HandshakeFailure("no write keys".into()))?;
        self.outgoing.push_back(Outgoing::ActivateWrite(write));
        Ok(())
    }

    /// Check the peer's Finished and release the new read keys.
    fn verify_finished(&mut self, raw: &[u8]) -> Result<(), Error> {
        let (_, handshake) = Handshake::parse(raw)?;
        let Body::Finished(finished) = handshake.body else {
            return Err(Error::UnexpectedMessage("expected Finished".into()));
        };

        let peer = match self.role {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        };
        let expected = self.finished_mac(peer)?;
        let ok: bool = expected.ct_eq(finished.verify_data).into();
        if !ok || expected.len() != finished.verify_data.len() {
            return Err(Error::BadFinished);
        }
        trace!("{:?} Finished verified", peer);

        self.received(raw);
        self.ready_read = self.pending_read.take();
        Ok(())
    }

    fn freeze_session(&mut self) -> Result<Arc<Session>, Error> {
        let builder = std::mem::take(&mut self.session);
        builder.freeze()
    }
}

/// PAKE failures are reported as such, not as generic record failures.
fn pake_error(e: CryptoError) -> Error {
    match e {
        CryptoError::Authentication => Error::PakeAuthFailure,
        other => other.into(),
    }
}

/// Concatenate the key-exchange secret and an optional PAKE secret.
fn pre_master(kx_secret: &[u8], pake_secret: Option<&[u8]>) -> Zeroizing<Buf> {
    let mut out = Zeroizing::new(Buf::from_slice(kx_secret));
    if let Some(p) = pake_secret {
        out.extend_from_slice(p);
    }
    out
}

/// The handshake driving one engine, client or server.
pub(crate) enum HandshakeMachine {
    Client(Box<client::Client>),
    Server(Box<server::Server>),
}

impl HandshakeMachine {
    fn ctx(&self) -> &Context {
        match self {
            HandshakeMachine::Client(c) => c.ctx(),
            HandshakeMachine::Server(s) => s.ctx(),
        }
    }

    fn ctx_mut(&mut self) -> &mut Context {
        match self {
            HandshakeMachine::Client(c) => c.ctx_mut(),
            HandshakeMachine::Server(s) => s.ctx_mut(),
        }
    }

    /// Run as far as possible without more input.
    pub fn make_progress(&mut self) -> Result<(), Error> {
        match self {
            HandshakeMachine::Client(c) => c.make_progress(),
            HandshakeMachine::Server(s) => s.make_progress(),
        }
    }

    /// Feed one handshake record and run.
    pub fn handle_message(&mut self, message: Buf) -> Result<(), Error> {
        self.ctx_mut().push_incoming(message);
        self.make_progress()
    }

    pub fn state(&self) -> HandshakeState {
        match self {
            HandshakeMachine::Client(c) => c.state(),
            HandshakeMachine::Server(s) => s.state(),
        }
    }

    pub fn is_established(&self) -> bool {
        self.state() == HandshakeState::Established
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.ctx().version()
    }

    pub fn suite(&self) -> Option<CipherSuite> {
        self.ctx().suite()
    }

    pub fn peer(&self) -> Option<&PeerIdentity> {
        self.ctx().peer()
    }

    /// Fragment limit negotiated so far, if the hellos have been exchanged.
    pub fn max_fragment(&self) -> Option<usize> {
        self.ctx().max_fragment()
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.ctx().established()
    }

    pub fn pop_outgoing(&mut self) -> Option<Outgoing> {
        self.ctx_mut().pop_outgoing()
    }

    pub fn has_outgoing(&self) -> bool {
        self.ctx().has_outgoing()
    }

    pub fn take_read_keys(&mut self) -> Option<Box<dyn AeadContext>> {
        self.ctx_mut().take_read_keys()
    }
}

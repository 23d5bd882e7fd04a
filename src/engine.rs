//! The engine facade.
//!
//! An [`Engine`] is one side of one connection. The caller moves bytes:
//! plaintext in through [`Engine::wrap`], ciphertext in through
//! [`Engine::unwrap`], and reads the [`Status`] of each call to decide which
//! direction of I/O comes next. Nothing blocks and nothing is retried
//! internally.
//!
//! ```text
//!            wrap(src)                        unwrap(src)
//!   plaintext ───► OutboundPlain            InboundCipher ◄─── ciphertext
//!                       │                         │
//!                  RecordLayer ◄── handshake ──► RecordLayer
//!                       │                         │
//!   ciphertext ◄── OutboundCipher           InboundPlain ───► plaintext
//!            dst                                       dst
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

use crate::buffer::{Buf, BufferArena, BufferId};
use crate::cache::SessionPin;
use crate::credential::{Credential, PakeCredential};
use crate::handshake::client::Client;
use crate::handshake::server::{Server, ServerCredential};
use crate::handshake::{HandshakeMachine, HandshakeState, Outgoing};
use crate::message::{Alert, AlertDescription, MessageType};
use crate::record::{Record, RecordLayer, HEADER_LEN, MAX_EXPANSION};
use crate::session::{PeerIdentity, Session};
use crate::types::{CipherSuite, ContentType, ProtocolVersion, Role, SessionId};
use crate::{Config, Error};

/// Outcome of a [`wrap`](Engine::wrap) or [`unwrap`](Engine::unwrap) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The call did what it could; nothing is waiting on the caller.
    Ok,
    /// `dst` is full. Drain it and call again.
    BufferOverflow,
    /// More ciphertext is needed to complete a record.
    Incomplete,
    /// Output is pending; call `wrap`.
    NeedWrap,
    /// The handshake waits for the peer; call `unwrap` with more input.
    NeedUnwrap,
    /// Application data cannot move until the handshake completes.
    NeedHandshake,
    /// The connection was closed gracefully.
    Closed,
}

/// Which direction the handshake needs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    NotHandshaking,
    NeedWrap,
    NeedUnwrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    pub status: Status,
    /// Bytes taken from `src`.
    pub consumed: usize,
    /// Bytes written to `dst`.
    pub produced: usize,
}

impl EngineResult {
    fn new(status: Status, consumed: usize, produced: usize) -> Self {
        EngineResult {
            status,
            consumed,
            produced,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    /// Closed by either side with close_notify.
    Closed,
    /// Torn down by a fatal error.
    Failed,
}

/// One side of a TLS connection, driven entirely by the caller.
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::SystemTime;
/// use pakls::{certificate, Config, Credential, Engine, Status};
///
/// let config = Arc::new(Config::default());
/// let key = certificate::generate_self_signed("example.test").unwrap();
///
/// let mut client = Engine::client(config.clone(), SystemTime::now());
/// let mut server =
///     Engine::server(config, Credential::Certificate(key), SystemTime::now()).unwrap();
///
/// let mut to_server = vec![0; 32768];
/// let mut plain = vec![0; 16384];
/// let out = client.wrap(&[], &mut to_server).unwrap();
/// assert_eq!(out.status, Status::NeedHandshake);
/// let res = server.unwrap(&to_server[..out.produced], &mut plain).unwrap();
/// assert_eq!(res.status, Status::NeedWrap);
/// ```
pub struct Engine {
    config: Arc<Config>,
    role: Role,
    now: SystemTime,

    credential: Option<Credential>,

    /// Cached session to offer in the first ClientHello.
    resume: Option<SessionPin>,

    record: RecordLayer,
    buffers: BufferArena,

    /// `None` until the first wrap/unwrap.
    machine: Option<HandshakeMachine>,

    /// Records and key changes taken from the machine, not yet framed.
    queue: VecDeque<Outgoing>,

    /// Last established session. Survives renegotiation until the new one
    /// completes.
    session: Option<Arc<Session>>,

    lifecycle: Lifecycle,
    close_notify_sent: bool,
}

impl Engine {
    /// A client engine authenticating the server by certificate.
    ///
    /// Add a PAKE credential with [`with_credential`](Self::with_credential).
    pub fn client(config: Arc<Config>, now: SystemTime) -> Engine {
        Engine::new(config, Role::Client, now)
    }

    /// A server engine presenting `credential`.
    pub fn server(
        config: Arc<Config>,
        credential: Credential,
        now: SystemTime,
    ) -> Result<Engine, Error> {
        Engine::new(config, Role::Server, now).with_credential(credential)
    }

    fn new(config: Arc<Config>, role: Role, now: SystemTime) -> Engine {
        let max_fragment = config.max_fragment_length();
        Engine {
            record: RecordLayer::new(max_fragment),
            buffers: BufferArena::new(HEADER_LEN + max_fragment + MAX_EXPANSION, max_fragment),
            config,
            role,
            now,
            credential: None,
            resume: None,
            machine: None,
            queue: VecDeque::new(),
            session: None,
            lifecycle: Lifecycle::Open,
            close_notify_sent: false,
        }
    }

    /// Set the credential this engine presents.
    ///
    /// A client only takes PAKE client parameters, which require TLS 1.3 to be
    /// enabled. A server takes a certificate or PAKE server parameters.
    pub fn with_credential(mut self, credential: Credential) -> Result<Engine, Error> {
        if self.machine.is_some() {
            return Err(Error::ConfigError("handshake already started".into()));
        }
        match (self.role, &credential) {
            (Role::Client, Credential::Pake(PakeCredential::Client(_))) => {
                if !self.config.versions().contains(&ProtocolVersion::Tls13) {
                    return Err(Error::ConfigError(
                        "PAKE requires TLS 1.3 to be enabled".into(),
                    ));
                }
            }
            (Role::Client, _) => {
                return Err(Error::ConfigError(
                    "a client takes PAKE client parameters only".into(),
                ))
            }
            (Role::Server, Credential::Certificate(_))
            | (Role::Server, Credential::Pake(PakeCredential::Server(_))) => {}
            (Role::Server, _) => {
                return Err(Error::ConfigError(
                    "a server takes a certificate or PAKE server parameters".into(),
                ))
            }
        }
        self.credential = Some(credential);
        Ok(self)
    }

    /// Offer the cached session `id` for resumption.
    ///
    /// Pins the session until the handshake ends. Unknown or expired ids fall
    /// back to a full handshake.
    pub fn with_resumption(mut self, id: &SessionId) -> Engine {
        if self.role == Role::Client {
            self.resume = self.config.client_session_cache().pin_at(id, self.now);
            if self.resume.is_none() {
                debug!("Session {:?} not cached, full handshake", id);
            }
        }
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> HandshakeState {
        self.machine
            .as_ref()
            .map(|m| m.state())
            .unwrap_or(HandshakeState::Start)
    }

    /// Handshake complete, nothing left to flush, not closed.
    pub fn is_established(&self) -> bool {
        self.lifecycle == Lifecycle::Open && self.handshake_done() && !self.has_pending_output()
    }

    pub fn handshake_status(&self) -> HandshakeStatus {
        if self.has_pending_output() {
            return HandshakeStatus::NeedWrap;
        }
        if self.lifecycle != Lifecycle::Open {
            return HandshakeStatus::NotHandshaking;
        }
        match &self.machine {
            None if self.role == Role::Client => HandshakeStatus::NeedWrap,
            None => HandshakeStatus::NeedUnwrap,
            Some(m) if m.is_established() => HandshakeStatus::NotHandshaking,
            Some(_) => HandshakeStatus::NeedUnwrap,
        }
    }

    /// The established session, if any.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.machine.as_ref().and_then(|m| m.version())
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.machine.as_ref().and_then(|m| m.suite())
    }

    pub fn peer_identity(&self) -> Option<&PeerIdentity> {
        self.machine.as_ref().and_then(|m| m.peer())
    }

    /// Encrypt application data from `src` into `dst`.
    ///
    /// Pending handshake and alert records are flushed first. While the
    /// handshake runs no application data is taken and the status is
    /// [`Status::NeedHandshake`].
    pub fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error> {
        self.check_usable()?;
        let result = self.do_wrap(src, dst);
        self.guard(result)
    }

    /// Process ciphertext from `src`, writing application data into `dst`.
    pub fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error> {
        self.check_usable()?;
        let result = self.do_unwrap(src, dst);
        self.guard(result)
    }

    /// Start closing the connection.
    ///
    /// An established connection queues a close_notify alert for the next
    /// `wrap`. A handshake in progress is abandoned. Calling it again has no
    /// effect.
    pub fn close(&mut self) {
        if self.lifecycle != Lifecycle::Open {
            return;
        }
        if self.handshake_done() {
            self.collect();
            self.queue_close_notify();
        } else {
            debug!("Closing during handshake, dropping pending output");
            self.queue.clear();
            self.buffers[BufferId::OutboundCipher].clear();
            self.machine = None;
        }
        self.resume = None;
        self.lifecycle = Lifecycle::Closed;
    }

    /// Start a new handshake on an established client connection.
    ///
    /// Allowed only when the trust policy permits it. Application data stops
    /// flowing until the new handshake completes.
    ///
    /// A refusal by our own policy leaves the connection as it was.
    pub fn renegotiate(&mut self) -> Result<(), Error> {
        self.check_usable()?;
        if self.lifecycle == Lifecycle::Closed {
            return Err(Error::EngineClosed);
        }
        if self.role == Role::Server {
            return Err(Error::ConfigError("only a client starts renegotiation".into()));
        }
        if !self.handshake_done() {
            return Err(Error::ConfigError("no established handshake".into()));
        }
        if !self.config.trust_policy().allow_renegotiation() {
            warn!("Renegotiation refused by trust policy");
            return Err(Error::RenegotiationRefused);
        }
        let result = self.start_renegotiation();
        self.guard(result)
    }

    fn start_renegotiation(&mut self) -> Result<(), Error> {
        debug!("Starting renegotiation");
        let mut machine = self.new_machine()?;
        machine.make_progress()?;
        self.machine = Some(machine);
        self.collect();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Wrap
    // ------------------------------------------------------------------------

    fn do_wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error> {
        let mut produced = 0;

        if self.lifecycle == Lifecycle::Closed {
            self.flush(dst, &mut produced)?;
            let status = if self.has_pending_output() {
                Status::BufferOverflow
            } else {
                Status::Closed
            };
            return Ok(EngineResult::new(status, 0, produced));
        }

        self.start()?;
        self.flush(dst, &mut produced)?;

        if self.has_pending_output() {
            return Ok(EngineResult::new(Status::BufferOverflow, 0, produced));
        }
        if !self.handshake_done() {
            return Ok(EngineResult::new(Status::NeedHandshake, 0, produced));
        }

        let mut consumed = 0;
        while consumed < src.len() {
            let n = (src.len() - consumed).min(self.record.max_fragment());
            if self.record.framed_len(n) > dst.len() - produced {
                break;
            }

            let (plain, cipher) = self
                .buffers
                .pair_mut(BufferId::OutboundPlain, BufferId::OutboundCipher);
            plain.try_extend(&src[consumed..consumed + n])?;
            let framed = self
                .record
                .frame(cipher, ContentType::ApplicationData, plain.as_slice());
            plain.clear();
            framed?;

            consumed += n;
            produced += cipher.drain_into(&mut dst[produced..]);
        }

        let status = if consumed < src.len() && consumed == 0 {
            Status::BufferOverflow
        } else {
            Status::Ok
        };
        trace!("wrap: {:?} consumed {} produced {}", status, consumed, produced);
        Ok(EngineResult::new(status, consumed, produced))
    }

    /// Frame queued output and copy it into `dst` until either runs out.
    fn flush(&mut self, dst: &mut [u8], produced: &mut usize) -> Result<(), Error> {
        loop {
            self.pump()?;
            let n = self.buffers[BufferId::OutboundCipher].drain_into(&mut dst[*produced..]);
            *produced += n;
            if self.queue.is_empty() || n == 0 {
                return Ok(());
            }
        }
    }

    /// Frame queued records into the outbound buffer while they fit.
    fn pump(&mut self) -> Result<(), Error> {
        self.collect();
        while let Some(item) = self.queue.pop_front() {
            match item {
                Outgoing::Record(content_type, payload) => {
                    let outbound = &mut self.buffers[BufferId::OutboundCipher];
                    match self.record.frame(outbound, content_type, &payload) {
                        Ok(()) => {}
                        Err(Error::BufferOverflow) => {
                            self.queue
                                .push_front(Outgoing::Record(content_type, payload));
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    }
                }
                Outgoing::ActivateWrite(aead) => {
                    trace!("Activating write protection");
                    self.record.set_write(aead);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Unwrap
    // ------------------------------------------------------------------------

    fn do_unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error> {
        let mut consumed = 0;
        let mut produced = self.buffers[BufferId::InboundPlain].drain_into(dst);

        if self.lifecycle == Lifecycle::Open {
            self.start()?;
        }

        while self.lifecycle == Lifecycle::Open && self.buffers[BufferId::InboundPlain].is_empty() {
            let inbound = &mut self.buffers[BufferId::InboundCipher];
            let n = inbound.free().min(src.len() - consumed);
            if n > 0 {
                self.record.feed(inbound, &src[consumed..consumed + n])?;
                consumed += n;
            }

            let mut progressed = false;
            while self.lifecycle == Lifecycle::Open
                && self.buffers[BufferId::InboundPlain].is_empty()
            {
                let record = match self
                    .record
                    .next_record(&mut self.buffers[BufferId::InboundCipher])
                {
                    Ok(r) => r,
                    Err(Error::Incomplete) => break,
                    Err(e) => return Err(e),
                };
                progressed = true;
                self.on_record(record, dst, &mut produced)?;
            }

            if consumed == src.len() || (n == 0 && !progressed) {
                break;
            }
        }

        let status = if self.lifecycle == Lifecycle::Closed {
            Status::Closed
        } else if !self.buffers[BufferId::InboundPlain].is_empty() {
            Status::BufferOverflow
        } else if self.has_pending_output() {
            Status::NeedWrap
        } else if (src.is_empty() && produced == 0)
            || !self.buffers[BufferId::InboundCipher].is_empty()
        {
            Status::Incomplete
        } else if !self.handshake_done() {
            Status::NeedUnwrap
        } else {
            Status::Ok
        };
        trace!(
            "unwrap: {:?} consumed {} produced {}",
            status,
            consumed,
            produced
        );
        Ok(EngineResult::new(status, consumed, produced))
    }

    fn on_record(&mut self, record: Record, dst: &mut [u8], produced: &mut usize) -> Result<(), Error> {
        match record.content_type {
            ContentType::Handshake => self.on_handshake(record),
            ContentType::Alert => self.on_alert(&record.payload),
            ContentType::ApplicationData => {
                if !self.handshake_done() {
                    return Err(Error::UnexpectedMessage(
                        "application data during handshake".into(),
                    ));
                }
                let payload = &record.payload;
                let n = (dst.len() - *produced).min(payload.len());
                dst[*produced..*produced + n].copy_from_slice(&payload[..n]);
                *produced += n;
                if n < payload.len() {
                    self.buffers[BufferId::InboundPlain].try_extend(&payload[n..])?;
                }
                Ok(())
            }
            other => Err(Error::BadContentType(other)),
        }
    }

    fn on_handshake(&mut self, record: Record) -> Result<(), Error> {
        if self.handshake_done() {
            let is_hello = record.payload.first() == Some(&MessageType::ClientHello.as_u8());
            if self.role == Role::Client || !is_hello {
                return Err(Error::UnexpectedMessage(
                    "handshake message after completion".into(),
                ));
            }
            if !self.config.trust_policy().allow_renegotiation() {
                warn!("Refusing renegotiation from peer");
                return Err(Error::RenegotiationRefused);
            }
            debug!("Peer started renegotiation");
            self.machine = Some(self.new_machine()?);
        }

        let machine = self
            .machine
            .as_mut()
            .ok_or_else(|| Error::UnexpectedMessage("no handshake in progress".into()))?;
        machine.handle_message(record.payload)?;
        self.collect();
        Ok(())
    }

    fn on_alert(&mut self, payload: &[u8]) -> Result<(), Error> {
        let (_, alert) = Alert::parse(payload)?;
        match alert.description {
            AlertDescription::CloseNotify => {
                debug!("Peer sent close_notify");
                if !self.handshake_done() {
                    self.queue.clear();
                }
                self.queue_close_notify();
                self.lifecycle = Lifecycle::Closed;
                Ok(())
            }
            other => {
                warn!("Peer sent alert {:?} ({:?})", other, alert.level);
                Err(Error::PeerAlert(other.as_u8()))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------------

    fn check_usable(&self) -> Result<(), Error> {
        match self.lifecycle {
            Lifecycle::Failed => Err(Error::EngineClosed),
            _ => Ok(()),
        }
    }

    /// Fatal errors tear the engine down; everything later is `EngineClosed`.
    fn guard<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!("{:?} engine failed: {}", self.role, e);
                self.lifecycle = Lifecycle::Failed;
                self.buffers.clear();
                self.queue.clear();
                self.resume = None;
            }
        }
        result
    }

    /// Create the handshake machine on first use.
    fn start(&mut self) -> Result<(), Error> {
        if self.machine.is_some() {
            return Ok(());
        }
        let mut machine = self.new_machine()?;
        machine.make_progress()?;
        self.machine = Some(machine);
        self.collect();
        Ok(())
    }

    fn new_machine(&mut self) -> Result<HandshakeMachine, Error> {
        let config = self.config.clone();
        let machine = match self.role {
            Role::Client => {
                let pake = match &self.credential {
                    Some(Credential::Pake(PakeCredential::Client(p))) => Some(p.clone()),
                    _ => None,
                };
                let client = Client::new(config, self.now, pake, self.resume.take());
                HandshakeMachine::Client(Box::new(client))
            }
            Role::Server => {
                let credential = match &self.credential {
                    Some(Credential::Certificate(key)) => ServerCredential::Certificate(key.clone()),
                    Some(Credential::Pake(PakeCredential::Server(p))) => {
                        ServerCredential::Pake(p.clone())
                    }
                    _ => return Err(Error::ConfigError("server has no credential".into())),
                };
                HandshakeMachine::Server(Box::new(Server::new(config, self.now, credential)))
            }
        };
        Ok(machine)
    }

    /// Move machine output into the queue and install released read keys.
    fn collect(&mut self) {
        let Some(machine) = &mut self.machine else {
            return;
        };
        while let Some(item) = machine.pop_outgoing() {
            self.queue.push_back(item);
        }
        if let Some(len) = machine.max_fragment() {
            self.record.set_max_fragment(len);
        }
        if let Some(read) = machine.take_read_keys() {
            trace!("Activating read protection");
            self.record.set_read(read);
        }
        if let Some(session) = machine.session() {
            self.session = Some(session.clone());
        }
    }

    fn queue_close_notify(&mut self) {
        if self.close_notify_sent {
            return;
        }
        let bytes = Alert::close_notify().to_bytes();
        self.queue
            .push_back(Outgoing::Record(ContentType::Alert, Buf::from_slice(&bytes)));
        self.close_notify_sent = true;
    }

    fn handshake_done(&self) -> bool {
        self.machine.as_ref().is_some_and(|m| m.is_established())
    }

    fn has_pending_output(&self) -> bool {
        !self.queue.is_empty()
            || !self.buffers[BufferId::OutboundCipher].is_empty()
            || self.machine.as_ref().is_some_and(|m| m.has_outgoing())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("role", &self.role)
            .field("state", &self.state())
            .field("lifecycle", &self.lifecycle)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

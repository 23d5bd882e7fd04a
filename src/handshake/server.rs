// Server handshake flow:
//
// Full:
//  1. ClientHello
//     - version and suite: our preference order, first one the client offered
//     - PAKE mode: link lookup on the presented identities, then the first of
//       the link's options whose algorithm the client sent a share for
//  2. ServerHello, KeyExchange (x25519 share)
//  3. Certificate + CertificateVerify, or PakeVerify in PAKE mode
//  4. Client KeyExchange, carrying its PAKE confirmation in PAKE mode
//  5. Client Finished
//     - read keys switch after it verifies
//  6. Optional NewSessionTicket, then our Finished
//     - write keys switch right after Finished
//
// Resumed (cached session found by id or ticket):
//  1. ClientHello
//  2. ServerHello echoing the session id, our Finished
//  3. Client Finished

use std::sync::Arc;
use std::time::SystemTime;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::{pake_error, pre_master, Context, HandshakeState};
use crate::buffer::ToBuf;
use crate::cache::SessionPin;
use crate::credential::{CertifiedKey, PakeServerParams};
use crate::crypto::{ActiveKeyExchange, PakeResponse};
use crate::message::{
    Body, Certificate, CertificateVerify, ClientHello, Handshake, KeyExchange, MessageType,
    NewSessionTicket, PakeVerify, ServerHello,
};
use crate::session::{PeerIdentity, Session};
use crate::types::{ProtocolVersion, Role, SessionId};
use crate::{Config, Error, MIN_FRAGMENT_LEN};

/// Length of generated session ids and tickets.
const ID_LEN: usize = 32;

/// What a server authenticates with.
#[derive(Debug, Clone)]
pub(crate) enum ServerCredential {
    Certificate(CertifiedKey),
    Pake(PakeServerParams),
}

/// The PAKE run selected for this handshake.
struct PakeRun {
    algorithm: String,
    response: PakeResponse,
}

pub(crate) struct Server {
    state: State,
    ctx: Context,
    credential: ServerCredential,

    /// Cached session being resumed.
    resume: Option<SessionPin>,

    /// Client asked for a ticket and tickets are enabled.
    ticket_requested: bool,

    pake: Option<PakeRun>,
    kx: Option<Box<dyn ActiveKeyExchange>>,
}

impl Server {
    pub fn new(config: Arc<Config>, now: SystemTime, credential: ServerCredential) -> Self {
        Server {
            state: State::AwaitClientHello,
            ctx: Context::new(config, Role::Server, now),
            credential,
            resume: None,
            ticket_requested: false,
            pake: None,
            kx: None,
        }
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn state(&self) -> HandshakeState {
        self.state.public(self.ctx.is_resumed())
    }

    pub fn make_progress(&mut self) -> Result<(), Error> {
        loop {
            let prev_state = self.state;

            let new_state = prev_state.make_progress(self)?;
            if prev_state != new_state {
                self.state = new_state;
                trace!("{:?} -> {:?}", prev_state, new_state);
            } else {
                break;
            }
        }
        Ok(())
    }

    fn is_pake(&self) -> bool {
        matches!(self.credential, ServerCredential::Pake(_))
    }

    /// Choose version and suite from our preference order.
    fn negotiate(&mut self, hello: &ClientHello<'_>) -> Result<(), Error> {
        let config = self.ctx.config().clone();
        let pake = self.is_pake();

        let version = config
            .versions()
            .iter()
            .copied()
            .filter(|v| !pake || *v == ProtocolVersion::Tls13)
            .find(|v| hello.versions.contains(&v.as_u16()))
            .ok_or_else(|| Error::HandshakeFailure("no common protocol version".into()))?;

        let suite = config
            .cipher_suites()
            .iter()
            .copied()
            .filter(|s| s.is_valid_for(version))
            .find(|s| hello.cipher_suites.contains(s))
            .ok_or_else(|| Error::HandshakeFailure("no common cipher suite".into()))?;

        let offered = hello.max_fragment as usize;
        if offered < MIN_FRAGMENT_LEN {
            return Err(Error::HandshakeFailure(format!(
                "client fragment limit {} below {}",
                offered, MIN_FRAGMENT_LEN
            )));
        }

        debug!("Negotiated {} {:?}", version, suite);
        self.ctx.set_negotiated(version, suite);
        self.ctx.set_max_fragment(offered.min(config.max_fragment_length()));
        Ok(())
    }

    /// Find a cached session this ClientHello may resume.
    fn find_resumable(&self, hello: &ClientHello<'_>) -> Option<SessionPin> {
        let config = self.ctx.config();
        let cache = config.server_session_cache();
        let now = self.ctx.now();

        let session = if hello.session_id.is_empty() {
            None
        } else {
            cache.lookup_at(&hello.session_id, now)
        };
        let session = session.or_else(|| {
            hello
                .ticket
                .filter(|t| !t.is_empty() && config.session_tickets())
                .and_then(|t| cache.lookup_ticket_at(t, now))
        })?;

        if session.id() != &hello.session_id {
            debug!("Ticket session {:?} not offered by id", session.id());
            return None;
        }
        if Some(session.protocol_version()) != self.ctx.version()
            || Some(session.cipher_suite()) != self.ctx.suite()
        {
            debug!("Cached session {:?} parameters differ", session.id());
            return None;
        }
        if !self.peer_matches(&session, hello) {
            debug!("Cached session {:?} authenticated differently", session.id());
            return None;
        }

        cache.pin_at(session.id(), now)
    }

    fn peer_matches(&self, session: &Session, hello: &ClientHello<'_>) -> bool {
        match (&self.credential, session.peer()) {
            (ServerCredential::Certificate(_), PeerIdentity::Anonymous) => true,
            (
                ServerCredential::Pake(_),
                PeerIdentity::Pake {
                    client_id,
                    server_id,
                },
            ) => {
                let Some(offer) = &hello.pake else {
                    return false;
                };
                client_id.as_deref().unwrap_or_default() == offer.client_id
                    && server_id.as_deref().unwrap_or_default() == offer.server_id
            }
            _ => false,
        }
    }

    /// Select the PAKE option for the presented identities and answer the
    /// client's share for it.
    fn select_pake(
        &mut self,
        params: &PakeServerParams,
        hello: &ClientHello<'_>,
    ) -> Result<(), Error> {
        let Some(offer) = &hello.pake else {
            return Err(Error::HandshakeFailure("client did not offer PAKE".into()));
        };
        let client_id = (!offer.client_id.is_empty()).then_some(offer.client_id);
        let server_id = (!offer.server_id.is_empty()).then_some(offer.server_id);

        let provider = self.ctx.provider().clone();
        let options = params.options_for(client_id, server_id)?;

        let Some((option, share)) = options
            .iter()
            .filter(|o| provider.pake_algorithms().iter().any(|a| *a == o.algorithm()))
            .find_map(|o| {
                offer
                    .shares
                    .iter()
                    .find(|s| s.algorithm == o.algorithm())
                    .map(|s| (o, s.share))
            })
        else {
            warn!("No PAKE algorithm in common with the client");
            return Err(Error::NoMatchingPakeOption);
        };
        debug!("Selected PAKE algorithm {}", option.algorithm());

        let response = provider
            .pake_respond(option, offer.client_id, offer.server_id, share)
            .map_err(pake_error)?;

        self.pake = Some(PakeRun {
            algorithm: option.algorithm().to_string(),
            response,
        });
        self.ctx.set_peer(PeerIdentity::Pake {
            client_id: client_id.map(|c| c.to_buf()),
            server_id: server_id.map(|s| s.to_buf()),
        });
        Ok(())
    }

    fn new_session_id(&self) -> Result<SessionId, Error> {
        if !self.ctx.config().enable_session_creation() {
            return Ok(SessionId::empty());
        }
        let mut id = [0u8; ID_LEN];
        self.ctx.provider().fill_random(&mut id)?;
        SessionId::try_new(&id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitClientHello,
    SendServerHello,
    SendKeyExchange,
    SendCertificate,
    SendPakeVerify,
    AwaitKeyExchange,
    AwaitFinished,
    SendTicket,
    SendFinished,
    Established,
}

impl State {
    fn public(&self, resumed: bool) -> HandshakeState {
        match self {
            State::AwaitClientHello => HandshakeState::Start,
            State::SendServerHello => HandshakeState::ClientHelloReceived,
            State::SendKeyExchange | State::SendCertificate | State::SendPakeVerify => {
                HandshakeState::ServerHelloSent
            }
            State::AwaitKeyExchange => HandshakeState::KeyExchange,
            State::AwaitFinished if resumed => HandshakeState::FinishedSent,
            State::AwaitFinished => HandshakeState::Verified,
            State::SendTicket | State::SendFinished if resumed => HandshakeState::ServerHelloSent,
            State::SendTicket | State::SendFinished => HandshakeState::FinishedReceived,
            State::Established => HandshakeState::Established,
        }
    }

    fn make_progress(self, server: &mut Server) -> Result<Self, Error> {
        match self {
            State::AwaitClientHello => self.await_client_hello(server),
            State::SendServerHello => self.send_server_hello(server),
            State::SendKeyExchange => self.send_key_exchange(server),
            State::SendCertificate => self.send_certificate(server),
            State::SendPakeVerify => self.send_pake_verify(server),
            State::AwaitKeyExchange => self.await_key_exchange(server),
            State::AwaitFinished => self.await_finished(server),
            State::SendTicket => self.send_ticket(server),
            State::SendFinished => self.send_finished(server),
            State::Established => Ok(self),
        }
    }

    fn await_client_hello(self, server: &mut Server) -> Result<Self, Error> {
        let Some(raw) = server.ctx.next_message(&[MessageType::ClientHello])? else {
            return Ok(self);
        };
        let (_, handshake) = Handshake::parse(&raw)?;
        let Body::ClientHello(hello) = handshake.body else {
            return Err(Error::UnexpectedMessage("expected ClientHello".into()));
        };

        if server.is_pake() && hello.pake.is_none() {
            return Err(Error::HandshakeFailure("client did not offer PAKE".into()));
        }
        if !server.is_pake() && hello.pake.is_some() {
            debug!("Ignoring PAKE offer, serving a certificate");
        }

        server.negotiate(&hello)?;
        server.ctx.client_random = hello.random;
        server.ticket_requested = hello.ticket.is_some() && server.ctx.config().session_tickets();

        if let Some(pin) = server.find_resumable(&hello) {
            let session = pin.session().clone();
            debug!("Resuming session {:?}", session.id());
            server.ctx.set_peer(session.peer().clone());
            server.ctx.session.id(session.id().clone());
            server.resume = Some(pin);
        } else {
            if let ServerCredential::Pake(params) = &server.credential {
                let params = params.clone();
                server.select_pake(&params, &hello)?;
            } else {
                server.ctx.set_peer(PeerIdentity::Anonymous);
            }
            let id = server.new_session_id()?;
            server.ctx.session.id(id);
        }

        server.ctx.received(&raw);
        Ok(State::SendServerHello)
    }

    fn send_server_hello(self, server: &mut Server) -> Result<Self, Error> {
        server.ctx.server_random = server.ctx.random()?;
        let (version, suite) = server.ctx.negotiated()?;
        let max_fragment = server
            .ctx
            .max_fragment()
            .and_then(|len| u16::try_from(len).ok())
            .ok_or_else(|| Error::HandshakeFailure("fragment limit not negotiated".into()))?;

        let session_id = match &server.resume {
            Some(pin) => pin.session().id().clone(),
            None => server.ctx.session.current_id().cloned().unwrap_or_default(),
        };

        server.ctx.send(Body::ServerHello(ServerHello::new(
            version.as_u16(),
            server.ctx.server_random,
            session_id,
            suite,
            max_fragment,
        )));

        if let Some(pin) = &server.resume {
            let session = pin.session().clone();
            server.ctx.resume_master(&session)?;
            return Ok(State::SendFinished);
        }
        Ok(State::SendKeyExchange)
    }

    fn send_key_exchange(self, server: &mut Server) -> Result<Self, Error> {
        let kx = server.ctx.provider().start_key_exchange()?;
        let public = kx.pub_key().to_buf();
        server.kx = Some(kx);

        server
            .ctx
            .send(Body::KeyExchange(KeyExchange::new(&public, None)));

        if server.is_pake() {
            Ok(State::SendPakeVerify)
        } else {
            Ok(State::SendCertificate)
        }
    }

    fn send_certificate(self, server: &mut Server) -> Result<Self, Error> {
        let ServerCredential::Certificate(key) = &server.credential else {
            return Err(Error::HandshakeFailure("no certificate credential".into()));
        };

        let chain: Vec<&[u8]> = key.chain().iter().map(|c| &c[..]).collect();
        server.ctx.send(Body::Certificate(Certificate::new(chain)));

        let content = server.ctx.signed_content()?;
        let signature = server.ctx.provider().sign(key.private_key(), &content)?;
        trace!("Signed CertificateVerify ({} bytes)", signature.len());
        server
            .ctx
            .send(Body::CertificateVerify(CertificateVerify::new(&signature)));

        Ok(State::AwaitKeyExchange)
    }

    fn send_pake_verify(self, server: &mut Server) -> Result<Self, Error> {
        let run = server
            .pake
            .as_ref()
            .ok_or_else(|| Error::HandshakeFailure("no PAKE run selected".into()))?;

        let verify = PakeVerify {
            algorithm: &run.algorithm,
            share: &run.response.share,
            confirm: &run.response.confirm,
        };
        server.ctx.send(Body::PakeVerify(verify));

        Ok(State::AwaitKeyExchange)
    }

    fn await_key_exchange(self, server: &mut Server) -> Result<Self, Error> {
        let Some(raw) = server.ctx.next_message(&[MessageType::KeyExchange])? else {
            return Ok(self);
        };
        let (_, handshake) = Handshake::parse(&raw)?;
        let Body::KeyExchange(kx_msg) = handshake.body else {
            return Err(Error::UnexpectedMessage("expected KeyExchange".into()));
        };

        let pake_secret = match (&server.pake, kx_msg.pake_confirm) {
            (Some(run), Some(confirm)) => {
                let expected = &run.response.expected_confirm;
                let ok: bool = expected.ct_eq(confirm).into();
                if !ok || expected.len() != confirm.len() {
                    warn!("PAKE confirmation mismatch");
                    return Err(Error::PakeAuthFailure);
                }
                Some(Zeroizing::new(run.response.shared_secret.clone()))
            }
            (Some(_), None) => {
                warn!("Client KeyExchange lacks PAKE confirmation");
                return Err(Error::PakeAuthFailure);
            }
            (None, Some(_)) => {
                return Err(Error::MalformedMessage(
                    "unexpected PAKE confirmation".into(),
                ))
            }
            (None, None) => None,
        };

        let kx = server
            .kx
            .take()
            .ok_or_else(|| Error::HandshakeFailure("no key exchange in progress".into()))?;
        let shared = Zeroizing::new(kx.complete(kx_msg.public)?);

        server.ctx.received(&raw);
        let pre_master = pre_master(&shared, pake_secret.as_deref().map(|s| &s[..]));
        server.ctx.derive_from_pre_master(&pre_master)?;
        server.pake = None;

        Ok(State::AwaitFinished)
    }

    fn await_finished(self, server: &mut Server) -> Result<Self, Error> {
        let Some(raw) = server.ctx.next_message(&[MessageType::Finished])? else {
            return Ok(self);
        };
        server.ctx.verify_finished(&raw)?;

        if server.ctx.is_resumed() {
            complete(server)?;
            Ok(State::Established)
        } else {
            Ok(State::SendTicket)
        }
    }

    fn send_ticket(self, server: &mut Server) -> Result<Self, Error> {
        let has_id = server
            .ctx
            .session
            .current_id()
            .is_some_and(|id| !id.is_empty());
        if !server.ticket_requested || !has_id {
            return Ok(State::SendFinished);
        }

        let mut ticket = [0u8; ID_LEN];
        server.ctx.provider().fill_random(&mut ticket)?;
        let lifetime = server.ctx.config().server_session_cache().ttl().as_secs();
        let lifetime = u32::try_from(lifetime).unwrap_or(u32::MAX);

        server
            .ctx
            .send(Body::NewSessionTicket(NewSessionTicket::new(lifetime, &ticket)));
        server.ctx.session.ticket(&ticket);
        debug!("Issued session ticket, lifetime {}s", lifetime);

        Ok(State::SendFinished)
    }

    fn send_finished(self, server: &mut Server) -> Result<Self, Error> {
        server.ctx.send_finished()?;

        if server.ctx.is_resumed() {
            Ok(State::AwaitFinished)
        } else {
            complete(server)?;
            Ok(State::Established)
        }
    }
}

fn complete(server: &mut Server) -> Result<(), Error> {
    let now = server.ctx.now();
    let session = match server.resume.take() {
        Some(pin) => {
            let session = pin.session().clone();
            session.touch(now);
            session
        }
        None => {
            let session = server.ctx.freeze_session()?;
            if !session.id().is_empty() {
                let cache = server.ctx.config().server_session_cache();
                cache.insert_at(session.clone(), now);
                if let Some(ticket) = session.ticket() {
                    cache.insert_ticket(ticket, session.clone());
                }
            }
            session
        }
    };
    debug!(
        "Handshake complete; session {:?}, resumed: {}",
        session.id(),
        server.ctx.is_resumed()
    );
    server.ctx.established = Some(session);
    Ok(())
}

// Client handshake flow:
//
// Full:
//  1. ClientHello, carrying one PAKE share per offered option in PAKE mode
//  2. ServerHello, then the server's KeyExchange share
//  3. Certificate + CertificateVerify, or PakeVerify in PAKE mode
//     - signature checked against the leaf, chain handed to the trust policy
//     - PAKE: the verifier's confirmation is checked before anything is sent
//  4. KeyExchange (with our PAKE confirmation), then Finished
//     - write keys switch right after Finished
//  5. Optional NewSessionTicket, then the server's Finished
//     - read keys switch after it verifies
//
// Resumed (ServerHello echoes the offered session id):
//  1. ClientHello
//  2. ServerHello, optional NewSessionTicket, server Finished
//  3. Finished

use std::sync::Arc;
use std::time::SystemTime;

use zeroize::Zeroizing;

use super::{pake_error, pre_master, Context, HandshakeState};
use crate::buffer::{Buf, ToBuf};
use crate::cache::SessionPin;
use crate::credential::PakeClientParams;
use crate::crypto::PakeProver;
use crate::message::{
    Body, ClientHello, Handshake, KeyExchange, MessageType, PakeOffer, PakeShare, MAX_CHAIN_LEN,
};
use crate::session::PeerIdentity;
use crate::types::{ProtocolVersion, Role, SessionId};
use crate::{Config, Error, MIN_FRAGMENT_LEN};

pub(crate) struct Client {
    state: State,
    ctx: Context,

    /// PAKE parameters, `None` in certificate mode.
    pake: Option<PakeClientParams>,

    /// Cached session offered for resumption.
    resume: Option<SessionPin>,

    offered_versions: Vec<ProtocolVersion>,
    offered_session_id: SessionId,

    /// One per offered PAKE option, in offer order.
    provers: Vec<Box<dyn PakeProver>>,
    pake_secret: Option<Zeroizing<Buf>>,
    pake_confirm: Option<Buf>,

    server_share: Option<Buf>,
    server_chain: Vec<Buf>,
}

impl Client {
    pub fn new(
        config: Arc<Config>,
        now: SystemTime,
        pake: Option<PakeClientParams>,
        resume: Option<SessionPin>,
    ) -> Self {
        Client {
            state: State::SendClientHello,
            ctx: Context::new(config, Role::Client, now),
            pake,
            resume,
            offered_versions: Vec::new(),
            offered_session_id: SessionId::empty(),
            provers: Vec::new(),
            pake_secret: None,
            pake_confirm: None,
            server_share: None,
            server_chain: Vec::new(),
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

    fn identities(&self) -> (&[u8], &[u8]) {
        match &self.pake {
            Some(p) => (
                p.client_id().unwrap_or_default(),
                p.server_id().unwrap_or_default(),
            ),
            None => (&[], &[]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SendClientHello,
    AwaitServerHello,
    AwaitKeyExchange,
    AwaitCertificate,
    AwaitCertificateVerify,
    AwaitPakeVerify,
    SendKeyExchange,
    SendFinished,
    AwaitFinished,
    Established,
}

impl State {
    fn public(&self, resumed: bool) -> HandshakeState {
        match self {
            State::SendClientHello => HandshakeState::Start,
            State::AwaitServerHello => HandshakeState::ClientHelloSent,
            State::AwaitKeyExchange => HandshakeState::ServerHelloReceived,
            State::AwaitCertificate | State::AwaitPakeVerify => HandshakeState::KeyExchange,
            State::AwaitCertificateVerify => HandshakeState::CertificateReceived,
            State::SendKeyExchange => HandshakeState::Verified,
            State::SendFinished if resumed => HandshakeState::FinishedReceived,
            State::SendFinished => HandshakeState::Verified,
            State::AwaitFinished if resumed => HandshakeState::ServerHelloReceived,
            State::AwaitFinished => HandshakeState::FinishedSent,
            State::Established => HandshakeState::Established,
        }
    }

    fn make_progress(self, client: &mut Client) -> Result<Self, Error> {
        match self {
            State::SendClientHello => self.send_client_hello(client),
            State::AwaitServerHello => self.await_server_hello(client),
            State::AwaitKeyExchange => self.await_key_exchange(client),
            State::AwaitCertificate => self.await_certificate(client),
            State::AwaitCertificateVerify => self.await_certificate_verify(client),
            State::AwaitPakeVerify => self.await_pake_verify(client),
            State::SendKeyExchange => self.send_key_exchange(client),
            State::SendFinished => self.send_finished(client),
            State::AwaitFinished => self.await_finished(client),
            State::Established => Ok(self),
        }
    }

    fn send_client_hello(self, client: &mut Client) -> Result<Self, Error> {
        let config = client.ctx.config().clone();
        let provider = client.ctx.provider().clone();
        client.ctx.client_random = client.ctx.random()?;

        // PAKE runs on TLS 1.3 only.
        client.offered_versions = config
            .versions()
            .iter()
            .copied()
            .filter(|v| client.pake.is_none() || *v == ProtocolVersion::Tls13)
            .collect();
        if client.offered_versions.is_empty() {
            return Err(Error::ConfigError("PAKE requires TLS 1.3".into()));
        }

        // Drop a cached session that this config could not resume anyway.
        if let Some(pin) = &client.resume {
            let s = pin.session();
            let usable = client.offered_versions.contains(&s.protocol_version())
                && config.cipher_suites().contains(&s.cipher_suite())
                && matches!(
                    (s.peer(), client.pake.is_some()),
                    (PeerIdentity::Certificates(_), false) | (PeerIdentity::Pake { .. }, true)
                );
            if !usable {
                debug!("Cached session {:?} not usable with this config", s.id());
                client.resume = None;
            }
        }
        client.offered_session_id = client
            .resume
            .as_ref()
            .map(|p| p.session().id().clone())
            .unwrap_or_default();

        if let Some(params) = &client.pake {
            let (client_id, server_id) = (
                params.client_id().unwrap_or_default(),
                params.server_id().unwrap_or_default(),
            );
            for option in params.options() {
                if !provider.pake_algorithms().iter().any(|a| *a == option.algorithm()) {
                    debug!("Provider lacks PAKE algorithm {}", option.algorithm());
                    continue;
                }
                let prover = provider
                    .start_pake_prover(option, client_id, server_id)
                    .map_err(pake_error)?;
                client.provers.push(prover);
            }
            if client.provers.is_empty() {
                return Err(Error::HandshakeFailure(
                    "no offered PAKE option is supported".into(),
                ));
            }
        }

        let ticket = if config.session_tickets() {
            Some(
                client
                    .resume
                    .as_ref()
                    .and_then(|p| p.session().ticket())
                    .unwrap_or_default(),
            )
        } else {
            None
        };

        let pake = client.pake.as_ref().map(|params| PakeOffer {
            client_id: params.client_id().unwrap_or_default(),
            server_id: params.server_id().unwrap_or_default(),
            shares: client
                .provers
                .iter()
                .map(|p| PakeShare {
                    algorithm: p.algorithm(),
                    share: p.share(),
                })
                .collect(),
        });

        debug!(
            "Sending ClientHello: versions {:?}, {} suites, resume {}, pake {}",
            client.offered_versions,
            config.cipher_suites().len(),
            !client.offered_session_id.is_empty(),
            pake.is_some()
        );

        let max_fragment = u16::try_from(config.max_fragment_length())
            .map_err(|_| Error::ConfigError("max_fragment_length exceeds u16".into()))?;

        let hello = ClientHello {
            random: client.ctx.client_random,
            session_id: client.offered_session_id.clone(),
            versions: client.offered_versions.iter().map(|v| v.as_u16()).collect(),
            cipher_suites: config.cipher_suites().to_vec(),
            max_fragment,
            ticket,
            pake,
        };
        client.ctx.send(Body::ClientHello(hello));

        Ok(State::AwaitServerHello)
    }

    fn await_server_hello(self, client: &mut Client) -> Result<Self, Error> {
        let Some(raw) = client.ctx.next_message(&[MessageType::ServerHello])? else {
            return Ok(self);
        };
        let (_, handshake) = Handshake::parse(&raw)?;
        let Body::ServerHello(hello) = handshake.body else {
            return Err(Error::UnexpectedMessage("expected ServerHello".into()));
        };

        let version = ProtocolVersion::from_u16(hello.version)?;
        if !client.offered_versions.contains(&version) {
            return Err(Error::UnsupportedVersion(hello.version));
        }
        let suite = hello.cipher_suite;
        if !client.ctx.config().cipher_suites().contains(&suite) || !suite.is_valid_for(version) {
            return Err(Error::HandshakeFailure(format!(
                "server selected {:?} for {}",
                suite, version
            )));
        }

        let max_fragment = hello.max_fragment as usize;
        let local = client.ctx.config().max_fragment_length();
        if !(MIN_FRAGMENT_LEN..=local).contains(&max_fragment) {
            return Err(Error::HandshakeFailure(format!(
                "server selected fragment limit {}",
                max_fragment
            )));
        }

        client.ctx.server_random = hello.random;
        client.ctx.set_negotiated(version, suite);
        client.ctx.set_max_fragment(max_fragment);
        client.ctx.received(&raw);

        let resumed = !client.offered_session_id.is_empty()
            && hello.session_id == client.offered_session_id;

        if resumed {
            let Some(pin) = client.resume.as_ref() else {
                return Err(Error::HandshakeFailure("resumed without a session".into()));
            };
            let session = pin.session().clone();
            if session.protocol_version() != version || session.cipher_suite() != suite {
                return Err(Error::HandshakeFailure(
                    "resumed session parameters differ".into(),
                ));
            }
            debug!("Resuming session {:?}", session.id());
            client.ctx.set_peer(session.peer().clone());
            client.ctx.resume_master(&session)?;
            return Ok(State::AwaitFinished);
        }

        if client.resume.take().is_some() {
            debug!("Server declined resumption");
        }
        client.ctx.session.id(hello.session_id.clone());
        debug!("Full handshake: {} {:?}", version, suite);

        Ok(State::AwaitKeyExchange)
    }

    fn await_key_exchange(self, client: &mut Client) -> Result<Self, Error> {
        let Some(raw) = client.ctx.next_message(&[MessageType::KeyExchange])? else {
            return Ok(self);
        };
        let (_, handshake) = Handshake::parse(&raw)?;
        let Body::KeyExchange(kx) = handshake.body else {
            return Err(Error::UnexpectedMessage("expected KeyExchange".into()));
        };
        if kx.pake_confirm.is_some() {
            return Err(Error::MalformedMessage(
                "server KeyExchange carries a PAKE confirmation".into(),
            ));
        }
        client.server_share = Some(kx.public.to_buf());
        client.ctx.received(&raw);

        if client.pake.is_some() {
            Ok(State::AwaitPakeVerify)
        } else {
            Ok(State::AwaitCertificate)
        }
    }

    fn await_certificate(self, client: &mut Client) -> Result<Self, Error> {
        let Some(raw) = client.ctx.next_message(&[MessageType::Certificate])? else {
            return Ok(self);
        };
        let (_, handshake) = Handshake::parse(&raw)?;
        let Body::Certificate(certificate) = handshake.body else {
            return Err(Error::UnexpectedMessage("expected Certificate".into()));
        };
        if certificate.chain.is_empty() {
            return Err(Error::CertificateRejected("empty chain".into()));
        }
        if certificate.chain.len() > MAX_CHAIN_LEN {
            return Err(Error::CertificateRejected(format!(
                "chain of {} certificates",
                certificate.chain.len()
            )));
        }
        for (i, cert) in certificate.chain.iter().enumerate() {
            trace!("Certificate #{} size: {} bytes", i + 1, cert.len());
        }
        client.server_chain = certificate.chain.iter().map(|c| c.to_buf()).collect();
        client.ctx.received(&raw);

        Ok(State::AwaitCertificateVerify)
    }

    fn await_certificate_verify(self, client: &mut Client) -> Result<Self, Error> {
        let Some(raw) = client
            .ctx
            .next_message(&[MessageType::CertificateVerify])?
        else {
            return Ok(self);
        };
        let (_, handshake) = Handshake::parse(&raw)?;
        let Body::CertificateVerify(cv) = handshake.body else {
            return Err(Error::UnexpectedMessage("expected CertificateVerify".into()));
        };

        let leaf = client
            .server_chain
            .first()
            .ok_or_else(|| Error::CertificateRejected("empty chain".into()))?;
        let content = client.ctx.signed_content()?;
        if !client
            .ctx
            .provider()
            .verify_signature(leaf, &content, cv.signature)?
        {
            return Err(Error::BadSignature);
        }
        trace!("Server CertificateVerify verified");

        client
            .ctx
            .config()
            .trust_policy()
            .verify_peer_chain(&client.server_chain)?;

        client.ctx.received(&raw);
        let chain = std::mem::take(&mut client.server_chain);
        client.ctx.set_peer(PeerIdentity::Certificates(chain));

        Ok(State::SendKeyExchange)
    }

    fn await_pake_verify(self, client: &mut Client) -> Result<Self, Error> {
        let Some(raw) = client
            .ctx
            .next_message(&[MessageType::PakeVerify, MessageType::Certificate])?
        else {
            return Ok(self);
        };
        let (_, handshake) = Handshake::parse(&raw)?;
        let verify = match handshake.body {
            Body::PakeVerify(v) => v,
            Body::Certificate(_) => {
                return Err(Error::HandshakeFailure(
                    "server ignored the PAKE offer".into(),
                ))
            }
            _ => return Err(Error::UnexpectedMessage("expected PakeVerify".into())),
        };

        let Some(index) = client
            .provers
            .iter()
            .position(|p| p.algorithm() == verify.algorithm)
        else {
            return Err(Error::HandshakeFailure(format!(
                "server selected PAKE algorithm {} that was not offered",
                verify.algorithm
            )));
        };
        debug!("Server selected PAKE algorithm {}", verify.algorithm);

        let prover = client.provers.swap_remove(index);
        client.provers.clear();
        let outcome = prover
            .finish(verify.share, verify.confirm)
            .map_err(pake_error)?;

        client.pake_secret = Some(Zeroizing::new(outcome.shared_secret));
        client.pake_confirm = Some(outcome.confirm);
        client.ctx.received(&raw);

        let (client_id, server_id) = client.identities();
        let peer = PeerIdentity::Pake {
            client_id: (!client_id.is_empty()).then(|| client_id.to_buf()),
            server_id: (!server_id.is_empty()).then(|| server_id.to_buf()),
        };
        client.ctx.set_peer(peer);

        Ok(State::SendKeyExchange)
    }

    fn send_key_exchange(self, client: &mut Client) -> Result<Self, Error> {
        let server_share = client
            .server_share
            .take()
            .ok_or_else(|| Error::HandshakeFailure("no server key share".into()))?;

        let kx = client.ctx.provider().start_key_exchange()?;
        let public = kx.pub_key().to_buf();
        let shared = Zeroizing::new(kx.complete(&server_share)?);

        client.ctx.send(Body::KeyExchange(KeyExchange::new(
            &public,
            client.pake_confirm.as_deref(),
        )));

        let pre_master = pre_master(&shared, client.pake_secret.as_deref().map(|s| &s[..]));
        client.ctx.derive_from_pre_master(&pre_master)?;
        client.pake_secret = None;

        Ok(State::SendFinished)
    }

    fn send_finished(self, client: &mut Client) -> Result<Self, Error> {
        client.ctx.send_finished()?;

        if client.ctx.is_resumed() {
            complete(client)?;
            Ok(State::Established)
        } else {
            Ok(State::AwaitFinished)
        }
    }

    fn await_finished(self, client: &mut Client) -> Result<Self, Error> {
        let Some(raw) = client
            .ctx
            .next_message(&[MessageType::NewSessionTicket, MessageType::Finished])?
        else {
            return Ok(self);
        };

        if raw.first() == Some(&MessageType::NewSessionTicket.as_u8()) {
            let (_, handshake) = Handshake::parse(&raw)?;
            let Body::NewSessionTicket(nst) = handshake.body else {
                return Err(Error::UnexpectedMessage("expected NewSessionTicket".into()));
            };
            if client.ctx.is_resumed() {
                debug!("Ignoring ticket on resumed session");
            } else {
                debug!(
                    "Received session ticket ({} bytes, lifetime {}s)",
                    nst.ticket.len(),
                    nst.lifetime_secs
                );
                client.ctx.session.ticket(nst.ticket);
            }
            client.ctx.received(&raw);
            return Ok(self);
        }

        client.ctx.verify_finished(&raw)?;

        if client.ctx.is_resumed() {
            Ok(State::SendFinished)
        } else {
            complete(client)?;
            Ok(State::Established)
        }
    }
}

fn complete(client: &mut Client) -> Result<(), Error> {
    let now = client.ctx.now();
    let session = match client.resume.take() {
        Some(pin) if client.ctx.is_resumed() => {
            let session = pin.session().clone();
            session.touch(now);
            session
        }
        _ => {
            let session = client.ctx.freeze_session()?;
            client
                .ctx
                .config()
                .client_session_cache()
                .insert_at(session.clone(), now);
            session
        }
    };
    debug!(
        "Handshake complete; session {:?}, resumed: {}",
        session.id(),
        client.ctx.is_resumed()
    );
    client.ctx.established = Some(session);
    Ok(())
}

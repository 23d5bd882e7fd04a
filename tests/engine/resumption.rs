//! Abbreviated handshakes from the session cache.

use std::sync::Arc;
use std::time::SystemTime;

use pakls::{CertifiedKey, Config, Credential, Engine, PeerIdentity, SessionId};

use crate::common::*;

struct Pair {
    client_config: Arc<Config>,
    server_config: Arc<Config>,
    key: CertifiedKey,
}

impl Pair {
    fn new() -> Pair {
        Pair {
            client_config: config(),
            server_config: config(),
            key: server_key(),
        }
    }

    fn with_configs(client_config: Config, server_config: Config) -> Pair {
        Pair {
            client_config: Arc::new(client_config),
            server_config: Arc::new(server_config),
            key: server_key(),
        }
    }

    fn client(&self) -> Engine {
        Engine::client(self.client_config.clone(), SystemTime::now())
    }

    fn server(&self) -> Engine {
        Engine::server(
            self.server_config.clone(),
            Credential::Certificate(self.key.clone()),
            SystemTime::now(),
        )
        .unwrap()
    }

    /// Full handshake, returning the new session id.
    fn first(&self) -> SessionId {
        let mut client = self.client();
        let mut server = self.server();
        assert_eq!(drive(&mut client, &mut server).unwrap(), 4);
        client.session().unwrap().id().clone()
    }
}

#[test]
fn resume_by_session_id() {
    let _ = env_logger::try_init();

    let pair = Pair::new();
    let id = pair.first();
    let cached = pair.server_config.server_session_cache().lookup(&id).unwrap();

    let mut client = pair.client().with_resumption(&id);
    let mut server = pair.server();
    assert_eq!(drive(&mut client, &mut server).unwrap(), 3);

    assert_eq!(client.session().unwrap().id(), &id);
    assert!(Arc::ptr_eq(server.session().unwrap(), &cached));

    let wire = seal(&mut client, b"resumed").unwrap();
    assert_eq!(feed(&mut server, &wire).unwrap(), b"resumed");
    let wire = seal(&mut server, b"indeed").unwrap();
    assert_eq!(feed(&mut client, &wire).unwrap(), b"indeed");
}

#[test]
fn resume_with_config_shared_by_both_sides() {
    let _ = env_logger::try_init();

    let shared = config();
    let key = server_key();
    let engines = |resume: Option<&SessionId>| {
        let mut client = Engine::client(shared.clone(), SystemTime::now());
        if let Some(id) = resume {
            client = client.with_resumption(id);
        }
        let server = Engine::server(
            shared.clone(),
            Credential::Certificate(key.clone()),
            SystemTime::now(),
        )
        .unwrap();
        (client, server)
    };

    let (mut client, mut server) = engines(None);
    assert_eq!(drive(&mut client, &mut server).unwrap(), 4);
    let id = client.session().unwrap().id().clone();

    let client_side = shared.client_session_cache().lookup(&id).unwrap();
    let server_side = shared.server_session_cache().lookup(&id).unwrap();
    assert!(matches!(client_side.peer(), PeerIdentity::Certificates(_)));
    assert_eq!(server_side.peer(), &PeerIdentity::Anonymous);

    let (mut client, mut server) = engines(Some(&id));
    assert_eq!(drive(&mut client, &mut server).unwrap(), 3);
    assert_eq!(client.session().unwrap().id(), &id);
    assert!(Arc::ptr_eq(server.session().unwrap(), &server_side));
}

#[test]
fn full_handshake_issues_ticket() {
    let _ = env_logger::try_init();

    let pair = Pair::new();
    let id = pair.first();

    let session = pair.client_config.client_session_cache().lookup(&id).unwrap();
    let ticket = session.ticket().expect("ticket");
    assert_eq!(ticket.len(), 32);

    let by_ticket = pair
        .server_config
        .server_session_cache()
        .lookup_ticket(ticket)
        .expect("server knows the ticket");
    assert_eq!(by_ticket.id(), &id);
}

#[test]
fn tickets_can_be_disabled() {
    let _ = env_logger::try_init();

    let pair = Pair::with_configs(
        Config::builder().session_tickets(false).build().unwrap(),
        Config::builder().build().unwrap(),
    );
    let id = pair.first();

    let session = pair.client_config.client_session_cache().lookup(&id).unwrap();
    assert_eq!(session.ticket(), None);

    let mut client = pair.client().with_resumption(&id);
    let mut server = pair.server();
    assert_eq!(drive(&mut client, &mut server).unwrap(), 3);
}

#[test]
fn server_without_session_creation_caches_nothing() {
    let _ = env_logger::try_init();

    let pair = Pair::with_configs(
        Config::builder().build().unwrap(),
        Config::builder()
            .enable_session_creation(false)
            .build()
            .unwrap(),
    );
    let mut client = pair.client();
    let mut server = pair.server();
    drive(&mut client, &mut server).unwrap();

    assert!(client.session().unwrap().id().is_empty());
    assert!(server.session().unwrap().id().is_empty());
    assert!(server.session().unwrap().ticket().is_none());
    assert!(pair.server_config.server_session_cache().is_empty());
    assert!(pair.client_config.client_session_cache().is_empty());
}

#[test]
fn unknown_id_falls_back_to_full_handshake() {
    let _ = env_logger::try_init();

    let pair = Pair::new();
    let unknown = SessionId::try_new(&[7; 32]).unwrap();

    let mut client = pair.client().with_resumption(&unknown);
    let mut server = pair.server();
    assert_eq!(drive(&mut client, &mut server).unwrap(), 4);
    assert_ne!(client.session().unwrap().id(), &unknown);
}

#[test]
fn server_that_forgot_session_runs_full_handshake() {
    let _ = env_logger::try_init();

    let pair = Pair::new();
    let id = pair.first();
    pair.server_config.server_session_cache().remove(&id);

    let mut client = pair.client().with_resumption(&id);
    let mut server = pair.server();
    assert_eq!(drive(&mut client, &mut server).unwrap(), 4);

    let fresh = client.session().unwrap().id().clone();
    assert_ne!(fresh, id);
    assert_eq!(server.session().unwrap().id(), &fresh);
}

#[test]
fn pake_session_resumes() {
    let _ = env_logger::try_init();

    let client_config = config();
    let server_config = config();

    let mut client = pake_client(client_config.clone(), b"A", b"B", b"password-ab");
    let mut server = pake_server(server_config.clone());
    assert_eq!(drive(&mut client, &mut server).unwrap(), 4);
    let id = client.session().unwrap().id().clone();

    let mut client =
        pake_client(client_config, b"A", b"B", b"password-ab").with_resumption(&id);
    let mut server = pake_server(server_config);
    assert_eq!(drive(&mut client, &mut server).unwrap(), 3);
    assert_eq!(server.session().unwrap().id(), &id);
}

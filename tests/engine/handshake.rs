//! Certificate handshakes and parameter negotiation.

use std::sync::Arc;
use std::time::SystemTime;

use pakls::certificate::fingerprint;
use pakls::{
    CipherSuite, Config, Credential, Engine, Error, FingerprintTrustPolicy, HandshakeState,
    HandshakeStatus, PeerIdentity, ProtocolVersion, Status,
};

use crate::common::*;

#[test]
fn certificate_handshake_establishes_both_sides() {
    let _ = env_logger::try_init();

    let (mut client, mut server, key) = cert_pair();
    let flights = drive(&mut client, &mut server).expect("handshake");
    assert_eq!(flights, 4);

    assert!(client.is_established());
    assert!(server.is_established());
    assert_eq!(client.state(), HandshakeState::Established);
    assert_eq!(server.state(), HandshakeState::Established);

    assert_eq!(client.protocol_version(), Some(ProtocolVersion::Tls13));
    assert_eq!(client.protocol_version(), server.protocol_version());
    assert_eq!(client.cipher_suite(), server.cipher_suite());

    let cs = client.session().expect("client session");
    let ss = server.session().expect("server session");
    assert!(!cs.id().is_empty());
    assert_eq!(cs.id(), ss.id());
    assert_eq!(cs.protocol_version(), ss.protocol_version());
    assert_eq!(cs.cipher_suite(), ss.cipher_suite());

    match client.peer_identity() {
        Some(PeerIdentity::Certificates(chain)) => assert_eq!(&chain[0][..], key.leaf()),
        other => panic!("unexpected client peer {:?}", other),
    }
    assert_eq!(server.peer_identity(), Some(&PeerIdentity::Anonymous));
}

#[test]
fn handshake_status_tracks_direction() {
    let _ = env_logger::try_init();

    let (mut client, mut server, _) = cert_pair();
    assert_eq!(client.handshake_status(), HandshakeStatus::NeedWrap);
    assert_eq!(server.handshake_status(), HandshakeStatus::NeedUnwrap);
    assert_eq!(client.state(), HandshakeState::Start);

    let hello = wrap_all(&mut client).unwrap();
    assert!(!hello.is_empty());
    assert_eq!(client.handshake_status(), HandshakeStatus::NeedUnwrap);
    assert_eq!(client.state(), HandshakeState::ClientHelloSent);

    let mut plain = vec![0u8; BUF_LEN];
    let res = server.unwrap(&hello, &mut plain).unwrap();
    assert_eq!(res.status, Status::NeedWrap);
    assert_eq!(res.consumed, hello.len());
    assert_eq!(res.produced, 0);
    assert_eq!(server.handshake_status(), HandshakeStatus::NeedWrap);

    drive(&mut client, &mut server).unwrap();
    assert_eq!(client.handshake_status(), HandshakeStatus::NotHandshaking);
    assert_eq!(server.handshake_status(), HandshakeStatus::NotHandshaking);
}

#[test]
fn wrap_before_established_needs_handshake() {
    let _ = env_logger::try_init();

    let (mut client, _, _) = cert_pair();
    let mut out = vec![0u8; BUF_LEN];
    let res = client.wrap(b"too early", &mut out).unwrap();
    assert_eq!(res.status, Status::NeedHandshake);
    assert_eq!(res.consumed, 0);
    assert!(res.produced > 0, "the ClientHello is flushed");

    let res = client.wrap(b"too early", &mut out).unwrap();
    assert_eq!(res.status, Status::NeedHandshake);
    assert_eq!(res.produced, 0);
}

#[test]
fn tls12_only_client_negotiates_tls12_suite() {
    let _ = env_logger::try_init();

    let client_config = Arc::new(
        Config::builder()
            .versions(&[ProtocolVersion::Tls12])
            .build()
            .unwrap(),
    );
    let mut client = Engine::client(client_config, SystemTime::now());
    let mut server =
        Engine::server(config(), Credential::Certificate(server_key()), SystemTime::now())
            .unwrap();

    drive(&mut client, &mut server).unwrap();
    assert_eq!(server.protocol_version(), Some(ProtocolVersion::Tls12));
    assert_eq!(
        server.cipher_suite(),
        Some(CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256)
    );
}

#[test]
fn server_preference_order_wins() {
    let _ = env_logger::try_init();

    let server_config = Arc::new(
        Config::builder()
            .cipher_suites(&[
                CipherSuite::TLS_AES_256_GCM_SHA384,
                CipherSuite::TLS_AES_128_GCM_SHA256,
            ])
            .build()
            .unwrap(),
    );
    let mut client = Engine::client(config(), SystemTime::now());
    let mut server = Engine::server(
        server_config,
        Credential::Certificate(server_key()),
        SystemTime::now(),
    )
    .unwrap();

    drive(&mut client, &mut server).unwrap();
    assert_eq!(
        client.cipher_suite(),
        Some(CipherSuite::TLS_AES_256_GCM_SHA384)
    );
}

#[test]
fn no_common_suite_fails_on_server() {
    let _ = env_logger::try_init();

    let client_config = Arc::new(
        Config::builder()
            .versions(&[ProtocolVersion::Tls13])
            .cipher_suites(&[CipherSuite::TLS_AES_128_GCM_SHA256])
            .build()
            .unwrap(),
    );
    let server_config = Arc::new(
        Config::builder()
            .cipher_suites(&[CipherSuite::TLS_AES_256_GCM_SHA384])
            .build()
            .unwrap(),
    );
    let mut client = Engine::client(client_config, SystemTime::now());
    let mut server = Engine::server(
        server_config,
        Credential::Certificate(server_key()),
        SystemTime::now(),
    )
    .unwrap();

    match drive_expect_failure(&mut client, &mut server) {
        Failure::Server(Error::HandshakeFailure(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
    let mut plain = vec![0u8; 64];
    assert_eq!(server.unwrap(&[], &mut plain), Err(Error::EngineClosed));
}

#[test]
fn pinned_fingerprint_is_accepted() {
    let _ = env_logger::try_init();

    let key = server_key();
    let policy = FingerprintTrustPolicy::new(vec![fingerprint(key.leaf())]);
    let client_config = Arc::new(
        Config::builder()
            .trust_policy(Arc::new(policy))
            .build()
            .unwrap(),
    );
    let mut client = Engine::client(client_config, SystemTime::now());
    let mut server =
        Engine::server(config(), Credential::Certificate(key), SystemTime::now()).unwrap();

    drive(&mut client, &mut server).unwrap();
}

#[test]
fn unpinned_certificate_is_rejected() {
    let _ = env_logger::try_init();

    let policy = FingerprintTrustPolicy::new(vec![[0u8; 32]]);
    let client_config = Arc::new(
        Config::builder()
            .trust_policy(Arc::new(policy))
            .build()
            .unwrap(),
    );
    let mut client = Engine::client(client_config, SystemTime::now());
    let mut server =
        Engine::server(config(), Credential::Certificate(server_key()), SystemTime::now())
            .unwrap();

    match drive_expect_failure(&mut client, &mut server) {
        Failure::Client(Error::CertificateRejected(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn client_refuses_certificate_credential() {
    let client = Engine::client(config(), SystemTime::now());
    let err = client
        .with_credential(Credential::Certificate(server_key()))
        .unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));
}

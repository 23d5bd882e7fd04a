//! Partial input, failures and renegotiation.

use std::sync::Arc;
use std::time::SystemTime;

use pakls::certificate::fingerprint;
use pakls::{Config, Credential, Engine, Error, FingerprintTrustPolicy, Status};

use crate::common::*;

/// Feed `bytes` one at a time, returning the last status.
fn trickle(engine: &mut Engine, bytes: &[u8], plain: &mut Vec<u8>) -> Status {
    let mut dst = vec![0u8; BUF_LEN];
    let mut last = None;
    for (i, b) in bytes.iter().enumerate() {
        let res = engine.unwrap(std::slice::from_ref(b), &mut dst).unwrap();
        assert_eq!(res.consumed, 1);
        plain.extend_from_slice(&dst[..res.produced]);
        if i + 1 < bytes.len() {
            assert_eq!(res.status, Status::Incomplete, "byte {}", i);
        }
        last = Some(res.status);
    }
    last.expect("at least one byte")
}

#[test]
fn byte_at_a_time_handshake_record() {
    let _ = env_logger::try_init();

    let (mut client, mut server, _) = cert_pair();
    let hello = wrap_all(&mut client).unwrap();

    let mut plain = Vec::new();
    assert_eq!(trickle(&mut server, &hello, &mut plain), Status::NeedWrap);
    assert!(plain.is_empty());

    // The rest of the handshake is unaffected.
    let flight = wrap_all(&mut server).unwrap();
    feed(&mut client, &flight).unwrap();
    drive(&mut client, &mut server).unwrap();
}

#[test]
fn byte_at_a_time_application_data() {
    let _ = env_logger::try_init();

    let (mut client, mut server, _) = cert_pair();
    drive(&mut client, &mut server).unwrap();

    let wire = seal(&mut client, b"slowly").unwrap();
    let mut plain = Vec::new();
    assert_eq!(trickle(&mut server, &wire, &mut plain), Status::Ok);
    assert_eq!(plain, b"slowly");
}

#[test]
fn failed_decryption_closes_engine() {
    let _ = env_logger::try_init();

    let server_config = Arc::new(
        Config::builder()
            .with_crypto_provider(Arc::new(FailingOpenProvider::default()))
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

    let wire = seal(&mut client, b"never read").unwrap();
    assert_eq!(feed(&mut server, &wire), Err(Error::AuthFailure));

    let mut buf = vec![0u8; 64];
    assert_eq!(server.wrap(b"x", &mut buf), Err(Error::EngineClosed));
    assert_eq!(server.unwrap(&wire, &mut buf), Err(Error::EngineClosed));
    assert!(!server.is_established());
}

#[test]
fn tampered_record_fails_authentication() {
    let _ = env_logger::try_init();

    let (mut client, mut server, _) = cert_pair();
    drive(&mut client, &mut server).unwrap();

    let mut wire = seal(&mut client, b"integrity").unwrap();
    let last = wire.len() - 1;
    wire[last] ^= 0x01;
    assert_eq!(feed(&mut server, &wire), Err(Error::AuthFailure));
}

#[test]
fn client_renegotiation_refused_by_policy() {
    let _ = env_logger::try_init();

    let (mut client, mut server, _) = cert_pair();
    drive(&mut client, &mut server).unwrap();

    assert_eq!(client.renegotiate(), Err(Error::RenegotiationRefused));
    assert!(client.is_established());

    // The refusal is local: the connection keeps working both ways.
    let wire = seal(&mut client, b"still here").unwrap();
    assert_eq!(feed(&mut server, &wire).unwrap(), b"still here");
    let wire = seal(&mut server, b"so am i").unwrap();
    assert_eq!(feed(&mut client, &wire).unwrap(), b"so am i");
    assert_eq!(client.renegotiate(), Err(Error::RenegotiationRefused));
}

fn renegotiating_client(key: &pakls::CertifiedKey) -> Engine {
    let policy =
        FingerprintTrustPolicy::new(vec![fingerprint(key.leaf())]).allow_renegotiation(true);
    let config = Arc::new(
        Config::builder()
            .trust_policy(Arc::new(policy))
            .build()
            .unwrap(),
    );
    Engine::client(config, SystemTime::now())
}

#[test]
fn server_refuses_peer_renegotiation() {
    let _ = env_logger::try_init();

    let key = server_key();
    let mut client = renegotiating_client(&key);
    let mut server =
        Engine::server(config(), Credential::Certificate(key), SystemTime::now()).unwrap();
    drive(&mut client, &mut server).unwrap();

    client.renegotiate().unwrap();
    assert!(!client.is_established());
    let hello = wrap_all(&mut client).unwrap();
    assert_eq!(feed(&mut server, &hello), Err(Error::RenegotiationRefused));
}

#[test]
fn renegotiation_creates_new_session() {
    let _ = env_logger::try_init();

    let key = server_key();
    let mut client = renegotiating_client(&key);
    let server_policy = FingerprintTrustPolicy::new(vec![]).allow_renegotiation(true);
    let server_config = Arc::new(
        Config::builder()
            .trust_policy(Arc::new(server_policy))
            .build()
            .unwrap(),
    );
    let mut server =
        Engine::server(server_config, Credential::Certificate(key), SystemTime::now()).unwrap();

    drive(&mut client, &mut server).unwrap();
    let first = client.session().unwrap().id().clone();

    client.renegotiate().unwrap();
    drive(&mut client, &mut server).unwrap();

    let second = client.session().unwrap().id().clone();
    assert_ne!(first, second);
    assert_eq!(server.session().unwrap().id(), &second);

    let wire = seal(&mut client, b"after renegotiation").unwrap();
    assert_eq!(feed(&mut server, &wire).unwrap(), b"after renegotiation");
}

#[test]
fn server_cannot_start_renegotiation() {
    let _ = env_logger::try_init();

    let (mut client, mut server, _) = cert_pair();
    drive(&mut client, &mut server).unwrap();

    assert!(matches!(server.renegotiate(), Err(Error::ConfigError(_))));
    let wire = seal(&mut server, b"still fine").unwrap();
    assert_eq!(feed(&mut client, &wire).unwrap(), b"still fine");
}

#[test]
fn client_hello_sent_to_client_is_unexpected() {
    let _ = env_logger::try_init();

    let mut other = Engine::client(config(), SystemTime::now());
    let hello = wrap_all(&mut other).unwrap();

    let mut client = Engine::client(config(), SystemTime::now());
    wrap_all(&mut client).unwrap();
    assert!(matches!(
        feed(&mut client, &hello),
        Err(Error::UnexpectedMessage(_))
    ));
}

#[test]
fn wrong_record_version_is_malformed() {
    let _ = env_logger::try_init();

    let (_, mut server, _) = cert_pair();
    let mut plain = vec![0u8; 64];
    let res = server.unwrap(&[22, 3, 1, 0, 1, 0], &mut plain);
    assert!(matches!(res, Err(Error::MalformedRecord(_))));
}

#[test]
fn fatal_alert_surfaces_code() {
    let _ = env_logger::try_init();

    let (_, mut server, _) = cert_pair();
    let mut plain = vec![0u8; 64];
    let res = server.unwrap(&[21, 3, 3, 0, 2, 2, 40], &mut plain);
    assert_eq!(res, Err(Error::PeerAlert(40)));
    assert_eq!(server.unwrap(&[], &mut plain), Err(Error::EngineClosed));
}

#[test]
fn close_notify_during_handshake() {
    let _ = env_logger::try_init();

    let (mut client, mut server, _) = cert_pair();
    let hello = wrap_all(&mut client).unwrap();
    feed(&mut server, &hello).unwrap();

    let mut plain = vec![0u8; 64];
    let res = client.unwrap(&[21, 3, 3, 0, 2, 1, 0], &mut plain).unwrap();
    assert_eq!(res.status, Status::Closed);

    let reply = wrap_all(&mut client).unwrap();
    assert_eq!(reply, [21, 3, 3, 0, 2, 1, 0]);
    assert!(!client.is_established());
}

#[test]
fn close_during_handshake_abandons_it() {
    let _ = env_logger::try_init();

    let (mut client, _, _) = cert_pair();
    wrap_all(&mut client).unwrap();
    client.close();

    let mut out = vec![0u8; 64];
    let res = client.wrap(&[], &mut out).unwrap();
    assert_eq!(res.status, Status::Closed);
    assert_eq!(res.produced, 0);
}

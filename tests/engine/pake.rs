//! SPAKE2+ authenticated handshakes.

use std::sync::Arc;
use std::time::SystemTime;

use pakls::{
    Buf, Config, Credential, Engine, Error, Link, PakeClientParams, PakeCredential,
    PakeServerParams, PeerIdentity, ProtocolVersion, Status,
};

use crate::common::*;

#[test]
fn matching_link_establishes() {
    let _ = env_logger::try_init();

    let mut client = pake_client(config(), b"A", b"B", b"password-ab");
    let mut server = pake_server(config());

    let flights = drive(&mut client, &mut server).unwrap();
    assert_eq!(flights, 4);
    assert_eq!(client.protocol_version(), Some(ProtocolVersion::Tls13));

    let expected = PeerIdentity::Pake {
        client_id: Some(Buf::from_slice(b"A")),
        server_id: Some(Buf::from_slice(b"B")),
    };
    assert_eq!(client.peer_identity(), Some(&expected));
    assert_eq!(server.peer_identity(), Some(&expected));

    let wire = seal(&mut client, b"hello over pake").unwrap();
    assert_eq!(feed(&mut server, &wire).unwrap(), b"hello over pake");
}

#[test]
fn second_link_uses_its_own_password() {
    let _ = env_logger::try_init();

    let mut client = pake_client(config(), b"C", b"D", b"password-cd");
    let mut server = pake_server(config());
    drive(&mut client, &mut server).unwrap();
}

#[test]
fn unknown_identities_find_no_option() {
    let _ = env_logger::try_init();

    let mut client = pake_client(config(), b"X", b"Y", b"password-ab");
    let mut server = pake_server(config());

    match drive_expect_failure(&mut client, &mut server) {
        Failure::Server(Error::NoMatchingPakeOption) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn wrong_password_fails_authentication() {
    let _ = env_logger::try_init();

    let mut client = pake_client(config(), b"A", b"B", b"password-cd");
    let mut server = pake_server(config());

    match drive_expect_failure(&mut client, &mut server) {
        Failure::Client(Error::PakeAuthFailure) => {}
        other => panic!("unexpected {:?}", other),
    }
    let mut out = vec![0u8; 64];
    assert_eq!(client.wrap(&[], &mut out), Err(Error::EngineClosed));
}

#[test]
fn wildcard_link_accepts_any_identities() {
    let _ = env_logger::try_init();

    let params = PakeServerParams::builder()
        .link(
            Link::wildcard(),
            vec![registered_option(b"shared", b"X", b"Y")],
        )
        .build()
        .unwrap();
    let mut server = Engine::server(
        config(),
        Credential::Pake(PakeCredential::Server(params)),
        SystemTime::now(),
    )
    .unwrap();
    let mut client = pake_client(config(), b"X", b"Y", b"shared");

    drive(&mut client, &mut server).unwrap();
}

#[test]
fn exact_link_wins_over_wildcard() {
    let _ = env_logger::try_init();

    let params = PakeServerParams::builder()
        .link(
            Link::wildcard(),
            vec![registered_option(b"fallback", b"A", b"B")],
        )
        .link(
            Link::new(Some(&b"A"[..]), Some(&b"B"[..])),
            vec![registered_option(b"exact", b"A", b"B")],
        )
        .build()
        .unwrap();
    let mut server = Engine::server(
        config(),
        Credential::Pake(PakeCredential::Server(params)),
        SystemTime::now(),
    )
    .unwrap();
    let mut client = pake_client(config(), b"A", b"B", b"exact");

    drive(&mut client, &mut server).unwrap();
}

#[test]
fn pake_client_against_certificate_server() {
    let _ = env_logger::try_init();

    let mut client = pake_client(config(), b"A", b"B", b"password-ab");
    let mut server =
        Engine::server(config(), Credential::Certificate(server_key()), SystemTime::now())
            .unwrap();

    match drive_expect_failure(&mut client, &mut server) {
        Failure::Client(Error::HandshakeFailure(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn certificate_client_against_pake_server() {
    let _ = env_logger::try_init();

    let mut client = Engine::client(config(), SystemTime::now());
    let mut server = pake_server(config());

    match drive_expect_failure(&mut client, &mut server) {
        Failure::Server(Error::HandshakeFailure(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn pake_requires_tls13() {
    let tls12 = Arc::new(
        Config::builder()
            .versions(&[ProtocolVersion::Tls12])
            .build()
            .unwrap(),
    );
    let params = PakeClientParams::new(
        Some(&b"A"[..]),
        Some(&b"B"[..]),
        vec![password_option(b"password-ab")],
    )
    .unwrap();
    let err = Engine::client(tls12, SystemTime::now())
        .with_credential(Credential::Pake(PakeCredential::Client(params)))
        .unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));
}

#[test]
fn small_fragments_split_application_data() {
    let _ = env_logger::try_init();

    let small = || {
        Arc::new(
            Config::builder()
                .max_fragment_length(512)
                .build()
                .unwrap(),
        )
    };
    let mut client = pake_client(small(), b"A", b"B", b"password-ab");
    let mut server = pake_server(small());
    drive(&mut client, &mut server).unwrap();

    let data: Vec<u8> = (0..2000u32).map(|i| i as u8).collect();
    let wire = seal(&mut client, &data).unwrap();

    let mut records = 0;
    let mut rest = &wire[..];
    while !rest.is_empty() {
        let len = u16::from_be_bytes([rest[3], rest[4]]) as usize;
        assert!(len <= 512 + 16, "record of {} bytes", len);
        rest = &rest[5 + len..];
        records += 1;
    }
    assert_eq!(records, 4);

    let mut plain = vec![0u8; BUF_LEN];
    let res = server.unwrap(&wire, &mut plain).unwrap();
    assert_eq!(res.status, Status::Ok);
    assert_eq!(&plain[..res.produced], &data[..]);
}

/// Lengths of the records in `wire`.
fn record_lengths(wire: &[u8]) -> Vec<usize> {
    let mut lens = Vec::new();
    let mut rest = wire;
    while !rest.is_empty() {
        let len = u16::from_be_bytes([rest[3], rest[4]]) as usize;
        lens.push(len);
        rest = &rest[5 + len..];
    }
    lens
}

#[test]
fn mismatched_fragment_limits_use_the_smaller() {
    let _ = env_logger::try_init();

    let small = Arc::new(
        Config::builder()
            .max_fragment_length(1024)
            .build()
            .unwrap(),
    );
    let mut client = pake_client(config(), b"A", b"B", b"password-ab");
    let mut server = pake_server(small);
    drive(&mut client, &mut server).unwrap();

    let data: Vec<u8> = (0..4000u32).map(|i| i as u8).collect();
    let wire = seal(&mut client, &data).unwrap();
    let lens = record_lengths(&wire);
    assert_eq!(lens.len(), 4);
    assert!(lens.iter().all(|l| *l <= 1024 + 16), "records {:?}", lens);
    assert_eq!(feed(&mut server, &wire).unwrap(), data);

    let wire = seal(&mut server, &data).unwrap();
    assert!(record_lengths(&wire).iter().all(|l| *l <= 1024 + 16));
    assert_eq!(feed(&mut client, &wire).unwrap(), data);
}

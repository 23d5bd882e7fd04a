//! Application data and graceful close on an established connection.

use pakls::Status;

use crate::common::*;

fn established() -> (pakls::Engine, pakls::Engine) {
    let (mut client, mut server, _) = cert_pair();
    drive(&mut client, &mut server).expect("handshake");
    (client, server)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn large_payload_round_trip() {
    let _ = env_logger::try_init();

    let (mut client, mut server) = established();

    let data = pattern(40_000);
    let wire = seal(&mut client, &data).unwrap();
    assert!(wire.len() > data.len());
    assert_eq!(feed(&mut server, &wire).unwrap(), data);

    let reply: Vec<u8> = data.iter().rev().copied().collect();
    let wire = seal(&mut server, &reply).unwrap();
    assert_eq!(feed(&mut client, &wire).unwrap(), reply);
}

#[test]
fn small_unwrap_buffer_holds_remainder() {
    let _ = env_logger::try_init();

    let (mut client, mut server) = established();
    let data = pattern(100);
    let wire = seal(&mut client, &data).unwrap();

    let mut small = [0u8; 10];
    let res = server.unwrap(&wire, &mut small).unwrap();
    assert_eq!(res.status, Status::BufferOverflow);
    assert_eq!(res.consumed, wire.len());
    assert_eq!(res.produced, 10);
    assert_eq!(&small[..], &data[..10]);

    let mut rest = [0u8; 200];
    let res = server.unwrap(&[], &mut rest).unwrap();
    assert_eq!(res.status, Status::Ok);
    assert_eq!(res.consumed, 0);
    assert_eq!(res.produced, 90);
    assert_eq!(&rest[..90], &data[10..]);
}

#[test]
fn small_wrap_buffer_overflows_without_consuming() {
    let _ = env_logger::try_init();

    let (mut client, _) = established();
    let mut tiny = [0u8; 10];
    let res = client.wrap(&pattern(100), &mut tiny).unwrap();
    assert_eq!(res.status, Status::BufferOverflow);
    assert_eq!(res.consumed, 0);
    assert_eq!(res.produced, 0);

    // Still usable with a larger buffer.
    let mut out = vec![0u8; BUF_LEN];
    let res = client.wrap(&pattern(100), &mut out).unwrap();
    assert_eq!(res.status, Status::Ok);
    assert_eq!(res.consumed, 100);
}

#[test]
fn empty_unwrap_is_incomplete() {
    let _ = env_logger::try_init();

    let (_, mut server) = established();
    let mut plain = [0u8; 64];
    let res = server.unwrap(&[], &mut plain).unwrap();
    assert_eq!(res.status, Status::Incomplete);
    assert_eq!(res.produced, 0);
}

#[test]
fn close_sends_one_alert_and_peer_replies() {
    let _ = env_logger::try_init();

    let (mut client, mut server) = established();
    client.close();
    client.close();

    let alert = wrap_all(&mut client).unwrap();
    // header + 2 byte alert + tag
    assert_eq!(alert.len(), 23);
    assert!(!client.is_established());

    let mut out = vec![0u8; 64];
    let res = client.wrap(b"after close", &mut out).unwrap();
    assert_eq!(res.status, Status::Closed);
    assert_eq!(res.consumed, 0);
    assert_eq!(res.produced, 0);

    let mut plain = vec![0u8; 64];
    let res = server.unwrap(&alert, &mut plain).unwrap();
    assert_eq!(res.status, Status::Closed);
    assert_eq!(res.consumed, alert.len());

    let reply = wrap_all(&mut server).unwrap();
    assert_eq!(reply.len(), 23);

    let res = client.unwrap(&reply, &mut plain).unwrap();
    assert_eq!(res.status, Status::Closed);
}

#[test]
fn data_before_close_is_delivered() {
    let _ = env_logger::try_init();

    let (mut client, mut server) = established();
    let mut wire = seal(&mut client, b"last words").unwrap();
    client.close();
    wire.extend(wrap_all(&mut client).unwrap());

    let mut plain = vec![0u8; 64];
    let res = server.unwrap(&wire, &mut plain).unwrap();
    assert_eq!(res.status, Status::Closed);
    assert_eq!(&plain[..res.produced], b"last words");
}

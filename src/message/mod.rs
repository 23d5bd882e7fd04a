//! Handshake and alert message codecs.
//!
//! Every handshake message travels alone in one record as
//! `msg_type(1) | length(3) | body`. Parsers borrow from the record payload;
//! serializers append big-endian fields to a [`Buf`].

mod alert;
mod certificate;
mod certificate_verify;
mod client_hello;
mod finished;
mod key_exchange;
mod new_session_ticket;
mod pake_verify;
mod server_hello;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use certificate::{Certificate, MAX_CHAIN_BYTES, MAX_CHAIN_LEN};
pub use certificate_verify::CertificateVerify;
pub use client_hello::{ClientHello, PakeOffer, PakeShare};
pub use finished::Finished;
pub use key_exchange::KeyExchange;
pub use new_session_ticket::NewSessionTicket;
pub use pake_verify::PakeVerify;
pub use server_hello::ServerHello;

use nom::bytes::complete::take;
use nom::combinator::{all_consuming, map_res};
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use crate::buffer::Buf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    ClientHello,
    ServerHello,
    NewSessionTicket,
    Certificate,
    CertificateVerify,
    KeyExchange,
    Finished,
    PakeVerify,
    Unknown(u8),
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => MessageType::ClientHello,
            2 => MessageType::ServerHello,
            4 => MessageType::NewSessionTicket,
            11 => MessageType::Certificate,
            15 => MessageType::CertificateVerify,
            16 => MessageType::KeyExchange,
            20 => MessageType::Finished,
            30 => MessageType::PakeVerify,
            _ => MessageType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::ClientHello => 1,
            MessageType::ServerHello => 2,
            MessageType::NewSessionTicket => 4,
            MessageType::Certificate => 11,
            MessageType::CertificateVerify => 15,
            MessageType::KeyExchange => 16,
            MessageType::Finished => 20,
            MessageType::PakeVerify => 30,
            MessageType::Unknown(value) => *value,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Body<'a> {
    ClientHello(ClientHello<'a>),
    ServerHello(ServerHello<'a>),
    NewSessionTicket(NewSessionTicket<'a>),
    Certificate(Certificate<'a>),
    CertificateVerify(CertificateVerify<'a>),
    KeyExchange(KeyExchange<'a>),
    Finished(Finished<'a>),
    PakeVerify(PakeVerify<'a>),
}

impl<'a> Body<'a> {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Body::ClientHello(_) => MessageType::ClientHello,
            Body::ServerHello(_) => MessageType::ServerHello,
            Body::NewSessionTicket(_) => MessageType::NewSessionTicket,
            Body::Certificate(_) => MessageType::Certificate,
            Body::CertificateVerify(_) => MessageType::CertificateVerify,
            Body::KeyExchange(_) => MessageType::KeyExchange,
            Body::Finished(_) => MessageType::Finished,
            Body::PakeVerify(_) => MessageType::PakeVerify,
        }
    }

    fn parse(input: &'a [u8], msg_type: MessageType) -> IResult<&'a [u8], Body<'a>> {
        match msg_type {
            MessageType::ClientHello => {
                let (input, m) = ClientHello::parse(input)?;
                Ok((input, Body::ClientHello(m)))
            }
            MessageType::ServerHello => {
                let (input, m) = ServerHello::parse(input)?;
                Ok((input, Body::ServerHello(m)))
            }
            MessageType::NewSessionTicket => {
                let (input, m) = NewSessionTicket::parse(input)?;
                Ok((input, Body::NewSessionTicket(m)))
            }
            MessageType::Certificate => {
                let (input, m) = Certificate::parse(input)?;
                Ok((input, Body::Certificate(m)))
            }
            MessageType::CertificateVerify => {
                let (input, m) = CertificateVerify::parse(input)?;
                Ok((input, Body::CertificateVerify(m)))
            }
            MessageType::KeyExchange => {
                let (input, m) = KeyExchange::parse(input)?;
                Ok((input, Body::KeyExchange(m)))
            }
            MessageType::Finished => {
                let (input, m) = Finished::parse(input)?;
                Ok((input, Body::Finished(m)))
            }
            MessageType::PakeVerify => {
                let (input, m) = PakeVerify::parse(input)?;
                Ok((input, Body::PakeVerify(m)))
            }
            MessageType::Unknown(_) => Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Switch,
            ))),
        }
    }

    fn serialize(&self, output: &mut Buf) {
        match self {
            Body::ClientHello(m) => m.serialize(output),
            Body::ServerHello(m) => m.serialize(output),
            Body::NewSessionTicket(m) => m.serialize(output),
            Body::Certificate(m) => m.serialize(output),
            Body::CertificateVerify(m) => m.serialize(output),
            Body::KeyExchange(m) => m.serialize(output),
            Body::Finished(m) => m.serialize(output),
            Body::PakeVerify(m) => m.serialize(output),
        }
    }
}

/// One complete handshake message.
#[derive(Debug, PartialEq, Eq)]
pub struct Handshake<'a> {
    pub body: Body<'a>,
}

impl<'a> Handshake<'a> {
    pub fn new(body: Body<'a>) -> Self {
        Handshake { body }
    }

    /// Parse exactly one message. Trailing bytes in the record are an error.
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Handshake<'a>> {
        let (input, msg_type) = be_u8(input)?;
        let (input, length) = be_u24(input)?;
        let (input, body_bytes) = take(length as usize)(input)?;
        let msg_type = MessageType::from_u8(msg_type);
        let (_, body) = all_consuming(|i: &'a [u8]| Body::parse(i, msg_type))(body_bytes)?;
        let (input, _) = nom::combinator::eof(input)?;
        Ok((input, Handshake { body }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        let start = output.len();
        output.push(self.body.msg_type().as_u8());
        output.extend_from_slice(&[0, 0, 0]);
        self.body.serialize(output);
        let len = (output.len() - start - 4) as u32;
        output[start + 1..start + 4].copy_from_slice(&len.to_be_bytes()[1..]);
    }
}

// ============================================================================
// Length-prefixed field helpers
// ============================================================================

pub(crate) fn u8_prefixed(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u8(input)?;
    take(len as usize)(input)
}

pub(crate) fn u16_prefixed(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u16(input)?;
    take(len as usize)(input)
}

pub(crate) fn u24_prefixed(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u24(input)?;
    take(len as usize)(input)
}

pub(crate) fn u8_prefixed_str(input: &[u8]) -> IResult<&[u8], &str> {
    map_res(u8_prefixed, std::str::from_utf8)(input)
}

/// Optional field: a presence byte followed by the value.
pub(crate) fn optional<'a, T>(
    f: impl FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], Option<T>> {
    let mut f = f;
    move |input| {
        let (input, present) = be_u8(input)?;
        match present {
            0 => Ok((input, None)),
            1 => {
                let (input, v) = f(input)?;
                Ok((input, Some(v)))
            }
            _ => Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Verify,
            ))),
        }
    }
}

// Lengths are bounded where values enter the crate: credential and config
// validation, or the parser that produced them.

pub(crate) fn put_u8_prefixed(output: &mut Buf, data: &[u8]) {
    debug_assert!(data.len() <= u8::MAX as usize);
    output.push(data.len() as u8);
    output.extend_from_slice(data);
}

pub(crate) fn put_u16_prefixed(output: &mut Buf, data: &[u8]) {
    debug_assert!(data.len() <= u16::MAX as usize);
    output.extend_from_slice(&(data.len() as u16).to_be_bytes());
    output.extend_from_slice(data);
}

pub(crate) fn put_u24_prefixed(output: &mut Buf, data: &[u8]) {
    debug_assert!(data.len() <= 0xff_ffff);
    output.extend_from_slice(&(data.len() as u32).to_be_bytes()[1..]);
    output.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_length_is_patched() {
        let mut out = Buf::new();
        Handshake::new(Body::Finished(Finished::new(&[7; 32]))).serialize(&mut out);
        assert_eq!(&out[..4], &[20, 0, 0, 33]);

        let (_, parsed) = Handshake::parse(&out).unwrap();
        assert_eq!(parsed.body.msg_type(), MessageType::Finished);
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut out = Buf::new();
        Handshake::new(Body::Finished(Finished::new(&[7; 32]))).serialize(&mut out);
        out.push(0);
        assert!(Handshake::parse(&out).is_err());
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(Handshake::parse(&[99, 0, 0, 1, 0]).is_err());
    }

    #[test]
    fn optional_rejects_bad_flag() {
        let mut p = optional(u8_prefixed);
        assert_eq!(p(&[0]).unwrap().1, None);
        assert_eq!(p(&[1, 1, 9]).unwrap().1, Some(&[9u8][..]));
        assert!(p(&[2]).is_err());
    }
}

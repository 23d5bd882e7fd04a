use nom::combinator::all_consuming;
use nom::multi::{count, length_value, many0};
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::{optional, put_u16_prefixed, put_u8_prefixed, u16_prefixed, u8_prefixed_str};
use crate::buffer::Buf;
use crate::types::{CipherSuite, Random, SessionId};

/// One PAKE share offered by the client, tagged with its algorithm.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct PakeShare<'a> {
    pub algorithm: &'a str,
    pub share: &'a [u8],
}

/// PAKE offer: identities plus one share per option in client preference order.
///
/// Absent identities are sent as empty byte strings.
#[derive(Debug, PartialEq, Eq)]
pub struct PakeOffer<'a> {
    pub client_id: &'a [u8],
    pub server_id: &'a [u8],
    pub shares: Vec<PakeShare<'a>>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ClientHello<'a> {
    pub random: Random,
    pub session_id: SessionId,
    /// Raw version codes in client preference order.
    pub versions: Vec<u16>,
    pub cipher_suites: Vec<CipherSuite>,
    /// Largest record plaintext the client accepts.
    pub max_fragment: u16,
    /// `None` when the client does not support tickets, `Some(&[])` when it
    /// does but holds none.
    pub ticket: Option<&'a [u8]>,
    pub pake: Option<PakeOffer<'a>>,
}

impl<'a> ClientHello<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ClientHello<'a>> {
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, n) = be_u8(input)?;
        let (input, versions) = count(be_u16, n as usize)(input)?;
        let (input, cipher_suites) =
            length_value(be_u16, all_consuming(many0(CipherSuite::parse)))(input)?;
        let (input, max_fragment) = be_u16(input)?;
        let (input, ticket) = optional(u16_prefixed)(input)?;
        let (input, pake) = optional(PakeOffer::parse)(input)?;

        Ok((
            input,
            ClientHello {
                random,
                session_id,
                versions,
                cipher_suites,
                max_fragment,
                ticket,
                pake,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.random.0);
        output.push(self.session_id.len() as u8);
        output.extend_from_slice(self.session_id.as_slice());

        output.push(self.versions.len() as u8);
        for v in &self.versions {
            output.extend_from_slice(&v.to_be_bytes());
        }

        output.extend_from_slice(&((self.cipher_suites.len() * 2) as u16).to_be_bytes());
        for cs in &self.cipher_suites {
            output.extend_from_slice(&cs.as_u16().to_be_bytes());
        }
        output.extend_from_slice(&self.max_fragment.to_be_bytes());

        match self.ticket {
            None => output.push(0),
            Some(t) => {
                output.push(1);
                put_u16_prefixed(output, t);
            }
        }

        match &self.pake {
            None => output.push(0),
            Some(offer) => {
                output.push(1);
                offer.serialize(output);
            }
        }
    }
}

impl<'a> PakeOffer<'a> {
    fn parse(input: &'a [u8]) -> IResult<&'a [u8], PakeOffer<'a>> {
        let (input, client_id) = u16_prefixed(input)?;
        let (input, server_id) = u16_prefixed(input)?;
        let (input, n) = be_u8(input)?;
        let (input, shares) = count(PakeShare::parse, n as usize)(input)?;
        Ok((
            input,
            PakeOffer {
                client_id,
                server_id,
                shares,
            },
        ))
    }

    fn serialize(&self, output: &mut Buf) {
        put_u16_prefixed(output, self.client_id);
        put_u16_prefixed(output, self.server_id);
        output.push(self.shares.len() as u8);
        for s in &self.shares {
            put_u8_prefixed(output, s.algorithm.as_bytes());
            put_u16_prefixed(output, s.share);
        }
    }
}

impl<'a> PakeShare<'a> {
    fn parse(input: &'a [u8]) -> IResult<&'a [u8], PakeShare<'a>> {
        let (input, algorithm) = u8_prefixed_str(input)?;
        let (input, share) = u16_prefixed(input)?;
        Ok((input, PakeShare { algorithm, share }))
    }
}

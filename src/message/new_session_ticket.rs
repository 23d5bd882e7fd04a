use nom::number::complete::be_u32;
use nom::IResult;

use super::{put_u16_prefixed, u16_prefixed};
use crate::buffer::Buf;

/// Opaque resumption ticket issued by the server before its Finished.
#[derive(Debug, PartialEq, Eq)]
pub struct NewSessionTicket<'a> {
    pub lifetime_secs: u32,
    pub ticket: &'a [u8],
}

impl<'a> NewSessionTicket<'a> {
    pub fn new(lifetime_secs: u32, ticket: &'a [u8]) -> Self {
        NewSessionTicket {
            lifetime_secs,
            ticket,
        }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], NewSessionTicket<'a>> {
        let (input, lifetime_secs) = be_u32(input)?;
        let (input, ticket) = u16_prefixed(input)?;
        Ok((
            input,
            NewSessionTicket {
                lifetime_secs,
                ticket,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.lifetime_secs.to_be_bytes());
        put_u16_prefixed(output, self.ticket);
    }
}

use nom::combinator::all_consuming;
use nom::multi::{length_value, many0};
use nom::number::complete::be_u24;
use nom::IResult;

use super::{put_u24_prefixed, u24_prefixed};
use crate::buffer::Buf;

/// Most certificates a chain may carry, so the count fits one byte at rest.
pub const MAX_CHAIN_LEN: usize = u8::MAX as usize;

/// Largest encoded chain, bounded by the 24 bit length prefix.
pub const MAX_CHAIN_BYTES: usize = 0xff_ffff;

/// Certificate chain, leaf first.
#[derive(Debug, PartialEq, Eq)]
pub struct Certificate<'a> {
    pub chain: Vec<&'a [u8]>,
}

impl<'a> Certificate<'a> {
    pub fn new(chain: Vec<&'a [u8]>) -> Self {
        Certificate { chain }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Certificate<'a>> {
        let (input, chain) = length_value(be_u24, all_consuming(many0(u24_prefixed)))(input)?;
        Ok((input, Certificate { chain }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        let total: usize = self.chain.iter().map(|c| 3 + c.len()).sum();
        output.extend_from_slice(&(total as u32).to_be_bytes()[1..]);
        for cert in &self.chain {
            put_u24_prefixed(output, cert);
        }
    }
}

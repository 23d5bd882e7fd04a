use nom::IResult;

use super::{optional, put_u16_prefixed, u16_prefixed};
use crate::buffer::Buf;

/// Ephemeral key share. The client's copy also carries its PAKE confirmation.
#[derive(Debug, PartialEq, Eq)]
pub struct KeyExchange<'a> {
    pub public: &'a [u8],
    pub pake_confirm: Option<&'a [u8]>,
}

impl<'a> KeyExchange<'a> {
    pub fn new(public: &'a [u8], pake_confirm: Option<&'a [u8]>) -> Self {
        KeyExchange {
            public,
            pake_confirm,
        }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], KeyExchange<'a>> {
        let (input, public) = u16_prefixed(input)?;
        let (input, pake_confirm) = optional(u16_prefixed)(input)?;
        Ok((
            input,
            KeyExchange {
                public,
                pake_confirm,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        put_u16_prefixed(output, self.public);
        match self.pake_confirm {
            None => output.push(0),
            Some(c) => {
                output.push(1);
                put_u16_prefixed(output, c);
            }
        }
    }
}

use nom::IResult;

use super::{put_u8_prefixed, u8_prefixed};
use crate::buffer::Buf;

#[derive(Debug, PartialEq, Eq)]
pub struct Finished<'a> {
    pub verify_data: &'a [u8],
}

impl<'a> Finished<'a> {
    pub fn new(verify_data: &'a [u8]) -> Self {
        Finished { verify_data }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Finished<'a>> {
        let (input, verify_data) = u8_prefixed(input)?;
        Ok((input, Finished { verify_data }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        put_u8_prefixed(output, self.verify_data);
    }
}

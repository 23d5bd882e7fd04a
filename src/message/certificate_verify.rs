use nom::IResult;

use super::{put_u16_prefixed, u16_prefixed};
use crate::buffer::Buf;

/// ECDSA signature over the transcript hash up to and including Certificate.
#[derive(Debug, PartialEq, Eq)]
pub struct CertificateVerify<'a> {
    pub signature: &'a [u8],
}

impl<'a> CertificateVerify<'a> {
    pub fn new(signature: &'a [u8]) -> Self {
        CertificateVerify { signature }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], CertificateVerify<'a>> {
        let (input, signature) = u16_prefixed(input)?;
        Ok((input, CertificateVerify { signature }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        put_u16_prefixed(output, self.signature);
    }
}

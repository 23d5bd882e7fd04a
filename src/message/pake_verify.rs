use nom::IResult;

use super::{put_u16_prefixed, put_u8_prefixed, u16_prefixed, u8_prefixed_str};
use crate::buffer::Buf;

/// Server's PAKE answer, sent instead of Certificate + CertificateVerify.
#[derive(Debug, PartialEq, Eq)]
pub struct PakeVerify<'a> {
    /// The option the server selected from the client's offer.
    pub algorithm: &'a str,
    pub share: &'a [u8],
    pub confirm: &'a [u8],
}

impl<'a> PakeVerify<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], PakeVerify<'a>> {
        let (input, algorithm) = u8_prefixed_str(input)?;
        let (input, share) = u16_prefixed(input)?;
        let (input, confirm) = u16_prefixed(input)?;
        Ok((
            input,
            PakeVerify {
                algorithm,
                share,
                confirm,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        put_u8_prefixed(output, self.algorithm.as_bytes());
        put_u16_prefixed(output, self.share);
        put_u16_prefixed(output, self.confirm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_in_order() {
        let pv = PakeVerify {
            algorithm: "X",
            share: &[1, 2],
            confirm: &[3],
        };
        let mut out = Buf::new();
        pv.serialize(&mut out);
        assert_eq!(&*out, &[1, b'X', 0, 2, 1, 2, 0, 1, 3]);
        assert_eq!(PakeVerify::parse(&out).unwrap().1, pv);
    }
}

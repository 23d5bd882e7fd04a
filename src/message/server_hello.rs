use std::marker::PhantomData;

use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;
use crate::types::{CipherSuite, Random, SessionId};

#[derive(Debug, PartialEq, Eq)]
pub struct ServerHello<'a> {
    /// Raw version code, validated by the client against what it offered.
    pub version: u16,
    pub random: Random,
    /// Echo of the client's id when resuming, a fresh id or empty otherwise.
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    /// Record plaintext limit both sides use from here on.
    pub max_fragment: u16,
    _p: PhantomData<&'a ()>,
}

impl<'a> ServerHello<'a> {
    pub fn new(
        version: u16,
        random: Random,
        session_id: SessionId,
        cipher_suite: CipherSuite,
        max_fragment: u16,
    ) -> Self {
        ServerHello {
            version,
            random,
            session_id,
            cipher_suite,
            max_fragment,
            _p: PhantomData,
        }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], ServerHello<'a>> {
        let (input, version) = be_u16(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, max_fragment) = be_u16(input)?;
        Ok((
            input,
            ServerHello::new(version, random, session_id, cipher_suite, max_fragment),
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.version.to_be_bytes());
        output.extend_from_slice(&self.random.0);
        output.push(self.session_id.len() as u8);
        output.extend_from_slice(self.session_id.as_slice());
        output.extend_from_slice(&self.cipher_suite.as_u16().to_be_bytes());
        output.extend_from_slice(&self.max_fragment.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let sh = ServerHello::new(
            0x0303,
            Random([0xaa; 32]),
            SessionId::try_new(&[1, 2]).unwrap(),
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            2048,
        );
        let mut out = Buf::new();
        sh.serialize(&mut out);
        assert_eq!(out.len(), 2 + 32 + 1 + 2 + 2 + 2);
        assert_eq!(&out[..2], &[0x03, 0x03]);
        assert_eq!(&out[34..], &[2, 1, 2, 0xc0, 0x2b, 0x08, 0x00]);

        let (_, parsed) = ServerHello::parse(&out).unwrap();
        assert_eq!(parsed, sh);
    }
}

//! Wire-level primitives shared by the record layer, the handshake messages
//! and the session cache.

use std::fmt;

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;
use tinyvec::ArrayVec;

use crate::Error;

/// Which end of the connection an engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn is_client(&self) -> bool {
        *self == Role::Client
    }
}

// ============================================================================
// Protocol version
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    Tls12,
    Tls13,
}

impl ProtocolVersion {
    /// Version written in every record header, regardless of the negotiated one.
    pub const RECORD: ProtocolVersion = ProtocolVersion::Tls12;

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::Tls12 => 0x0303,
            ProtocolVersion::Tls13 => 0x0304,
        }
    }

    pub fn from_u16(value: u16) -> Result<Self, Error> {
        match value {
            0x0303 => Ok(ProtocolVersion::Tls12),
            0x0304 => Ok(ProtocolVersion::Tls13),
            _ => Err(Error::UnsupportedVersion(value)),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], u16> {
        be_u16(input)
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Tls12 => write!(f, "TLSv1.2"),
            ProtocolVersion::Tls13 => write!(f, "TLSv1.3"),
        }
    }
}

// ============================================================================
// Cipher suites
// ============================================================================

/// Hash algorithm driving the transcript hash and key schedule of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    SHA256,
    SHA384,
}

impl HashAlgorithm {
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::SHA256 => 32,
            HashAlgorithm::SHA384 => 48,
        }
    }
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    TLS_AES_128_GCM_SHA256,                  // 1301
    TLS_AES_256_GCM_SHA384,                  // 1302
    TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256, // c02b
    TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384, // c02c
    Unknown(u16),
}

impl CipherSuite {
    /// All suites this crate knows how to negotiate, in default preference order.
    pub const fn all() -> &'static [CipherSuite] {
        &[
            CipherSuite::TLS_AES_128_GCM_SHA256,
            CipherSuite::TLS_AES_256_GCM_SHA384,
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        ]
    }

    pub fn from_u16(value: u16) -> Self {
        match value {
            0x1301 => CipherSuite::TLS_AES_128_GCM_SHA256,
            0x1302 => CipherSuite::TLS_AES_256_GCM_SHA384,
            0xc02b => CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            0xc02c => CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            _ => CipherSuite::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuite::TLS_AES_128_GCM_SHA256 => 0x1301,
            CipherSuite::TLS_AES_256_GCM_SHA384 => 0x1302,
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 => 0xc02b,
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384 => 0xc02c,
            CipherSuite::Unknown(value) => *value,
        }
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            CipherSuite::TLS_AES_256_GCM_SHA384
            | CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384 => HashAlgorithm::SHA384,
            _ => HashAlgorithm::SHA256,
        }
    }

    /// AEAD key length in bytes. `0` for unknown suites.
    pub fn key_len(&self) -> usize {
        match self {
            CipherSuite::TLS_AES_128_GCM_SHA256
            | CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 => 16,
            CipherSuite::TLS_AES_256_GCM_SHA384
            | CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384 => 32,
            CipherSuite::Unknown(_) => 0,
        }
    }

    /// Whether the suite may be negotiated together with `version`.
    pub fn is_valid_for(&self, version: ProtocolVersion) -> bool {
        match self {
            CipherSuite::TLS_AES_128_GCM_SHA256 | CipherSuite::TLS_AES_256_GCM_SHA384 => {
                version == ProtocolVersion::Tls13
            }
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
            | CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384 => {
                version == ProtocolVersion::Tls12
            }
            CipherSuite::Unknown(_) => false,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CipherSuite> {
        let (input, value) = be_u16(input)?;
        Ok((input, CipherSuite::from_u16(value)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

impl Default for CipherSuite {
    fn default() -> Self {
        CipherSuite::Unknown(0)
    }
}

// ============================================================================
// Record content type
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

// ============================================================================
// Random / SessionId
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Random(pub [u8; 32]);

impl Random {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, bytes) = take(32usize)(input)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok((input, Random(out)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.0);
    }
}

/// Session identifier, 0 to 32 bytes. Empty means "no session".
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct SessionId(ArrayVec<[u8; 32]>);

impl SessionId {
    pub const MAX_LEN: usize = 32;

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn try_new(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() > Self::MAX_LEN {
            return Err(Error::MalformedMessage(format!(
                "session id too long: {}",
                bytes.len()
            )));
        }
        let mut v = ArrayVec::new();
        v.extend_from_slice(bytes);
        Ok(SessionId(v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SessionId> {
        let (input, len) = be_u8(input)?;
        if len as usize > Self::MAX_LEN {
            return Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::LengthValue,
            )));
        }
        let (input, bytes) = take(len as usize)(input)?;
        let mut v = ArrayVec::new();
        v.extend_from_slice(bytes);
        Ok((input, SessionId(v)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.0.len() as u8);
        output.extend_from_slice(&self.0);
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId(")?;
        for b in self.0.iter().take(4) {
            write!(f, "{:02x}", b)?;
        }
        if self.0.len() > 4 {
            write!(f, "..")?;
        }
        write!(f, ")")
    }
}

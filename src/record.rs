//! Record framing and protection.
//!
//! The record layer turns the inbound ciphertext stream into discrete records
//! and appends framed records to the outbound ciphertext stream. It owns no
//! buffers; the engine hands it the relevant [`FixedBuf`] from its arena.
//!
//! ```text
//! type(1) | version(2) | length(2) | payload
//! ```
//!
//! Once a direction has an active [`AeadContext`] every record in that
//! direction is sealed, with the record sequence number driving the nonce.

use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::buffer::{Buf, FixedBuf};
use crate::crypto::{record_aad, AeadContext};
use crate::types::{ContentType, ProtocolVersion};
use crate::Error;

pub const HEADER_LEN: usize = 5;

/// Largest fragment a peer may send, and our default.
pub const MAX_FRAGMENT_LEN: usize = 16384;

/// Room for the AEAD tag and any expansion of a protected record.
pub const MAX_EXPANSION: usize = 256;

/// A decoded record: content type plus plaintext.
#[derive(Debug)]
pub struct Record {
    pub content_type: ContentType,
    pub payload: Buf,
}

struct CipherState {
    aead: Box<dyn AeadContext>,
    seq: u64,
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherState")
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct RecordLayer {
    /// Local limit, which sizes the engine's buffers.
    limit: usize,
    max_fragment: usize,
    read: Option<CipherState>,
    write: Option<CipherState>,
}

struct Header {
    content_type: ContentType,
    version: u16,
    length: u16,
}

fn parse_header(input: &[u8]) -> IResult<&[u8], Header> {
    let (input, content_type) = be_u8(input)?;
    let (input, version) = be_u16(input)?;
    let (input, length) = be_u16(input)?;
    Ok((
        input,
        Header {
            content_type: ContentType::from_u8(content_type),
            version,
            length,
        },
    ))
}

impl RecordLayer {
    pub fn new(max_fragment: usize) -> Self {
        RecordLayer {
            limit: max_fragment,
            max_fragment,
            read: None,
            write: None,
        }
    }

    /// Largest plaintext we put in one record.
    pub fn max_fragment(&self) -> usize {
        self.max_fragment
    }

    /// Largest complete record on the wire, header included.
    pub fn max_record_len(&self) -> usize {
        HEADER_LEN + self.max_fragment + MAX_EXPANSION
    }

    /// Apply the limit agreed with the peer to both directions, capped at
    /// the limit the layer was created with.
    pub fn set_max_fragment(&mut self, len: usize) {
        self.max_fragment = self.limit.min(len);
    }

    /// Protect every following inbound record with `aead`.
    pub fn set_read(&mut self, aead: Box<dyn AeadContext>) {
        self.read = Some(CipherState { aead, seq: 0 });
    }

    /// Protect every following outbound record with `aead`.
    pub fn set_write(&mut self, aead: Box<dyn AeadContext>) {
        self.write = Some(CipherState { aead, seq: 0 });
    }

    /// Append inbound ciphertext.
    ///
    /// All or nothing: fails with [`Error::BufferOverflow`] without consuming
    /// anything if `bytes` does not fit.
    pub fn feed(&self, inbound: &mut FixedBuf, bytes: &[u8]) -> Result<(), Error> {
        inbound.try_extend(bytes)
    }

    /// Take the next complete record out of `inbound`.
    ///
    /// Fails with [`Error::Incomplete`] and leaves `inbound` untouched while
    /// fewer than a full record's bytes are buffered.
    pub fn next_record(&mut self, inbound: &mut FixedBuf) -> Result<Record, Error> {
        let (rest, header) = match parse_header(inbound.as_slice()) {
            Ok(v) => v,
            Err(_) => return Err(Error::Incomplete),
        };

        if header.version != ProtocolVersion::RECORD.as_u16() {
            return Err(Error::MalformedRecord(format!(
                "record version {:#06x}",
                header.version
            )));
        }
        if let ContentType::Unknown(_) | ContentType::ChangeCipherSpec = header.content_type {
            return Err(Error::BadContentType(header.content_type));
        }

        let length = header.length as usize;
        let limit = match self.read {
            Some(_) => self.max_fragment + MAX_EXPANSION,
            None => self.max_fragment,
        };
        if length > limit {
            return Err(Error::RecordTooLarge(length));
        }
        if rest.len() < length {
            return Err(Error::Incomplete);
        }

        let mut payload = Buf::from_slice(&rest[..length]);
        inbound.consume(HEADER_LEN + length);

        if let Some(state) = &mut self.read {
            let plain_len = length
                .checked_sub(state.aead.tag_len())
                .ok_or(Error::AuthFailure)?;
            let aad = record_aad(
                header.content_type.as_u8(),
                header.version,
                state.seq,
                plain_len,
            );
            state.aead.open(state.seq, &aad, &mut payload)?;
            state.seq += 1;
            if payload.len() > self.max_fragment {
                return Err(Error::RecordTooLarge(payload.len()));
            }
        }

        Ok(Record {
            content_type: header.content_type,
            payload,
        })
    }

    /// Bytes a record with `payload_len` plaintext bytes occupies on the wire.
    pub fn framed_len(&self, payload_len: usize) -> usize {
        let tag = self.write.as_ref().map(|s| s.aead.tag_len()).unwrap_or(0);
        HEADER_LEN + payload_len + tag
    }

    /// Frame `payload` as one record at the end of `outbound`.
    ///
    /// Fails with [`Error::RecordTooLarge`] if the payload exceeds the maximum
    /// fragment length, and with [`Error::BufferOverflow`] without side effects
    /// if the framed record does not fit.
    pub fn frame(
        &mut self,
        outbound: &mut FixedBuf,
        content_type: ContentType,
        payload: &[u8],
    ) -> Result<(), Error> {
        if payload.len() > self.max_fragment {
            return Err(Error::RecordTooLarge(payload.len()));
        }
        if self.framed_len(payload.len()) > outbound.free() {
            return Err(Error::BufferOverflow);
        }

        let version = ProtocolVersion::RECORD.as_u16();
        let mut body = Buf::from_slice(payload);
        if let Some(state) = &mut self.write {
            let aad = record_aad(content_type.as_u8(), version, state.seq, payload.len());
            state.aead.seal(state.seq, &aad, &mut body)?;
            state.seq += 1;
        }

        let mut header = [0u8; HEADER_LEN];
        header[0] = content_type.as_u8();
        header[1..3].copy_from_slice(&version.to_be_bytes());
        header[3..5].copy_from_slice(&(body.len() as u16).to_be_bytes());

        outbound.try_extend(&header)?;
        outbound.try_extend(&body)?;
        Ok(())
    }
}

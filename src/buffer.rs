//! Buffer management for the engine.
//!
//! [`Buf`] wraps `Vec<u8>` for protocol data that is built up and handed
//! around (handshake bodies, sealed records, secrets). The four streams an
//! engine multiplexes live in a [`BufferArena`]: fixed-capacity buffers indexed
//! by [`BufferId`], each with a high-water mark equal to its capacity.

use std::fmt;
use std::ops::{Deref, DerefMut, Index, IndexMut};

use zeroize::Zeroize;

use crate::Error;

/// Growable buffer used for protocol data.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Buf(Vec<u8>);

impl Buf {
    /// Create a new empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new buffer from a slice.
    pub fn from_slice(data: &[u8]) -> Self {
        Buf(data.to_vec())
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn extend_from_slice(&mut self, other: &[u8]) {
        self.0.extend_from_slice(other);
    }

    pub fn push(&mut self, byte: u8) {
        self.0.push(byte);
    }

    pub fn resize(&mut self, len: usize, value: u8) {
        self.0.resize(len, value);
    }

    /// Truncate the buffer to the specified length.
    /// If `len` is greater than the buffer's current length, this has no effect.
    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    /// Convert the buffer into the underlying `Vec<u8>`.
    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut self.0)
    }
}

impl Deref for Buf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Buf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<[u8]> for Buf {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for Buf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl Zeroize for Buf {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for Buf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buf").field("len", &self.0.len()).finish()
    }
}

/// Implement the `aead::Buffer` trait for `Buf` to support in-place AEAD operations.
impl aes_gcm::aead::Buffer for Buf {
    fn extend_from_slice(&mut self, other: &[u8]) -> Result<(), aes_gcm::aead::Error> {
        self.0.extend_from_slice(other);
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

/// Trait for types that can be converted into a `Buf`.
pub trait ToBuf {
    fn to_buf(self) -> Buf;
}

impl ToBuf for Vec<u8> {
    fn to_buf(self) -> Buf {
        Buf(self)
    }
}

impl ToBuf for &[u8] {
    fn to_buf(self) -> Buf {
        self.to_vec().to_buf()
    }
}

/// Fixed-capacity byte queue.
///
/// Bytes are appended at the back and consumed from the front. Appends are
/// all-or-nothing: a slice that does not fit fails with
/// [`Error::BufferOverflow`] and leaves the buffer untouched.
pub struct FixedBuf {
    data: Box<[u8]>,
    start: usize,
    end: usize,
}

impl FixedBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        FixedBuf {
            data: vec![0; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    /// The high-water mark.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Bytes that can still be appended before hitting the high-water mark.
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub fn try_extend(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() > self.free() {
            return Err(Error::BufferOverflow);
        }
        if self.end + bytes.len() > self.capacity() {
            self.compact();
        }
        self.data[self.end..self.end + bytes.len()].copy_from_slice(bytes);
        self.end += bytes.len();
        Ok(())
    }

    /// Drop `n` bytes from the front.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len());
        self.data[self.start..self.start + n].zeroize();
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Move as many bytes as fit into `dst`, returning how many moved.
    pub fn drain_into(&mut self, dst: &mut [u8]) -> usize {
        let n = self.len().min(dst.len());
        dst[..n].copy_from_slice(&self.data[self.start..self.start + n]);
        self.consume(n);
        n
    }

    pub fn clear(&mut self) {
        self.data.zeroize();
        self.start = 0;
        self.end = 0;
    }

    fn compact(&mut self) {
        self.data.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }
}

impl Drop for FixedBuf {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl fmt::Debug for FixedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBuf")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Role of a buffer in the arena: direction × (cipher|plain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferId {
    InboundCipher,
    OutboundCipher,
    InboundPlain,
    OutboundPlain,
}

impl BufferId {
    fn index(self) -> usize {
        match self {
            BufferId::InboundCipher => 0,
            BufferId::OutboundCipher => 1,
            BufferId::InboundPlain => 2,
            BufferId::OutboundPlain => 3,
        }
    }
}

/// The four byte streams of one engine.
#[derive(Debug)]
pub struct BufferArena {
    buffers: [FixedBuf; 4],
}

impl BufferArena {
    pub fn new(max_cipher_record: usize, max_plain_record: usize) -> Self {
        BufferArena {
            buffers: [
                FixedBuf::with_capacity(max_cipher_record),
                FixedBuf::with_capacity(max_cipher_record),
                FixedBuf::with_capacity(max_plain_record),
                FixedBuf::with_capacity(max_plain_record),
            ],
        }
    }

    pub fn clear(&mut self) {
        for b in &mut self.buffers {
            b.clear();
        }
    }

    /// Borrow two distinct buffers at once, e.g. plaintext staging and its
    /// ciphertext destination.
    pub fn pair_mut(&mut self, a: BufferId, b: BufferId) -> (&mut FixedBuf, &mut FixedBuf) {
        let (ia, ib) = (a.index(), b.index());
        debug_assert_ne!(ia, ib);
        if ia < ib {
            let (lo, hi) = self.buffers.split_at_mut(ib);
            (&mut lo[ia], &mut hi[0])
        } else {
            let (lo, hi) = self.buffers.split_at_mut(ia);
            (&mut hi[0], &mut lo[ib])
        }
    }
}

impl Index<BufferId> for BufferArena {
    type Output = FixedBuf;

    fn index(&self, id: BufferId) -> &Self::Output {
        &self.buffers[id.index()]
    }
}

impl IndexMut<BufferId> for BufferArena {
    fn index_mut(&mut self, id: BufferId) -> &mut Self::Output {
        &mut self.buffers[id.index()]
    }
}

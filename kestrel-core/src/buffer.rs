//! Bounded byte buffers
//!
//! [`ByteArray`] is the staging area between a transport and the protocol
//! layers: bytes are appended as they arrive, parsers look at borrowed
//! sub-ranges, and the consumed prefix is discarded once a frame is done.
//! [`ByteReader`] walks a byte slice reading big-endian fields.

use core::ops::{Deref, DerefMut};

use heapless::Vec;
use kestrel_hal::ErrorCode;

/// Fixed-capacity, growable byte sequence
///
/// Invariant: `len() <= capacity()`. Appends that would overflow fail
/// without modifying the contents.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ByteArray<const N: usize> {
    bytes: Vec<u8, N>,
}

impl<const N: usize> ByteArray<N> {
    /// Create an empty array
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Create an array holding a copy of `data`
    pub fn from_slice(data: &[u8]) -> Result<Self, ErrorCode> {
        let mut array = Self::new();
        array.append(data)?;
        Ok(array)
    }

    /// Maximum number of bytes this array can hold
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Remaining free space in bytes
    pub fn free(&self) -> usize {
        N - self.bytes.len()
    }

    /// Check if no more bytes fit
    pub fn is_full(&self) -> bool {
        self.bytes.len() == N
    }

    /// Borrow the contents
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Borrow the contents mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Remove all bytes
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Shorten to `len` bytes; no effect if already shorter
    pub fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    /// Append all of `data`, or nothing if it does not fit
    pub fn append(&mut self, data: &[u8]) -> Result<(), ErrorCode> {
        self.bytes
            .extend_from_slice(data)
            .map_err(|_| ErrorCode::BufferFull)
    }

    /// Append a single byte
    pub fn push(&mut self, byte: u8) -> Result<(), ErrorCode> {
        self.bytes.push(byte).map_err(|_| ErrorCode::BufferFull)
    }

    /// Append a big-endian `u16`
    pub fn append_u16_be(&mut self, value: u16) -> Result<(), ErrorCode> {
        self.append(&value.to_be_bytes())
    }

    /// Append a big-endian `u32`
    pub fn append_u32_be(&mut self, value: u32) -> Result<(), ErrorCode> {
        self.append(&value.to_be_bytes())
    }

    /// Append `count` zero bytes and return the offset of the first one
    ///
    /// Used for two-pass encoding: reserve a header, write the body, then
    /// patch the header fields in place.
    pub fn reserve(&mut self, count: usize) -> Result<usize, ErrorCode> {
        let offset = self.bytes.len();
        if count > self.free() {
            return Err(ErrorCode::BufferFull);
        }
        self.bytes
            .resize(offset + count, 0)
            .map_err(|_| ErrorCode::BufferFull)?;
        Ok(offset)
    }

    /// Overwrite two bytes at `offset` with a big-endian `u16`
    pub fn patch_u16_be(&mut self, offset: usize, value: u16) -> Result<(), ErrorCode> {
        let slot = self
            .view_mut(offset, 2)
            .ok_or(ErrorCode::ParameterInvalid)?;
        slot.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Read the byte at `index`
    pub fn get(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// Write the byte at `index`
    pub fn set(&mut self, index: usize, value: u8) -> Result<(), ErrorCode> {
        let slot = self
            .bytes
            .get_mut(index)
            .ok_or(ErrorCode::ParameterInvalid)?;
        *slot = value;
        Ok(())
    }

    /// Borrow `len` bytes starting at `start`
    ///
    /// The view shares storage with the array; no copy is made.
    pub fn view(&self, start: usize, len: usize) -> Option<&[u8]> {
        let end = start.checked_add(len)?;
        self.bytes.get(start..end)
    }

    /// Mutably borrow `len` bytes starting at `start`
    pub fn view_mut(&mut self, start: usize, len: usize) -> Option<&mut [u8]> {
        let end = start.checked_add(len)?;
        self.bytes.get_mut(start..end)
    }

    /// Discard the first `count` bytes, shifting the rest to the front
    ///
    /// Returns how many bytes were actually discarded.
    pub fn consume(&mut self, count: usize) -> usize {
        let len = self.bytes.len();
        let count = count.min(len);
        if count == 0 {
            return 0;
        }
        self.bytes.copy_within(count.., 0);
        self.bytes.truncate(len - count);
        count
    }
}

impl<const N: usize> Deref for ByteArray<N> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<const N: usize> DerefMut for ByteArray<N> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl<const N: usize> AsRef<[u8]> for ByteArray<N> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(feature = "defmt")]
impl<const N: usize> defmt::Format for ByteArray<N> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ByteArray({}/{}) {=[u8]:x}", self.bytes.len(), N, &self.bytes[..]);
    }
}

/// Cursor over a byte slice reading big-endian fields
///
/// Every read returns `None` when too few bytes remain and leaves the
/// position unchanged.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Start reading at the front of `bytes`
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Borrow the unread tail
    pub fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    /// Take the next `len` bytes
    pub fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn read_u16_be(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32_be(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

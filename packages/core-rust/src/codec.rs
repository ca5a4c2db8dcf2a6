//! Little-endian binary codec shared by the on-disk format and the wire protocol.
//!
//! Integers are fixed-width little-endian. Strings carry a 7-bit varint
//! byte-length prefix followed by UTF-8 bytes. Lists carry an `i32` count.
//!
//! Reading never panics: every accessor checks the remaining length and
//! reports [`CodecError::UnexpectedEof`] instead.

use bytes::{Buf, BufMut};

use crate::error::CodecError;

/// Maximum number of bytes a 32-bit varint length prefix may occupy.
const MAX_VARINT_BYTES: usize = 5;

/// Bounds-checked cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        if self.buf.len() < needed {
            return Err(CodecError::UnexpectedEof {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    /// Reads one byte.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] when the input is exhausted.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Reads a little-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] when fewer than 4 bytes remain.
    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    /// Reads a little-endian `i64`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] when fewer than 8 bytes remain.
    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64_le())
    }

    /// Reads exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] when fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a count-prefixed length and rejects negative values.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidLength`] for a negative count.
    pub fn read_count(&mut self) -> Result<usize, CodecError> {
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| CodecError::InvalidLength)
    }

    /// Reads a varint-length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidLength`] for an over-long prefix and
    /// [`CodecError::InvalidUtf8`] for malformed contents.
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_varint()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    fn read_varint(&mut self) -> Result<usize, CodecError> {
        let mut value: u32 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return usize::try_from(value).map_err(|_| CodecError::InvalidLength);
            }
        }
        Err(CodecError::InvalidLength)
    }

    /// Reads a count-prefixed list of `T`.
    ///
    /// # Errors
    ///
    /// Propagates any error from decoding the count or an element.
    pub fn read_list<T: BinaryData>(&mut self) -> Result<Vec<T>, CodecError> {
        let count = self.read_count()?;
        // Each element takes at least one byte; cap the allocation on hostile counts.
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(T::read_from(self)?);
        }
        Ok(items)
    }
}

/// Write helpers for the string and list encodings, available on any `BufMut`.
pub trait BufMutExt: BufMut {
    /// Writes a varint-length-prefixed UTF-8 string.
    fn put_string(&mut self, s: &str) {
        let mut len = s.len();
        while len >= 0x80 {
            // Truncation keeps the low 7 bits plus the continuation flag.
            #[allow(clippy::cast_possible_truncation)]
            self.put_u8((len as u8 & 0x7f) | 0x80);
            len >>= 7;
        }
        #[allow(clippy::cast_possible_truncation)]
        self.put_u8(len as u8);
        self.put_slice(s.as_bytes());
    }

    /// Writes an `i32` element count.
    ///
    /// # Panics
    ///
    /// Panics if `count` does not fit in an `i32`.
    fn put_count(&mut self, count: usize) {
        let count = i32::try_from(count).expect("list longer than i32::MAX elements");
        self.put_i32_le(count);
    }
}

impl<B: BufMut + ?Sized> BufMutExt for B {}

/// A type with a fixed binary representation.
pub trait BinaryData: Sized {
    /// Decodes one value from the reader.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the input is truncated or malformed.
    fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError>;

    /// Appends the encoding of `self` to `out`.
    fn write_to(&self, out: &mut Vec<u8>);

    /// Encodes `self` into a fresh buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    /// Decodes a value that must span the whole input.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidLength`] when bytes are left over.
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let value = Self::read_from(&mut reader)?;
        if !reader.is_empty() {
            return Err(CodecError::InvalidLength);
        }
        Ok(value)
    }
}

/// Writes a count-prefixed list.
pub fn write_list<T: BinaryData>(items: &[T], out: &mut Vec<u8>) {
    out.put_count(items.len());
    for item in items {
        item.write_to(out);
    }
}

//! TLS-presentation wire codec
//!
//! Fixed-width integers are big-endian. Variable-length vectors carry a
//! length prefix whose width (1, 2, 3, or 4 bytes) is chosen per field.
//! Optionals are a one-byte presence flag followed by the value; tagged
//! unions are a one-byte discriminant followed by the selected variant.

use crate::error::{MlsError, MlsResult};

/// Width of the length prefix in front of a variable-length vector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VecSize {
    VecU8,
    VecU16,
    VecU24,
    VecU32,
}

impl VecSize {
    fn width(self) -> usize {
        match self {
            VecSize::VecU8 => 1,
            VecSize::VecU16 => 2,
            VecSize::VecU24 => 3,
            VecSize::VecU32 => 4,
        }
    }

    fn max_len(self) -> usize {
        match self {
            VecSize::VecU8 => 0xff,
            VecSize::VecU16 => 0xffff,
            VecSize::VecU24 => 0xff_ffff,
            VecSize::VecU32 => 0xffff_ffff,
        }
    }
}

/// Read position over a received byte string
pub struct Cursor<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn take(&mut self, length: usize) -> MlsResult<&'a [u8]> {
        if self.remaining() < length {
            return Err(MlsError::InvalidTlsSyntax(format!(
                "needed {} bytes, {} left",
                length,
                self.remaining()
            )));
        }
        let out = &self.buffer[self.position..self.position + length];
        self.position += length;
        Ok(out)
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

/// A type with a fixed TLS-presentation encoding
pub trait Codec: Sized {
    fn encode(&self, buffer: &mut Vec<u8>);
    fn decode(cursor: &mut Cursor) -> MlsResult<Self>;
}

impl Codec for u8 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.push(*self);
    }

    fn decode(cursor: &mut Cursor) -> MlsResult<Self> {
        Ok(cursor.take(1)?[0])
    }
}

impl Codec for u16 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.to_be_bytes());
    }

    fn decode(cursor: &mut Cursor) -> MlsResult<Self> {
        let raw = cursor.take(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }
}

impl Codec for u32 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.to_be_bytes());
    }

    fn decode(cursor: &mut Cursor) -> MlsResult<Self> {
        let raw = cursor.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

impl Codec for u64 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.to_be_bytes());
    }

    fn decode(cursor: &mut Cursor) -> MlsResult<Self> {
        let raw = cursor.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(u64::from_be_bytes(bytes))
    }
}

fn encode_length(size: VecSize, buffer: &mut Vec<u8>, length: usize) {
    debug_assert!(length <= size.max_len());
    let bytes = (length as u64).to_be_bytes();
    buffer.extend_from_slice(&bytes[8 - size.width()..]);
}

fn decode_length(size: VecSize, cursor: &mut Cursor) -> MlsResult<usize> {
    let raw = cursor.take(size.width())?;
    let mut length = 0usize;
    for byte in raw {
        length = (length << 8) | usize::from(*byte);
    }
    Ok(length)
}

/// Write an opaque byte string with the given length-prefix width
pub fn encode_vec_bytes(size: VecSize, buffer: &mut Vec<u8>, bytes: &[u8]) {
    encode_length(size, buffer, bytes.len());
    buffer.extend_from_slice(bytes);
}

/// Read an opaque byte string with the given length-prefix width
pub fn decode_vec_bytes(size: VecSize, cursor: &mut Cursor) -> MlsResult<Vec<u8>> {
    let length = decode_length(size, cursor)?;
    Ok(cursor.take(length)?.to_vec())
}

/// Write a vector of encodable elements, length-prefixed in bytes
pub fn encode_vec<T: Codec>(size: VecSize, buffer: &mut Vec<u8>, elements: &[T]) {
    let mut inner = Vec::new();
    for element in elements {
        element.encode(&mut inner);
    }
    encode_vec_bytes(size, buffer, &inner);
}

/// Read a vector of encodable elements, length-prefixed in bytes
pub fn decode_vec<T: Codec>(size: VecSize, cursor: &mut Cursor) -> MlsResult<Vec<T>> {
    let length = decode_length(size, cursor)?;
    let raw = cursor.take(length)?;
    let mut inner = Cursor::new(raw);
    let mut elements = Vec::new();
    while !inner.is_empty() {
        elements.push(T::decode(&mut inner)?);
    }
    Ok(elements)
}

/// Write an optional value as a presence flag plus the value
pub fn encode_option<T: Codec>(buffer: &mut Vec<u8>, value: &Option<T>) {
    match value {
        Some(inner) => {
            buffer.push(1);
            inner.encode(buffer);
        }
        None => buffer.push(0),
    }
}

/// Read an optional value written by [`encode_option`]
pub fn decode_option<T: Codec>(cursor: &mut Cursor) -> MlsResult<Option<T>> {
    match u8::decode(cursor)? {
        0 => Ok(None),
        1 => Ok(Some(T::decode(cursor)?)),
        flag => Err(MlsError::InvalidTlsSyntax(format!(
            "bad presence flag {flag:#04x}"
        ))),
    }
}

/// Serialize a value to a fresh byte string
pub fn marshal<T: Codec>(value: &T) -> Vec<u8> {
    let mut buffer = Vec::new();
    value.encode(&mut buffer);
    buffer
}

/// Deserialize a value, rejecting trailing bytes
pub fn unmarshal<T: Codec>(bytes: &[u8]) -> MlsResult<T> {
    let mut cursor = Cursor::new(bytes);
    let value = T::decode(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(MlsError::InvalidTlsSyntax(format!(
            "{} trailing bytes after value",
            cursor.remaining()
        )));
    }
    Ok(value)
}

//! Fields, tuples and their binary encoding.
//!
//! A field travels as a BER varint length followed by raw bytes. The codec
//! never interprets field contents; helpers such as [`Field::from_u32`] only
//! produce and read the fixed-width little-endian packing callers agree on.

use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::ops::Index;

/// Maximum number of bytes in an encoded varint32.
const MAX_VARINT_LEN: usize = 5;

/// A single tuple element: opaque bytes.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Field(Bytes);

impl Field {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Packs `value` as 4 little-endian bytes.
    pub fn from_u32(value: u32) -> Self {
        Self(Bytes::copy_from_slice(&value.to_le_bytes()))
    }

    /// Packs `value` as 8 little-endian bytes.
    pub fn from_u64(value: u64) -> Self {
        Self(Bytes::copy_from_slice(&value.to_le_bytes()))
    }

    /// Reads the field as a packed u32, if it is exactly 4 bytes wide.
    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.0.as_ref().try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Reads the field as a packed u64, if it is exactly 8 bytes wide.
    pub fn as_u64(&self) -> Option<u64> {
        let bytes: [u8; 8] = self.0.as_ref().try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        put_varint32(buf, self.0.len() as u32);
        buf.put_slice(&self.0);
    }

    pub fn decode(reader: &mut BodyReader<'_>) -> Result<Self, ProtocolError> {
        let len = reader.varint32()? as usize;
        let bytes = reader.bytes(len, "field")?;
        Ok(Self(Bytes::copy_from_slice(bytes)))
    }

    /// Size of the encoded form (length prefix included).
    pub fn encoded_len(&self) -> usize {
        varint32_len(self.0.len() as u32) + self.0.len()
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) if s.chars().all(|c| !c.is_control()) => write!(f, "{s:?}"),
            _ => write!(f, "{:02x?}", self.0.as_ref()),
        }
    }
}

impl From<u32> for Field {
    fn from(value: u32) -> Self {
        Field::from_u32(value)
    }
}

impl From<u64> for Field {
    fn from(value: u64) -> Self {
        Field::from_u64(value)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Field(Bytes::from(value))
    }
}

impl From<&[u8]> for Field {
    fn from(value: &[u8]) -> Self {
        Field(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for Field {
    fn from(value: Vec<u8>) -> Self {
        Field(Bytes::from(value))
    }
}

impl From<Bytes> for Field {
    fn from(value: Bytes) -> Self {
        Field(value)
    }
}

impl AsRef<[u8]> for Field {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An ordered sequence of fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Tuple(Vec<Field>);

impl Tuple {
    pub fn new(fields: Vec<Field>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &[Field] {
        &self.0
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.0
    }

    pub fn get(&self, index: usize) -> Option<&Field> {
        self.0.get(index)
    }

    pub fn push(&mut self, field: impl Into<Field>) {
        self.0.push(field.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.0.iter()
    }

    /// Writes `cardinality u32` followed by each field.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.0.len() as u32);
        for field in &self.0 {
            field.encode(buf);
        }
    }

    /// Reads `cardinality u32` followed by that many fields.
    pub fn decode(reader: &mut BodyReader<'_>) -> Result<Self, ProtocolError> {
        let cardinality = reader.u32("tuple cardinality")? as usize;
        // Every field takes at least one byte, so a cardinality beyond the
        // remaining length can never be satisfied.
        if cardinality > reader.remaining() {
            return Err(ProtocolError::MalformedBody(format!(
                "tuple cardinality {cardinality} exceeds {} remaining bytes",
                reader.remaining()
            )));
        }

        let mut fields = Vec::with_capacity(cardinality);
        for _ in 0..cardinality {
            fields.push(Field::decode(reader)?);
        }
        Ok(Self(fields))
    }

    /// Size of the cardinality-prefixed encoding.
    pub fn encoded_len(&self) -> usize {
        4 + self.0.iter().map(Field::encoded_len).sum::<usize>()
    }
}

impl Index<usize> for Tuple {
    type Output = Field;

    fn index(&self, index: usize) -> &Field {
        &self.0[index]
    }
}

impl From<Vec<Field>> for Tuple {
    fn from(fields: Vec<Field>) -> Self {
        Self(fields)
    }
}

impl<F: Into<Field>> FromIterator<F> for Tuple {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for Tuple {
    type Item = Field;
    type IntoIter = std::vec::IntoIter<Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Tuple {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Builds a [`Tuple`] from values convertible into [`Field`].
#[macro_export]
macro_rules! tuple {
    ($($field:expr),* $(,)?) => {
        $crate::Tuple::new(vec![$($crate::Field::from($field)),*])
    };
}

/// Writes `value` as a BER varint: 7-bit groups, most significant first.
pub fn put_varint32(buf: &mut BytesMut, value: u32) {
    let len = varint32_len(value);
    for i in (1..len).rev() {
        buf.put_u8(((value >> (7 * i)) & 0x7F) as u8 | 0x80);
    }
    buf.put_u8((value & 0x7F) as u8);
}

fn varint32_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => MAX_VARINT_LEN,
    }
}

/// Bounds-checked cursor over a frame body.
#[derive(Debug)]
pub struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns everything not yet consumed.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    pub fn bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8], ProtocolError> {
        if len > self.remaining() {
            return Err(ProtocolError::truncated(what, len, self.remaining()));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn u8(&mut self, what: &str) -> Result<u8, ProtocolError> {
        Ok(self.bytes(1, what)?[0])
    }

    pub fn u32(&mut self, what: &str) -> Result<u32, ProtocolError> {
        let bytes = self.bytes(4, what)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn varint32(&mut self) -> Result<u32, ProtocolError> {
        let mut value: u64 = 0;
        for _ in 0..MAX_VARINT_LEN {
            let byte = self.u8("field length")?;
            value = (value << 7) | (byte & 0x7F) as u64;
            if byte & 0x80 == 0 {
                return u32::try_from(value).map_err(|_| {
                    ProtocolError::MalformedBody(format!(
                        "field length {value} does not fit in 32 bits"
                    ))
                });
            }
        }
        Err(ProtocolError::MalformedBody(
            "field length varint longer than 5 bytes".to_string(),
        ))
    }

    /// Fails unless the whole buffer was consumed.
    pub fn finish(&self, what: &str) -> Result<(), ProtocolError> {
        if self.remaining() != 0 {
            return Err(ProtocolError::MalformedBody(format!(
                "{} trailing bytes after {what}",
                self.remaining()
            )));
        }
        Ok(())
    }
}

//! Binary frame format.
//!
//! Frame layout (12 bytes header + body), all fields little-endian:
//!
//! ```text
//! +---------+----------+------------+
//! | op_code | body_len | request_id |
//! | 4 bytes | 4 bytes  |  4 bytes   |
//! +---------+----------+------------+
//! | body                            |
//! | body_len bytes                  |
//! +---------------------------------+
//! ```

use crate::error::ProtocolError;
use crate::MAX_BODY_SIZE;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed frame header in bytes (4+4+4 = 12).
pub const FRAME_HEADER_SIZE: usize = 12;

/// Fixed-width frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub op_code: u32,
    pub body_len: u32,
    pub request_id: u32,
}

impl FrameHeader {
    /// Decodes a header from the first [`FRAME_HEADER_SIZE`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::MalformedFrame {
                needed: FRAME_HEADER_SIZE,
                available: buf.len(),
            });
        }

        let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        Ok(Self {
            op_code: word(0),
            body_len: word(4),
            request_id: word(8),
        })
    }

    /// Rejects bodies larger than [`MAX_BODY_SIZE`].
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.body_len > MAX_BODY_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: self.body_len,
                max: MAX_BODY_SIZE,
            });
        }
        Ok(())
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.op_code);
        buf.put_u32_le(self.body_len);
        buf.put_u32_le(self.request_id);
    }
}

/// Converts a body length to its header value, enforcing [`MAX_BODY_SIZE`].
fn checked_body_len(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_BODY_SIZE)
        .ok_or(ProtocolError::FrameTooLarge {
            size: u32::try_from(len).unwrap_or(u32::MAX),
            max: MAX_BODY_SIZE,
        })
}

/// Prepends a header with `body_len = body.len()` to `body`.
pub fn encode_frame(op_code: u32, request_id: u32, body: &[u8]) -> Result<BytesMut, ProtocolError> {
    let body_len = checked_body_len(body.len())?;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    FrameHeader {
        op_code,
        body_len,
        request_id,
    }
    .encode_into(&mut buf);
    buf.put_slice(body);
    Ok(buf)
}

/// A complete frame: header plus exactly `body_len` bytes of body.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Bytes,
}

impl Frame {
    /// Builds a frame around `body`. Fails with `FrameTooLarge` if the body
    /// exceeds [`MAX_BODY_SIZE`].
    pub fn new(op_code: u32, request_id: u32, body: Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            header: FrameHeader {
                op_code,
                body_len: checked_body_len(body.len())?,
                request_id,
            },
            body,
        })
    }

    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        encode_frame(self.header.op_code, self.header.request_id, &self.body)
    }

    /// Decodes a frame from a stream buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let header = FrameHeader::decode(buf)?;
        header.validate()?;

        let total_len = FRAME_HEADER_SIZE + header.body_len as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let mut frame = buf.split_to(total_len);
        let body = frame.split_off(FRAME_HEADER_SIZE).freeze();

        Ok(Some(Self { header, body }))
    }
}

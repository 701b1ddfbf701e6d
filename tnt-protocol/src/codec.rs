//! Encoder and decoder for request and response bodies.

use crate::error::{ProtocolError, ReturnCode};
use crate::frame::encode_frame;
use crate::message::*;
use crate::tuple::{BodyReader, Field, Tuple};
use bytes::{BufMut, BytesMut};

/// Limit sent on the wire when a select has none.
const NO_LIMIT: u32 = u32::MAX;

/// Encodes requests and responses into bodies and frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a request into a complete frame.
    pub fn encode_request(request_id: u32, request: &Request) -> Result<BytesMut, ProtocolError> {
        let body = Self::encode_request_body(request);
        encode_frame(request.operation().code(), request_id, &body)
    }

    /// Encodes the operation-specific body of a request.
    pub fn encode_request_body(request: &Request) -> BytesMut {
        let mut buf = BytesMut::new();

        match request {
            Request::Ping => {}
            Request::Select(select) => {
                buf.put_u32_le(select.space);
                buf.put_u32_le(select.index);
                buf.put_u32_le(select.offset);
                buf.put_u32_le(select.limit.unwrap_or(NO_LIMIT));
                buf.put_u32_le(select.keys.len() as u32);
                for key in &select.keys {
                    key.encode(&mut buf);
                }
            }
            Request::Insert(insert) => {
                buf.put_u32_le(insert.space);
                buf.put_u32_le(insert.flags.bits());
                insert.tuple.encode(&mut buf);
            }
            Request::Delete(delete) => {
                buf.put_u32_le(delete.space);
                buf.put_u32_le(delete.flags.bits());
                delete.key.encode(&mut buf);
            }
            Request::Update(update) => {
                buf.put_u32_le(update.space);
                buf.put_u32_le(update.flags.bits());
                update.key.encode(&mut buf);
                buf.put_u32_le(update.ops.len() as u32);
                for op in &update.ops {
                    buf.put_u32_le(op.field_no);
                    buf.put_u8(op.kind.code());
                    op.arg.encode(&mut buf);
                }
            }
            Request::Call(call) => {
                buf.put_u32_le(call.flags.bits());
                Field::from(call.proc_name.as_str()).encode(&mut buf);
                call.args.encode(&mut buf);
            }
        }

        buf
    }

    /// Encodes a response into a complete frame echoing `request_id`.
    pub fn encode_response(
        operation: Operation,
        request_id: u32,
        shape: ResponseShape,
        response: &Response,
    ) -> Result<BytesMut, ProtocolError> {
        let body = Self::encode_response_body(shape, response);
        encode_frame(operation.code(), request_id, &body)
    }

    /// Encodes a response body as a server would.
    pub fn encode_response_body(shape: ResponseShape, response: &Response) -> BytesMut {
        let mut buf = BytesMut::new();

        if response.is_error() {
            buf.put_u32_le(response.return_code.0);
            if let Some(message) = &response.error_message {
                buf.put_slice(message.as_bytes());
            }
            buf.put_u8(0);
            return buf;
        }

        match shape {
            ResponseShape::Empty => {}
            ResponseShape::Count => {
                buf.put_u32_le(0);
                buf.put_u32_le(response.count);
            }
            ResponseShape::Tuples => {
                buf.put_u32_le(0);
                buf.put_u32_le(response.tuples.len() as u32);
                for tuple in &response.tuples {
                    // Size covers cardinality and fields.
                    buf.put_u32_le(tuple.encoded_len() as u32);
                    tuple.encode(&mut buf);
                }
            }
        }

        buf
    }
}

/// Decodes request and response bodies.
pub struct Decoder;

impl Decoder {
    /// Decodes a response body laid out according to `shape`.
    pub fn decode_response(shape: ResponseShape, body: &[u8]) -> Result<Response, ProtocolError> {
        if body.is_empty() {
            return match shape {
                ResponseShape::Empty => Ok(Response::default()),
                _ => Err(ProtocolError::MalformedBody(
                    "empty response body".to_string(),
                )),
            };
        }

        let mut reader = BodyReader::new(body);
        let return_code = ReturnCode(reader.u32("return code")?);

        if !return_code.is_ok() {
            let raw = reader.rest();
            let raw = raw.strip_suffix(b"\0").unwrap_or(raw);
            return Ok(Response {
                return_code,
                error_message: Some(String::from_utf8_lossy(raw).into_owned()),
                ..Default::default()
            });
        }

        let mut response = Response::default();
        match shape {
            ResponseShape::Empty => {
                if !reader.is_empty() {
                    response.count = reader.u32("row count")?;
                }
            }
            ResponseShape::Count => {
                response.count = reader.u32("row count")?;
            }
            ResponseShape::Tuples => {
                response.count = reader.u32("row count")?;
                let capacity = (response.count as usize).min(reader.remaining() / 8);
                response.tuples.reserve(capacity);
                for _ in 0..response.count {
                    response.tuples.push(Self::decode_sized_tuple(&mut reader)?);
                }
            }
        }

        reader.finish("response body")?;
        Ok(response)
    }

    /// Reads `size u32` then a tuple occupying exactly `size` bytes.
    fn decode_sized_tuple(reader: &mut BodyReader<'_>) -> Result<Tuple, ProtocolError> {
        let size = reader.u32("tuple size")? as usize;
        let mut inner = BodyReader::new(reader.bytes(size, "tuple")?);
        let tuple = Tuple::decode(&mut inner)?;
        inner.finish("tuple")?;
        Ok(tuple)
    }

    /// Decodes a request body, as a server would.
    pub fn decode_request(operation: Operation, body: &[u8]) -> Result<Request, ProtocolError> {
        let mut reader = BodyReader::new(body);

        let request = match operation {
            Operation::Ping => Request::Ping,
            Operation::Select => {
                let space = reader.u32("space")?;
                let index = reader.u32("index")?;
                let offset = reader.u32("offset")?;
                let limit = match reader.u32("limit")? {
                    NO_LIMIT => None,
                    limit => Some(limit),
                };
                let key_count = reader.u32("key count")?;
                let mut keys = Vec::new();
                for _ in 0..key_count {
                    keys.push(Tuple::decode(&mut reader)?);
                }
                Request::Select(Select {
                    space,
                    index,
                    offset,
                    limit,
                    keys,
                })
            }
            Operation::Insert => Request::Insert(Insert {
                space: reader.u32("space")?,
                flags: WriteFlags::from_bits(reader.u32("flags")?),
                tuple: Tuple::decode(&mut reader)?,
            }),
            Operation::Delete => Request::Delete(Delete {
                space: reader.u32("space")?,
                flags: WriteFlags::from_bits(reader.u32("flags")?),
                key: Tuple::decode(&mut reader)?,
            }),
            Operation::Update => {
                let space = reader.u32("space")?;
                let flags = WriteFlags::from_bits(reader.u32("flags")?);
                let key = Tuple::decode(&mut reader)?;
                let op_count = reader.u32("update op count")?;
                let mut ops = Vec::new();
                for _ in 0..op_count {
                    ops.push(UpdateOp {
                        field_no: reader.u32("field number")?,
                        kind: UpdateOpKind::from_code(reader.u8("update op code")?)?,
                        arg: Field::decode(&mut reader)?,
                    });
                }
                Request::Update(Update {
                    space,
                    flags,
                    key,
                    ops,
                })
            }
            Operation::Call => {
                let flags = WriteFlags::from_bits(reader.u32("flags")?);
                let proc_name = Field::decode(&mut reader)?
                    .as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| {
                        ProtocolError::MalformedBody("procedure name is not UTF-8".to_string())
                    })?;
                Request::Call(Call {
                    flags,
                    proc_name,
                    args: Tuple::decode(&mut reader)?,
                })
            }
        };

        reader.finish("request body")?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CompletionStatus, ErrorCode};
    use crate::frame::{FrameHeader, FRAME_HEADER_SIZE};
    use crate::tuple;

    fn roundtrip(request: Request) {
        let body = Encoder::encode_request_body(&request);
        let decoded = Decoder::decode_request(request.operation(), &body).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_ping_body_is_empty() {
        let frame = Encoder::encode_request(5, &Request::Ping).unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_SIZE);

        let header = FrameHeader::decode(&frame).unwrap();
        assert_eq!(header.op_code, Operation::Ping.code());
        assert_eq!(header.body_len, 0);
        assert_eq!(header.request_id, 5);
    }

    #[test]
    fn test_select_body_layout() {
        let request = Request::from(Select::by_value(7u32).space(1).index(1));
        let body = Encoder::encode_request_body(&request);
        assert_eq!(
            &body[..],
            &[
                1, 0, 0, 0, // space
                1, 0, 0, 0, // index
                0, 0, 0, 0, // offset
                0xFF, 0xFF, 0xFF, 0xFF, // limit
                1, 0, 0, 0, // key count
                1, 0, 0, 0, 4, 7, 0, 0, 0, // key tuple
            ]
        );
    }

    #[test]
    fn test_insert_body_layout() {
        let request = Request::from(Insert::new(tuple![1u32, "v"]).space(2).return_tuple());
        let body = Encoder::encode_request_body(&request);
        assert_eq!(
            &body[..],
            &[2, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 4, 1, 0, 0, 0, 1, b'v']
        );
    }

    #[test]
    fn test_request_bodies_decode_back() {
        roundtrip(Request::Ping);
        roundtrip(Select::by_keys(vec![tuple![1u32], tuple![2u32, "x"]])
            .space(3)
            .offset(10)
            .limit(20)
            .into());
        roundtrip(Insert::new(tuple!["a", 1u64]).space(1).into());
        roundtrip(Delete::new(tuple![9u32]).space(4).return_tuple().into());
        roundtrip(
            Update::new(
                tuple![1u32],
                vec![
                    UpdateOp::set(1, "new"),
                    UpdateOp::add(2, 5u32),
                    UpdateOp::splice(3, 0, 2, "zz"),
                    UpdateOp::delete(4),
                ],
            )
            .space(1)
            .into(),
        );
        roundtrip(Call::new("box.select_range", tuple![0u32, 0u32, 100u32]).into());
    }

    #[test]
    fn test_request_with_trailing_bytes() {
        let mut body = Encoder::encode_request_body(&Insert::new(tuple![1u32]).into());
        body.put_u8(0xAA);
        let result = Decoder::decode_request(Operation::Insert, &body);
        assert!(matches!(result, Err(ProtocolError::MalformedBody(_))));
    }

    #[test]
    fn test_decode_error_response() {
        let mut body = BytesMut::new();
        body.put_u32_le(0x3902);
        body.put_slice(b"Space 15 does not exist\0");

        let response = Decoder::decode_response(ResponseShape::Tuples, &body).unwrap();
        assert!(response.is_error());
        assert_eq!(response.return_code.status(), CompletionStatus::Error);
        assert_eq!(response.return_code.error_code(), ErrorCode::NoSuchSpace);
        assert_eq!(
            response.error_message.as_deref(),
            Some("Space 15 does not exist")
        );
        assert!(response.tuples.is_empty());
    }

    #[test]
    fn test_decode_select_response() {
        let tuples = vec![tuple![1u32, "one"], tuple![2u32, "two"]];
        let body = Encoder::encode_response_body(ResponseShape::Tuples, &Response::ok(tuples.clone()));

        let response = Decoder::decode_response(ResponseShape::Tuples, &body).unwrap();
        assert!(response.is_ok());
        assert_eq!(response.count, 2);
        assert_eq!(response.tuples, tuples);
    }

    #[test]
    fn test_decode_count_response() {
        let body = Encoder::encode_response_body(ResponseShape::Count, &Response::affected(1));
        assert_eq!(&body[..], &[0, 0, 0, 0, 1, 0, 0, 0]);

        let response = Decoder::decode_response(ResponseShape::Count, &body).unwrap();
        assert_eq!(response.count, 1);
        assert!(response.tuples.is_empty());
    }

    #[test]
    fn test_decode_empty_ping_response() {
        let response = Decoder::decode_response(ResponseShape::Empty, &[]).unwrap();
        assert!(response.is_ok());
        assert!(response.tuples.is_empty());

        let result = Decoder::decode_response(ResponseShape::Tuples, &[]);
        assert!(matches!(result, Err(ProtocolError::MalformedBody(_))));
    }

    #[test]
    fn test_tuple_size_overrun() {
        let mut body = BytesMut::new();
        body.put_u32_le(0);
        body.put_u32_le(1);
        body.put_u32_le(64); // declared tuple size
        body.put_slice(&[1, 0, 0, 0, 1, b'x']);

        let result = Decoder::decode_response(ResponseShape::Tuples, &body);
        assert!(matches!(result, Err(ProtocolError::MalformedBody(_))));
    }

    #[test]
    fn test_tuple_size_mismatch() {
        let mut body = BytesMut::new();
        body.put_u32_le(0);
        body.put_u32_le(1);
        body.put_u32_le(7); // one byte more than the tuple occupies
        body.put_slice(&[1, 0, 0, 0, 1, b'x', 0]);

        let result = Decoder::decode_response(ResponseShape::Tuples, &body);
        assert!(matches!(result, Err(ProtocolError::MalformedBody(_))));
    }

    #[test]
    fn test_row_count_exceeds_tuples() {
        let mut body = BytesMut::new();
        body.put_u32_le(0);
        body.put_u32_le(3);

        let result = Decoder::decode_response(ResponseShape::Tuples, &body);
        assert!(matches!(result, Err(ProtocolError::MalformedBody(_))));
    }
}

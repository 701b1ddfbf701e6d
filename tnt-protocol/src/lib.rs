//! # tnt-protocol
//!
//! Wire protocol implementation for tnt, a client of the Tarantool 1.5
//! binary protocol.
//!
//! This crate provides:
//! - Fixed 12-byte little-endian frame headers
//! - Field and tuple encoding (BER varint length prefixes)
//! - Typed request variants and their bodies
//! - Response decoding and server return codes
//!
//! It performs no I/O.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod tuple;

pub use codec::{Decoder, Encoder};
pub use error::{CompletionStatus, ErrorCode, ProtocolError, ReturnCode};
pub use frame::{encode_frame, Frame, FrameHeader, FRAME_HEADER_SIZE};
pub use message::{
    Call, Delete, Insert, Operation, Request, Response, ResponseShape, Select, Update, UpdateOp,
    UpdateOpKind, WriteFlags,
};
pub use tuple::{BodyReader, Field, Tuple};

/// Maximum frame body size (16 MiB).
pub const MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;

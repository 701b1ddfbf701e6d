//! Typed request and response messages.

use crate::error::{CompletionStatus, ErrorCode, ProtocolError, ReturnCode};
use crate::tuple::{Field, Tuple};

/// Operation codes carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Select,
    Update,
    Delete,
    Call,
    Ping,
}

impl Operation {
    pub const fn code(&self) -> u32 {
        match self {
            Operation::Insert => 13,
            Operation::Select => 17,
            Operation::Update => 19,
            Operation::Delete => 21,
            Operation::Call => 22,
            Operation::Ping => 0xFF00,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, ProtocolError> {
        match code {
            13 => Ok(Operation::Insert),
            17 => Ok(Operation::Select),
            19 => Ok(Operation::Update),
            21 => Ok(Operation::Delete),
            22 => Ok(Operation::Call),
            0xFF00 => Ok(Operation::Ping),
            other => Err(ProtocolError::UnknownOperation(other)),
        }
    }
}

/// Flags for write requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteFlags(u32);

impl WriteFlags {
    /// Return the affected tuple(s) in the response.
    pub const RETURN_TUPLE: u32 = 1 << 0;
    /// Insert only if no tuple with the same primary key exists.
    pub const ADD: u32 = 1 << 1;
    /// Insert only if a tuple with the same primary key exists.
    pub const REPLACE: u32 = 1 << 2;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_return_tuple(mut self) -> Self {
        self.0 |= Self::RETURN_TUPLE;
        self
    }

    pub fn with_add(mut self) -> Self {
        self.0 |= Self::ADD;
        self
    }

    pub fn with_replace(mut self) -> Self {
        self.0 |= Self::REPLACE;
        self
    }

    pub fn returns_tuple(&self) -> bool {
        self.0 & Self::RETURN_TUPLE != 0
    }

    pub fn is_add(&self) -> bool {
        self.0 & Self::ADD != 0
    }

    pub fn is_replace(&self) -> bool {
        self.0 & Self::REPLACE != 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

/// Select tuples from `space` whose `index` key matches any of `keys`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Select {
    pub space: u32,
    pub index: u32,
    pub offset: u32,
    /// `None` selects without a limit.
    pub limit: Option<u32>,
    pub keys: Vec<Tuple>,
}

impl Select {
    /// Selects by a single-field key.
    pub fn by_value(value: impl Into<Field>) -> Self {
        Self {
            keys: vec![Tuple::new(vec![value.into()])],
            ..Default::default()
        }
    }

    /// Selects by several keys at once.
    pub fn by_keys(keys: Vec<Tuple>) -> Self {
        Self {
            keys,
            ..Default::default()
        }
    }

    pub fn space(mut self, space: u32) -> Self {
        self.space = space;
        self
    }

    pub fn index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Store a full tuple in `space`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Insert {
    pub space: u32,
    pub flags: WriteFlags,
    pub tuple: Tuple,
}

impl Insert {
    pub fn new(tuple: Tuple) -> Self {
        Self {
            tuple,
            ..Default::default()
        }
    }

    pub fn space(mut self, space: u32) -> Self {
        self.space = space;
        self
    }

    pub fn flags(mut self, flags: WriteFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn return_tuple(mut self) -> Self {
        self.flags = self.flags.with_return_tuple();
        self
    }
}

/// Delete the tuple matching a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Delete {
    pub space: u32,
    pub flags: WriteFlags,
    pub key: Tuple,
}

impl Delete {
    pub fn new(key: Tuple) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    pub fn space(mut self, space: u32) -> Self {
        self.space = space;
        self
    }

    pub fn return_tuple(mut self) -> Self {
        self.flags = self.flags.with_return_tuple();
        self
    }
}

/// Kind of a single update operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOpKind {
    Set,
    Add,
    And,
    Xor,
    Or,
    Splice,
    Delete,
    Insert,
}

impl UpdateOpKind {
    pub fn code(&self) -> u8 {
        match self {
            UpdateOpKind::Set => 0,
            UpdateOpKind::Add => 1,
            UpdateOpKind::And => 2,
            UpdateOpKind::Xor => 3,
            UpdateOpKind::Or => 4,
            UpdateOpKind::Splice => 5,
            UpdateOpKind::Delete => 6,
            UpdateOpKind::Insert => 7,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        Ok(match code {
            0 => UpdateOpKind::Set,
            1 => UpdateOpKind::Add,
            2 => UpdateOpKind::And,
            3 => UpdateOpKind::Xor,
            4 => UpdateOpKind::Or,
            5 => UpdateOpKind::Splice,
            6 => UpdateOpKind::Delete,
            7 => UpdateOpKind::Insert,
            other => {
                return Err(ProtocolError::MalformedBody(format!(
                    "unknown update op code {other}"
                )))
            }
        })
    }
}

/// A single field modification applied by [`Update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOp {
    pub field_no: u32,
    pub kind: UpdateOpKind,
    pub arg: Field,
}

impl UpdateOp {
    pub fn set(field_no: u32, value: impl Into<Field>) -> Self {
        Self::with_kind(field_no, UpdateOpKind::Set, value)
    }

    pub fn add(field_no: u32, value: impl Into<Field>) -> Self {
        Self::with_kind(field_no, UpdateOpKind::Add, value)
    }

    pub fn and(field_no: u32, value: impl Into<Field>) -> Self {
        Self::with_kind(field_no, UpdateOpKind::And, value)
    }

    pub fn xor(field_no: u32, value: impl Into<Field>) -> Self {
        Self::with_kind(field_no, UpdateOpKind::Xor, value)
    }

    pub fn or(field_no: u32, value: impl Into<Field>) -> Self {
        Self::with_kind(field_no, UpdateOpKind::Or, value)
    }

    pub fn insert(field_no: u32, value: impl Into<Field>) -> Self {
        Self::with_kind(field_no, UpdateOpKind::Insert, value)
    }

    pub fn delete(field_no: u32) -> Self {
        Self::with_kind(field_no, UpdateOpKind::Delete, Field::default())
    }

    /// Replaces `length` bytes at `offset` of a field with `replacement`.
    pub fn splice(field_no: u32, offset: u32, length: u32, replacement: impl Into<Field>) -> Self {
        let mut arg = bytes::BytesMut::new();
        Field::from_u32(offset).encode(&mut arg);
        Field::from_u32(length).encode(&mut arg);
        replacement.into().encode(&mut arg);
        Self::with_kind(field_no, UpdateOpKind::Splice, arg.freeze())
    }

    fn with_kind(field_no: u32, kind: UpdateOpKind, arg: impl Into<Field>) -> Self {
        Self {
            field_no,
            kind,
            arg: arg.into(),
        }
    }
}

/// Modify fields of the tuple matching a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Update {
    pub space: u32,
    pub flags: WriteFlags,
    pub key: Tuple,
    pub ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new(key: Tuple, ops: Vec<UpdateOp>) -> Self {
        Self {
            key,
            ops,
            ..Default::default()
        }
    }

    pub fn space(mut self, space: u32) -> Self {
        self.space = space;
        self
    }

    pub fn return_tuple(mut self) -> Self {
        self.flags = self.flags.with_return_tuple();
        self
    }
}

/// Invoke a stored procedure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Call {
    pub flags: WriteFlags,
    pub proc_name: String,
    pub args: Tuple,
}

impl Call {
    pub fn new(proc_name: impl Into<String>, args: Tuple) -> Self {
        Self {
            proc_name: proc_name.into(),
            args,
            ..Default::default()
        }
    }
}

/// One operation addressed to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Call(Call),
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::Ping => Operation::Ping,
            Request::Select(_) => Operation::Select,
            Request::Insert(_) => Operation::Insert,
            Request::Update(_) => Operation::Update,
            Request::Delete(_) => Operation::Delete,
            Request::Call(_) => Operation::Call,
        }
    }

    /// Target space, for operations addressed to one. `0` means unset.
    pub fn space(&self) -> Option<u32> {
        match self {
            Request::Select(r) => Some(r.space),
            Request::Insert(r) => Some(r.space),
            Request::Update(r) => Some(r.space),
            Request::Delete(r) => Some(r.space),
            Request::Ping | Request::Call(_) => None,
        }
    }

    pub fn space_mut(&mut self) -> Option<&mut u32> {
        match self {
            Request::Select(r) => Some(&mut r.space),
            Request::Insert(r) => Some(&mut r.space),
            Request::Update(r) => Some(&mut r.space),
            Request::Delete(r) => Some(&mut r.space),
            Request::Ping | Request::Call(_) => None,
        }
    }

    /// How the response body to this request is laid out.
    pub fn response_shape(&self) -> ResponseShape {
        let flags = match self {
            Request::Ping => return ResponseShape::Empty,
            Request::Select(_) | Request::Call(_) => return ResponseShape::Tuples,
            Request::Insert(r) => r.flags,
            Request::Update(r) => r.flags,
            Request::Delete(r) => r.flags,
        };

        if flags.returns_tuple() {
            ResponseShape::Tuples
        } else {
            ResponseShape::Count
        }
    }
}

impl From<Select> for Request {
    fn from(r: Select) -> Self {
        Request::Select(r)
    }
}

impl From<Insert> for Request {
    fn from(r: Insert) -> Self {
        Request::Insert(r)
    }
}

impl From<Update> for Request {
    fn from(r: Update) -> Self {
        Request::Update(r)
    }
}

impl From<Delete> for Request {
    fn from(r: Delete) -> Self {
        Request::Delete(r)
    }
}

impl From<Call> for Request {
    fn from(r: Call) -> Self {
        Request::Call(r)
    }
}

/// Layout of a successful response body, chosen by the issuing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// No payload (ping).
    Empty,
    /// Affected row count only.
    Count,
    /// Row count followed by that many tuples.
    Tuples,
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    pub return_code: ReturnCode,
    /// Present iff `return_code` is nonzero.
    pub error_message: Option<String>,
    /// Number of affected or matching tuples.
    pub count: u32,
    pub tuples: Vec<Tuple>,
}

impl Response {
    pub fn ok(tuples: Vec<Tuple>) -> Self {
        Self {
            count: tuples.len() as u32,
            tuples,
            ..Default::default()
        }
    }

    pub fn affected(count: u32) -> Self {
        Self {
            count,
            ..Default::default()
        }
    }

    pub fn error(status: CompletionStatus, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            return_code: ReturnCode::new(status, code),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.return_code.is_ok()
    }

    pub fn is_error(&self) -> bool {
        !self.is_ok()
    }
}

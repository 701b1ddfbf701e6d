//! Protocol error types and server error codes.

use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur while framing or decoding bodies.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("malformed frame: need {needed} header bytes, got {available}")]
    MalformedFrame { needed: usize, available: usize },

    #[error("malformed body: {0}")]
    MalformedBody(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("unknown operation code: {0:#x}")]
    UnknownOperation(u32),
}

impl ProtocolError {
    pub(crate) fn truncated(what: &str, needed: usize, available: usize) -> Self {
        ProtocolError::MalformedBody(format!(
            "{what} needs {needed} bytes, {available} remaining"
        ))
    }
}

/// Completion status carried in the low byte of a return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionStatus {
    Ok,
    /// Transient failure, the request may succeed later.
    TryAgain,
    Error,
    Unknown(u8),
}

impl CompletionStatus {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => CompletionStatus::Ok,
            1 => CompletionStatus::TryAgain,
            2 => CompletionStatus::Error,
            other => CompletionStatus::Unknown(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            CompletionStatus::Ok => 0,
            CompletionStatus::TryAgain => 1,
            CompletionStatus::Error => 2,
            CompletionStatus::Unknown(b) => *b,
        }
    }
}

/// Server error codes, carried in the upper 24 bits of a return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Nonmaster,
    IllegalParams,
    Secondary,
    TupleIsReadOnly,
    MemoryIssue,
    TupleNotFound,
    NoSuchProc,
    ProcLua,
    NoSuchIndex,
    NoSuchField,
    TupleFound,
    NoSuchSpace,
    Other(u32),
}

impl ErrorCode {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => ErrorCode::Nonmaster,
            2 => ErrorCode::IllegalParams,
            3 => ErrorCode::Secondary,
            4 => ErrorCode::TupleIsReadOnly,
            7 => ErrorCode::MemoryIssue,
            49 => ErrorCode::TupleNotFound,
            50 => ErrorCode::NoSuchProc,
            51 => ErrorCode::ProcLua,
            53 => ErrorCode::NoSuchIndex,
            54 => ErrorCode::NoSuchField,
            55 => ErrorCode::TupleFound,
            57 => ErrorCode::NoSuchSpace,
            other => ErrorCode::Other(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            ErrorCode::Nonmaster => 1,
            ErrorCode::IllegalParams => 2,
            ErrorCode::Secondary => 3,
            ErrorCode::TupleIsReadOnly => 4,
            ErrorCode::MemoryIssue => 7,
            ErrorCode::TupleNotFound => 49,
            ErrorCode::NoSuchProc => 50,
            ErrorCode::ProcLua => 51,
            ErrorCode::NoSuchIndex => 53,
            ErrorCode::NoSuchField => 54,
            ErrorCode::TupleFound => 55,
            ErrorCode::NoSuchSpace => 57,
            ErrorCode::Other(code) => *code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Nonmaster => write!(f, "ER_NONMASTER"),
            ErrorCode::IllegalParams => write!(f, "ER_ILLEGAL_PARAMS"),
            ErrorCode::Secondary => write!(f, "ER_SECONDARY"),
            ErrorCode::TupleIsReadOnly => write!(f, "ER_TUPLE_IS_RO"),
            ErrorCode::MemoryIssue => write!(f, "ER_MEMORY_ISSUE"),
            ErrorCode::TupleNotFound => write!(f, "ER_TUPLE_NOT_FOUND"),
            ErrorCode::NoSuchProc => write!(f, "ER_NO_SUCH_PROC"),
            ErrorCode::ProcLua => write!(f, "ER_PROC_LUA"),
            ErrorCode::NoSuchIndex => write!(f, "ER_NO_SUCH_INDEX"),
            ErrorCode::NoSuchField => write!(f, "ER_NO_SUCH_FIELD"),
            ErrorCode::TupleFound => write!(f, "ER_TUPLE_FOUND"),
            ErrorCode::NoSuchSpace => write!(f, "ER_NO_SUCH_SPACE"),
            ErrorCode::Other(code) => write!(f, "ER_{code}"),
        }
    }
}

/// A raw 32-bit return code: `code << 8 | status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ReturnCode(pub u32);

impl ReturnCode {
    pub const OK: ReturnCode = ReturnCode(0);

    pub fn new(status: CompletionStatus, code: ErrorCode) -> Self {
        ReturnCode((code.code() << 8) | status.as_byte() as u32)
    }

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    pub fn status(&self) -> CompletionStatus {
        CompletionStatus::from_byte((self.0 & 0xFF) as u8)
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(self.0 >> 8)
    }
}

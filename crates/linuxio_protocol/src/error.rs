//! Protocol error kinds shared by every wire record in this crate.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("bad magic bytes: expected {expected:?}, got {got:?}")]
    BadMagic { expected: [u8; 3], got: [u8; 3] },

    #[error("unsupported protocol version: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("field {field} length {len} exceeds bound {bound}")]
    OversizedField {
        field: &'static str,
        len: usize,
        bound: usize,
    },

    #[error("short read on {field}: expected {expected} bytes, got {got}")]
    ShortRead {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

//! Magic bytes, protocol version, and the bounded-allocation size table.
//!
//! `LIO` + version 1 prefixes every boundary record (AuthRequest,
//! AuthResponse, Bootstrap).

/// `{M0, M1, M2}` magic prefix shared by every boundary record.
pub const MAGIC: [u8; 3] = *b"LIO";

/// Current protocol version.
pub const VERSION: u8 = 1;

pub const MAX_USERNAME: usize = 256;
pub const MAX_PASSWORD: usize = 1024;
pub const MAX_SESSION_ID: usize = 64;
pub const MAX_MOTD: usize = 4096;
pub const MAX_PATH: usize = 4096;

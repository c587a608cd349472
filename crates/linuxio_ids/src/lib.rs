//! Shared identifier wrappers for the LinuxIO privileged-IPC spine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a session id, per the wire protocol's `lenstr` bound.
pub const SESSION_ID_MAX_LEN: usize = 64;

/// Error returned when a session id fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

/// A session identifier: at most [`SESSION_ID_MAX_LEN`] bytes, character
/// class `[A-Za-z0-9_-]`. Carried end to end from the `AuthRequest` through
/// the `Bootstrap` into the bridge's immutable `Session`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a raw session id string.
    pub fn parse(value: &str) -> Result<Self, IdParseError> {
        if value.is_empty() {
            return Err(IdParseError::new("session id must not be empty"));
        }
        if value.len() > SESSION_ID_MAX_LEN {
            return Err(IdParseError::new(format!(
                "session id exceeds {} bytes",
                SESSION_ID_MAX_LEN
            )));
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(IdParseError::new(
                "session id contains characters outside [A-Za-z0-9_-]",
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A yamux stream id, as observed by the bridge when a stream is accepted.
/// Carried only for logging/auditing; the yamux stream object itself is the
/// actual routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(u32);

impl StreamId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

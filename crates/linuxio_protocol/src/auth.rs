//! `AuthRequest` / `AuthResponse` wire records.

use crate::error::{ProtocolError, Result};
use crate::framing::{explicit_zero_string, read_exact, read_lenstr, write_lenstr};
use crate::limits::{MAGIC, MAX_PASSWORD, MAX_SESSION_ID, MAX_USERNAME, VERSION};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

const REQUEST_FLAG_VERBOSE: u8 = 0x01;

/// One authentication request, read once by the broker.
///
/// `password` is zeroed on [`Drop`] so it never outlives the PAM
/// conversation that consumes it.
pub struct AuthRequest {
    pub verbose: bool,
    pub username: String,
    pub password: String,
    pub session_id: String,
}

impl Drop for AuthRequest {
    fn drop(&mut self) {
        let taken = std::mem::take(&mut self.password);
        explicit_zero_string(taken);
    }
}

impl AuthRequest {
    pub fn read(r: &mut impl Read) -> Result<Self> {
        read_magic_version(r)?;

        let flags = r.read_u8()?;
        let mut reserved = [0u8; 2];
        read_exact(r, "reserved", &mut reserved)?;

        let username = read_lenstr(r, "username", MAX_USERNAME)?;
        let password = read_lenstr(r, "password", MAX_PASSWORD)?;
        let session_id = read_lenstr(r, "session_id", MAX_SESSION_ID)?;

        Ok(Self {
            verbose: flags & REQUEST_FLAG_VERBOSE != 0,
            username,
            password,
            session_id,
        })
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&MAGIC)?;
        w.write_u8(VERSION)?;
        let flags = if self.verbose { REQUEST_FLAG_VERBOSE } else { 0 };
        w.write_u8(flags)?;
        w.write_all(&[0u8, 0u8])?;
        write_lenstr(w, &self.username)?;
        write_lenstr(w, &self.password)?;
        write_lenstr(w, &self.session_id)?;
        Ok(())
    }
}

/// Status byte of an [`AuthResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthStatus {
    Ok = 1,
    Error = 2,
}

/// Mode byte of an [`AuthResponse`]; meaningful only when status is `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthMode {
    Unpriv = 1,
    Priv = 2,
}

pub struct AuthResponse {
    pub status: AuthStatus,
    pub mode: AuthMode,
    /// MOTD when `status == Ok`, human-readable error text when `status == Error`.
    pub body: String,
}

impl AuthResponse {
    pub fn ok(mode: AuthMode, motd: impl Into<String>) -> Self {
        Self {
            status: AuthStatus::Ok,
            mode,
            body: motd.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: AuthStatus::Error,
            mode: AuthMode::Unpriv,
            body: message.into(),
        }
    }

    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&MAGIC)?;
        w.write_u8(VERSION)?;
        w.write_u8(self.status as u8)?;
        w.write_u8(self.mode as u8)?;
        w.write_all(&[0u8, 0u8])?;
        write_lenstr(w, &self.body)?;
        Ok(())
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn read(r: &mut impl Read) -> Result<Self> {
        read_magic_version(r)?;
        let status_byte = r.read_u8()?;
        let mode_byte = r.read_u8()?;
        let mut reserved = [0u8; 2];
        read_exact(r, "reserved", &mut reserved)?;
        let body = read_lenstr(r, "body", crate::limits::MAX_MOTD)?;

        let status = match status_byte {
            1 => AuthStatus::Ok,
            2 => AuthStatus::Error,
            other => return Err(ProtocolError::InvalidOpcode(other)),
        };
        let mode = match mode_byte {
            2 => AuthMode::Priv,
            _ => AuthMode::Unpriv,
        };

        Ok(Self { status, mode, body })
    }
}

/// Read and validate the shared magic+version prefix used by AuthRequest,
/// AuthResponse, and Bootstrap.
pub(crate) fn read_magic_version(r: &mut impl Read) -> Result<()> {
    let mut magic = [0u8; 3];
    read_exact(r, "magic", &mut magic)?;
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic {
            expected: MAGIC,
            got: magic,
        });
    }
    let version = r.read_u8()?;
    if version != VERSION {
        return Err(ProtocolError::VersionMismatch {
            expected: VERSION,
            got: version,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_request() -> AuthRequest {
        AuthRequest {
            verbose: true,
            username: "alice".into(),
            password: "correcthorse".into(),
            session_id: "sess-001".into(),
        }
    }

    #[test]
    fn request_roundtrip() {
        let req = sample_request();
        let mut buf = Vec::new();
        req.write(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = AuthRequest::read(&mut cursor).unwrap();
        assert!(decoded.verbose);
        assert_eq!(decoded.username, "alice");
        assert_eq!(decoded.password, "correcthorse");
        assert_eq!(decoded.session_id, "sess-001");
    }

    #[test]
    fn request_rejects_bad_magic() {
        let mut buf = vec![0x00, 0x00, 0x00, VERSION];
        buf.extend_from_slice(&[0, 0, 0]);
        let mut cursor = Cursor::new(buf);
        let err = AuthRequest::read(&mut cursor).unwrap_err();
        assert!(matches!(err, ProtocolError::BadMagic { .. }));
    }

    #[test]
    fn request_rejects_bad_version() {
        let mut buf = MAGIC.to_vec();
        buf.push(0xFF);
        buf.extend_from_slice(&[0, 0, 0]);
        let mut cursor = Cursor::new(buf);
        let err = AuthRequest::read(&mut cursor).unwrap_err();
        assert!(matches!(err, ProtocolError::VersionMismatch { .. }));
    }

    #[test]
    fn request_rejects_oversized_username_without_reading_body() {
        let mut buf = MAGIC.to_vec();
        buf.push(VERSION);
        buf.push(0); // flags
        buf.extend_from_slice(&[0, 0]); // reserved
        buf.extend_from_slice(&300u16.to_be_bytes()); // oversized username length
        let mut cursor = Cursor::new(buf);
        let err = AuthRequest::read(&mut cursor).unwrap_err();
        assert!(matches!(err, ProtocolError::OversizedField { field: "username", .. }));
    }

    #[test]
    fn response_roundtrip_ok() {
        let resp = AuthResponse::ok(AuthMode::Priv, "welcome back");
        let mut buf = Vec::new();
        resp.write(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = AuthResponse::read(&mut cursor).unwrap();
        assert_eq!(decoded.status, AuthStatus::Ok);
        assert_eq!(decoded.mode, AuthMode::Priv);
        assert_eq!(decoded.body, "welcome back");
    }

    #[test]
    fn response_roundtrip_error() {
        let resp = AuthResponse::error("Authentication failure");
        let mut buf = Vec::new();
        resp.write(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = AuthResponse::read(&mut cursor).unwrap();
        assert_eq!(decoded.status, AuthStatus::Error);
        assert_eq!(decoded.body, "Authentication failure");
    }
}

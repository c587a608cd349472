//! Low-level read/write primitives shared by every wire record.
//!
//! Implements read-all semantics (a short read is a protocol error, never
//! a partial success), bounded allocation for every length-prefixed
//! string, and write-all semantics. `std::io::Read::read_exact`/
//! `Write::write_all` already retry on `ErrorKind::Interrupted`
//! internally, which gives us EINTR-retry behaviour without a manual loop.

use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Read exactly `buf.len()` bytes, or fail with [`ProtocolError::ShortRead`].
pub fn read_exact(r: &mut impl Read, field: &'static str, buf: &mut [u8]) -> Result<()> {
    match r.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProtocolError::ShortRead {
            field,
            expected: buf.len(),
            got: 0,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Read a length-prefixed string (`u16` big-endian length + UTF-8 bytes),
/// rejecting (without reading the body) any length prefix `>= bound`.
pub fn read_lenstr(r: &mut impl Read, field: &'static str, bound: usize) -> Result<String> {
    let len = r.read_u16::<BigEndian>()? as usize;
    if len >= bound {
        return Err(ProtocolError::OversizedField { field, len, bound });
    }
    let mut buf = vec![0u8; len];
    read_exact(r, field, &mut buf)?;
    String::from_utf8(buf).map_err(|_| ProtocolError::InvalidUtf8 { field })
}

/// Write a length-prefixed string. Callers are responsible for ensuring
/// `value.len()` fits a `u16`; this is only ever called with bounded,
/// locally-constructed strings.
pub fn write_lenstr(w: &mut impl Write, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    debug_assert!(bytes.len() <= u16::MAX as usize);
    w.write_u16::<BigEndian>(bytes.len() as u16)?;
    w.write_all(bytes)?;
    Ok(())
}

/// Zero a buffer in place. Used after passwords have made their final trip
/// from socket to PAM, so no debugger-visible residue survives.
pub fn explicit_zero(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        unsafe { std::ptr::write_volatile(b, 0) };
    }
    std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
}

/// Zero the bytes backing a `String` in place, then drop it.
pub fn explicit_zero_string(mut s: String) {
    unsafe {
        explicit_zero(s.as_bytes_mut());
    }
    drop(s);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn lenstr_roundtrip() {
        let mut buf = Vec::new();
        write_lenstr(&mut buf, "alice").unwrap();
        let mut cursor = Cursor::new(buf);
        let out = read_lenstr(&mut cursor, "username", 256).unwrap();
        assert_eq!(out, "alice");
    }

    #[test]
    fn lenstr_rejects_oversized_prefix_without_reading_body() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&300u16.to_be_bytes());
        // Deliberately do not append 300 bytes of body.
        let mut cursor = Cursor::new(buf);
        let err = read_lenstr(&mut cursor, "username", 256).unwrap_err();
        assert!(matches!(err, ProtocolError::OversizedField { .. }));
    }

    #[test]
    fn short_read_is_an_error_not_a_partial_success() {
        let mut cursor = Cursor::new(vec![0u8; 2]);
        let mut out = [0u8; 4];
        let err = read_exact(&mut cursor, "magic", &mut out).unwrap_err();
        assert!(matches!(err, ProtocolError::ShortRead { .. }));
    }

    #[test]
    fn explicit_zero_clears_buffer() {
        let mut buf = b"hunter2!".to_vec();
        explicit_zero(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }
}

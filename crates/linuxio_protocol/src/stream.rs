//! Stream frame wire format: the per-stream record carried inside a yamux
//! stream once the session is established.

use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Maximum frame payload accepted from a peer (16 MiB). The
/// bounded-allocation guarantee applies to every length-prefixed record,
/// including stream frames.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Open = 0x01,
    Data = 0x02,
    Close = 0x03,
    Result = 0x04,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Opcode::Open),
            0x02 => Ok(Opcode::Data),
            0x03 => Ok(Opcode::Close),
            0x04 => Ok(Opcode::Result),
            other => Err(ProtocolError::InvalidOpcode(other)),
        }
    }
}

/// One frame: `opcode(u8) + stream_id(u32) + length(u32) + payload[length]`.
#[derive(Debug, Clone)]
pub struct StreamFrame {
    pub opcode: Opcode,
    pub stream_id: u32,
    pub payload: Vec<u8>,
}

impl StreamFrame {
    pub fn new(opcode: Opcode, stream_id: u32, payload: Vec<u8>) -> Self {
        Self {
            opcode,
            stream_id,
            payload,
        }
    }

    /// Pack the 9-byte header; caller writes `payload` separately so large
    /// payloads (PTY data) don't require an extra copy.
    pub fn pack_header(&self) -> [u8; 9] {
        let mut buf = [0u8; 9];
        let mut cursor = Cursor::new(&mut buf[..]);
        cursor.write_u8(self.opcode as u8).unwrap();
        cursor.write_u32::<BigEndian>(self.stream_id).unwrap();
        cursor.write_u32::<BigEndian>(self.payload.len() as u32).unwrap();
        buf
    }

    pub fn unpack_header(buf: &[u8; 9]) -> Result<(Opcode, u32, u32)> {
        let mut cursor = Cursor::new(&buf[..]);
        let opcode = Opcode::from_u8(cursor.read_u8()?)?;
        let stream_id = cursor.read_u32::<BigEndian>()?;
        let len = cursor.read_u32::<BigEndian>()?;
        if len as usize > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::OversizedField {
                field: "stream_frame.payload",
                len: len as usize,
                bound: MAX_FRAME_PAYLOAD,
            });
        }
        Ok((opcode, stream_id, len))
    }
}

/// `OPEN` payload: `streamType '\0' arg1 '\0' arg2 ...`.
pub fn encode_open_payload(stream_type: &str, args: &[impl AsRef<str>]) -> Vec<u8> {
    let mut parts = vec![stream_type.to_string()];
    parts.extend(args.iter().map(|a| a.as_ref().to_string()));
    parts.join("\0").into_bytes()
}

/// Split an `OPEN` payload into `(streamType, args)`.
pub fn decode_open_payload(payload: &[u8]) -> Result<(String, Vec<String>)> {
    let text =
        std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8 { field: "open_payload" })?;
    let mut parts = text.split('\0');
    let stream_type = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(ProtocolError::InvalidUtf8 { field: "open_payload.stream_type" })?
        .to_string();
    let args = parts.map(|s| s.to_string()).collect();
    Ok((stream_type, args))
}

/// Status reported by a [`ResultFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Error,
}

/// Emitted at most once per stream, inside a `RESULT` frame's payload,
/// strictly before that stream's `CLOSE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFrame {
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ResultFrame {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: ResultStatus::Ok,
            code: None,
            error: None,
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>, code: Option<u16>) -> Self {
        Self {
            status: ResultStatus::Error,
            code,
            error: Some(message.into()),
            data: None,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Transport(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_roundtrip() {
        let frame = StreamFrame::new(Opcode::Data, 42, b"hello".to_vec());
        let header = frame.pack_header();
        let (opcode, stream_id, len) = StreamFrame::unpack_header(&header).unwrap();
        assert_eq!(opcode, Opcode::Data);
        assert_eq!(stream_id, 42);
        assert_eq!(len as usize, frame.payload.len());
    }

    #[test]
    fn rejects_oversized_payload_length() {
        let mut buf = [0u8; 9];
        buf[0] = Opcode::Data as u8;
        buf[5..9].copy_from_slice(&(MAX_FRAME_PAYLOAD as u32 + 1).to_be_bytes());
        assert!(StreamFrame::unpack_header(&buf).is_err());
    }

    #[test]
    fn open_payload_roundtrip() {
        let payload = encode_open_payload("terminal", &["24", "80"]);
        let (stream_type, args) = decode_open_payload(&payload).unwrap();
        assert_eq!(stream_type, "terminal");
        assert_eq!(args, vec!["24", "80"]);
    }

    #[test]
    fn open_payload_no_args() {
        let payload = encode_open_payload("api", &["system", "get_uptime"]);
        let (stream_type, args) = decode_open_payload(&payload).unwrap();
        assert_eq!(stream_type, "api");
        assert_eq!(args, vec!["system", "get_uptime"]);
    }

    #[test]
    fn result_frame_json_roundtrip() {
        let rf = ResultFrame::ok(serde_json::json!({"uptime": 123}));
        let payload = rf.to_payload().unwrap();
        let decoded = ResultFrame::from_payload(&payload).unwrap();
        assert_eq!(decoded.status, ResultStatus::Ok);
        assert_eq!(decoded.data.unwrap()["uptime"], 123);
    }

    #[test]
    fn result_frame_error_roundtrip() {
        let rf = ResultFrame::error("boom", Some(500));
        let payload = rf.to_payload().unwrap();
        let decoded = ResultFrame::from_payload(&payload).unwrap();
        assert_eq!(decoded.status, ResultStatus::Error);
        assert_eq!(decoded.code, Some(500));
        assert_eq!(decoded.error.as_deref(), Some("boom"));
    }
}

//! Per-stream framed I/O. A handler is handed one [`StreamConn`] and owns
//! it exclusively until it emits `CLOSE`.

use linuxio_protocol::{Opcode, ProtocolError, StreamFrame};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Wraps one yamux-stream-shaped duplex (anything `AsyncRead + AsyncWrite`)
/// with the stream-frame wire format. Generic so tests can drive handlers
/// over an in-memory duplex instead of a real yamux stream.
pub struct StreamConn<S> {
    inner: S,
    stream_id: u32,
}

impl<S> StreamConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(inner: S, stream_id: u32) -> Self {
        Self { inner, stream_id }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Reads the next frame. A short read on the header or body is a
    /// `ProtocolError`, never a partial frame.
    pub async fn read_frame(&mut self) -> Result<StreamFrame, ProtocolError> {
        let mut header = [0u8; 9];
        self.inner.read_exact(&mut header).await?;
        let (opcode, stream_id, len) = StreamFrame::unpack_header(&header)?;

        let mut payload = vec![0u8; len as usize];
        self.inner.read_exact(&mut payload).await?;

        Ok(StreamFrame::new(opcode, stream_id, payload))
    }

    async fn write_frame(&mut self, opcode: Opcode, payload: Vec<u8>) -> Result<(), ProtocolError> {
        let frame = StreamFrame::new(opcode, self.stream_id, payload);
        let header = frame.pack_header();
        self.inner.write_all(&header).await?;
        self.inner.write_all(&frame.payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn write_data(&mut self, payload: Vec<u8>) -> Result<(), ProtocolError> {
        self.write_frame(Opcode::Data, payload).await
    }

    pub async fn write_result(&mut self, payload: Vec<u8>) -> Result<(), ProtocolError> {
        self.write_frame(Opcode::Result, payload).await
    }

    pub async fn write_close(&mut self) -> Result<(), ProtocolError> {
        self.write_frame(Opcode::Close, Vec::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linuxio_protocol::ResultFrame;
    use tokio::io::duplex;

    #[tokio::test]
    async fn write_then_read_frame_roundtrips() {
        let (a, b) = duplex(4096);
        let mut writer = StreamConn::new(a, 7);
        let mut reader = StreamConn::new(b, 7);

        writer.write_data(b"hello".to_vec()).await.unwrap();
        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.opcode, Opcode::Data);
        assert_eq!(frame.stream_id, 7);
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn result_then_close_ordering_is_preserved() {
        let (a, b) = duplex(4096);
        let mut writer = StreamConn::new(a, 1);
        let mut reader = StreamConn::new(b, 1);

        let result = ResultFrame::ok(serde_json::json!({"ok": true}));
        writer.write_result(result.to_payload().unwrap()).await.unwrap();
        writer.write_close().await.unwrap();

        let first = reader.read_frame().await.unwrap();
        assert_eq!(first.opcode, Opcode::Result);
        let second = reader.read_frame().await.unwrap();
        assert_eq!(second.opcode, Opcode::Close);
    }
}

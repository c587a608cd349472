//! Stream handler: JSON-API. `args = [handlerType, command,
//! ...handlerArgs]`; looks up a typed command handler and turns its
//! outcome into exactly one `RESULT` followed by `CLOSE`.

use crate::conn::StreamConn;
use crate::registry::{HandlerError, StreamHandler};
use crate::session::Session;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use linuxio_protocol::ResultFrame;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// `(handlerType, command, handlerArgs) -> serde_json::Value` business
/// logic. Concrete command handlers (package management, WireGuard, Docker,
/// ...) are wired in by the binary that constructs the registry; this crate
/// only owns the dispatch contract.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn call(
        &self,
        session: &Session,
        command: &str,
        args: &[String],
    ) -> Result<serde_json::Value, String>;
}

/// Maps `handlerType` to a [`CommandHandler`]. Built once, read-only.
#[derive(Default)]
pub struct JsonApiHandler {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl JsonApiHandler {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, handler_type: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.insert(handler_type.into(), handler);
        self
    }
}

#[async_trait]
impl<S> StreamHandler<S> for JsonApiHandler
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn handle(
        &self,
        session: Arc<Session>,
        mut conn: StreamConn<S>,
        args: Vec<String>,
        _shutdown: Shutdown,
    ) -> Result<(), HandlerError> {
        let result = match dispatch(&self.handlers, &session, &args).await {
            Ok(data) => ResultFrame::ok(data),
            Err(message) => ResultFrame::error(message, Some(400)),
        };

        conn.write_result(result.to_payload()?).await?;
        conn.write_close().await?;
        Ok(())
    }
}

async fn dispatch(
    handlers: &HashMap<String, Arc<dyn CommandHandler>>,
    session: &Session,
    args: &[String],
) -> Result<serde_json::Value, String> {
    let handler_type = args.first().ok_or("missing handlerType argument")?;
    let command = args.get(1).ok_or("missing command argument")?;
    let handler_args = args.get(2..).unwrap_or(&[]);

    let handler = handlers
        .get(handler_type)
        .ok_or_else(|| format!("unknown handler type: {handler_type}"))?;

    handler.call(session, command, handler_args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionUser;
    use linuxio_ids::SessionId;
    use tokio::io::DuplexStream;

    struct EchoUptime;

    #[async_trait]
    impl CommandHandler for EchoUptime {
        async fn call(
            &self,
            _session: &Session,
            command: &str,
            _args: &[String],
        ) -> Result<serde_json::Value, String> {
            if command == "get_uptime" {
                Ok(serde_json::json!(12345))
            } else {
                Err(format!("unknown command: {command}"))
            }
        }
    }

    fn fake_session() -> Arc<Session> {
        Arc::new(Session::new(
            SessionId::parse("sess-test").unwrap(),
            SessionUser {
                name: "alice".into(),
                uid: 1000,
                gid: 1000,
            },
            true,
            false,
        ))
    }

    #[tokio::test]
    async fn successful_command_emits_result_then_close() {
        let handler: JsonApiHandler = JsonApiHandler::new().register("system", Arc::new(EchoUptime));
        let (a, b) = tokio::io::duplex(4096);
        let mut reader: StreamConn<DuplexStream> = StreamConn::new(b, 1);
        let conn: StreamConn<DuplexStream> = StreamConn::new(a, 1);
        let (_handle, shutdown) = crate::shutdown::channel();

        let args = vec!["system".to_string(), "get_uptime".to_string()];
        <JsonApiHandler as StreamHandler<DuplexStream>>::handle(&handler, fake_session(), conn, args, shutdown)
            .await
            .unwrap();

        let result_frame = reader.read_frame().await.unwrap();
        assert_eq!(result_frame.opcode, linuxio_protocol::Opcode::Result);
        let parsed = ResultFrame::from_payload(&result_frame.payload).unwrap();
        assert_eq!(parsed.data.unwrap(), serde_json::json!(12345));

        let close_frame = reader.read_frame().await.unwrap();
        assert_eq!(close_frame.opcode, linuxio_protocol::Opcode::Close);
    }

    #[tokio::test]
    async fn unknown_handler_type_emits_error_result() {
        let handler: JsonApiHandler = JsonApiHandler::new();
        let (a, b) = tokio::io::duplex(4096);
        let mut reader: StreamConn<DuplexStream> = StreamConn::new(b, 1);
        let conn: StreamConn<DuplexStream> = StreamConn::new(a, 1);
        let (_handle, shutdown) = crate::shutdown::channel();

        let args = vec!["bogus".to_string(), "noop".to_string()];
        <JsonApiHandler as StreamHandler<DuplexStream>>::handle(&handler, fake_session(), conn, args, shutdown)
            .await
            .unwrap();

        let result_frame = reader.read_frame().await.unwrap();
        let parsed = ResultFrame::from_payload(&result_frame.payload).unwrap();
        assert_eq!(parsed.status, linuxio_protocol::ResultStatus::Error);
    }
}

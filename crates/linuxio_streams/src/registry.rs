//! Stream type -> handler registry. Populated once at startup, read-only
//! thereafter.

use crate::conn::StreamConn;
use crate::session::Session;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Distinguished from ordinary handler failures: the framework suppresses
/// this one in logs.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("aborted")]
    Aborted,
    #[error("{0}")]
    Other(String),
}

impl From<linuxio_protocol::ProtocolError> for HandlerError {
    fn from(e: linuxio_protocol::ProtocolError) -> Self {
        HandlerError::Other(e.to_string())
    }
}

/// One entry in the registry. `S` is the duplex type every stream in a
/// given bridge process shares (in production, a yamux stream).
#[async_trait]
pub trait StreamHandler<S>: Send + Sync
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn handle(
        &self,
        session: Arc<Session>,
        conn: StreamConn<S>,
        args: Vec<String>,
        shutdown: Shutdown,
    ) -> Result<(), HandlerError>;
}

/// Built once via [`RegistryBuilder`] at startup; `lookup` is the only
/// operation available afterward, matching the spec's "populated once,
/// read-only thereafter" contract.
pub struct Registry<S> {
    handlers: HashMap<String, Arc<dyn StreamHandler<S>>>,
}

impl<S> Registry<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn lookup(&self, stream_type: &str) -> Option<Arc<dyn StreamHandler<S>>> {
        self.handlers.get(stream_type).cloned()
    }
}

#[derive(Default)]
pub struct RegistryBuilder<S> {
    handlers: HashMap<String, Arc<dyn StreamHandler<S>>>,
}

impl<S> RegistryBuilder<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, stream_type: impl Into<String>, handler: Arc<dyn StreamHandler<S>>) -> Self {
        self.handlers.insert(stream_type.into(), handler);
        self
    }

    pub fn build(self) -> Registry<S> {
        Registry {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionUser;
    use linuxio_ids::SessionId;
    use tokio::io::DuplexStream;

    struct EchoHandler;

    #[async_trait]
    impl StreamHandler<DuplexStream> for EchoHandler {
        async fn handle(
            &self,
            _session: Arc<Session>,
            mut conn: StreamConn<DuplexStream>,
            _args: Vec<String>,
            _shutdown: Shutdown,
        ) -> Result<(), HandlerError> {
            conn.write_close().await?;
            Ok(())
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
            false,
            false,
        ))
    }

    #[test]
    fn lookup_finds_registered_handler() {
        let registry: Registry<DuplexStream> = RegistryBuilder::new()
            .register("echo", Arc::new(EchoHandler))
            .build();
        assert!(registry.lookup("echo").is_some());
        assert!(registry.lookup("missing").is_none());
    }

    #[tokio::test]
    async fn registered_handler_runs() {
        let registry: Registry<DuplexStream> = RegistryBuilder::new()
            .register("echo", Arc::new(EchoHandler))
            .build();
        let handler = registry.lookup("echo").unwrap();
        let (a, b) = tokio::io::duplex(64);
        let conn = StreamConn::new(a, 1);
        let (_tx, rx) = crate::shutdown::channel();
        handler
            .handle(fake_session(), conn, vec![], rx)
            .await
            .unwrap();
        drop(b);
    }
}

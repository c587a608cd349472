//! Stream dispatch contract for the LinuxIO bridge: a registry mapping
//! `streamType` to handler, plus the two reference handlers (PTY terminal,
//! JSON-API) everything domain-specific sits behind.

pub mod conn;
pub mod handlers;
pub mod registry;
pub mod ringbuffer;
pub mod session;
pub mod shutdown;

pub use conn::StreamConn;
pub use registry::{HandlerError, Registry, RegistryBuilder, StreamHandler};
pub use session::{Session, SessionUser};
pub use shutdown::{channel as shutdown_channel, Shutdown, ShutdownHandle};

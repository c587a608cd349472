//! LinuxIO privileged-IPC wire protocol.
//!
//! Three binary record families cross process boundaries:
//!
//! - [`auth::AuthRequest`] / [`auth::AuthResponse`] — broker <-> front server,
//!   over the accepted Unix socket, before the bridge exists.
//! - [`bootstrap::Bootstrap`] — broker -> bridge, over stdin, exactly once.
//! - [`stream::StreamFrame`] / [`stream::ResultFrame`] — front server <->
//!   bridge, over yamux streams, for the lifetime of the session.
//!
//! All integers are big-endian. Every length-prefixed string is bounded at
//! read time (see [`limits`]) and a short read is a protocol error, never a
//! partial success — see [`framing`].

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod framing;
pub mod limits;
pub mod stream;

pub use auth::{AuthMode, AuthRequest, AuthResponse, AuthStatus};
pub use bootstrap::Bootstrap;
pub use error::{ProtocolError, Result};
pub use limits::{MAGIC, VERSION};
pub use stream::{
    decode_open_payload, encode_open_payload, Opcode, ResultFrame, ResultStatus, StreamFrame,
};

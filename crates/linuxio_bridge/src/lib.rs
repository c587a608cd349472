//! Bridge worker runtime: consumes a binary bootstrap on stdin, adopts the
//! inherited client socket, runs a yamux session over it, and dispatches
//! streams through `linuxio_streams`'s registry.

pub mod config;
pub mod fdio;
pub mod runtime;

pub use config::BridgeConfig;
pub use runtime::{run_session, YamuxStream};

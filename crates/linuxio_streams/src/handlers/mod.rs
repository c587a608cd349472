pub mod jsonapi;
pub mod pty;

pub use jsonapi::{CommandHandler, JsonApiHandler};
pub use pty::PtyHandler;

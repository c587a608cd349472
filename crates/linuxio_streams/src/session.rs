//! Immutable per-connection session state.

use linuxio_ids::SessionId;

/// The authenticated user the bridge is acting on behalf of.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

/// Built once from the bootstrap record and handed to every stream handler.
/// Nothing in here changes for the lifetime of the bridge process.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub user: SessionUser,
    pub privileged: bool,
    pub verbose: bool,
}

impl Session {
    pub fn new(session_id: SessionId, user: SessionUser, privileged: bool, verbose: bool) -> Self {
        Self {
            session_id,
            user,
            privileged,
            verbose,
        }
    }
}

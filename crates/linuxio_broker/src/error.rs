//! Error kinds owned by the broker: everything around
//! spawning and handing off the bridge child, plus the aggregate type
//! each step of the flow returns.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpawnFailure {
    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),
    #[error("dup2 failed: {0}")]
    Dup2(#[source] nix::Error),
    #[error("failed to set resource limits: {0}")]
    ResourceLimit(#[source] nix::Error),
    #[error("exec failed: {0}")]
    Exec(String),
    #[error("timed out waiting for bridge exec status")]
    ExecTimeout,
    #[error("bridge wrote an exec-failure byte to the status pipe")]
    StartupByte,
}

/// Every failure a single request can hit, from wire parsing through
/// waiting on the exec-status pipe. Every variant maps to a
/// human-readable `AuthResponse` body.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error(transparent)]
    Protocol(#[from] linuxio_protocol::ProtocolError),
    #[error(transparent)]
    Auth(#[from] linuxio_security::AuthFailure),
    #[error(transparent)]
    UserLookup(#[from] linuxio_security::UserLookupFailure),
    #[error(transparent)]
    BridgeValidation(#[from] linuxio_security::BridgeValidationFailure),
    #[error(transparent)]
    Spawn(#[from] SpawnFailure),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("peer is not authorized to use this socket")]
    PeerNotAuthorized,
}

impl BrokerError {
    /// Text written into the `AuthResponse` error body. Deliberately
    /// terse and free of internal detail for anything PAM-adjacent.
    pub fn response_body(&self) -> String {
        match self {
            BrokerError::Auth(linuxio_security::AuthFailure::InvalidCredential) => {
                "Authentication failure".to_string()
            }
            BrokerError::Auth(linuxio_security::AuthFailure::AccountDisabled) => {
                "Account disabled".to_string()
            }
            BrokerError::Auth(linuxio_security::AuthFailure::PasswordExpired) => {
                "Password has expired.".to_string()
            }
            BrokerError::BridgeValidation(_) => "bridge validation failed".to_string(),
            other => other.to_string(),
        }
    }
}

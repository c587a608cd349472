//! Error kinds owned by this crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthFailure {
    #[error("invalid credentials")]
    InvalidCredential,
    #[error("account disabled")]
    AccountDisabled,
    #[error("password has expired")]
    PasswordExpired,
    #[error("PAM internal error: {0}")]
    PamInternal(String),
}

#[derive(Error, Debug)]
#[error("no such user")]
pub struct UserLookupFailure;

#[derive(Error, Debug)]
pub enum BridgeValidationFailure {
    #[error("bridge binary is not a regular file")]
    NotRegular,
    #[error("bridge binary has unexpected owner (uid {0})")]
    BadOwner(u32),
    #[error("bridge binary or its parent directory is group/world-writable")]
    Writable,
    #[error("bridge binary is not executable")]
    NotExecutable,
    #[error("bridge binary has a setuid or setgid bit set")]
    SetuidBit,
    #[error("bridge binary's parent directory fails ownership policy")]
    ParentDirPolicy,
    #[error("i/o error validating bridge binary: {0}")]
    Io(#[from] std::io::Error),
    #[error("bridge binary path resolution error: {0}")]
    Nix(#[from] nix::Error),
}

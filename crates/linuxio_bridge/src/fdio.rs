//! Adopting the broker-handed file descriptors: the client socket on FD 3
//! is taken over by value, never `dup`'d, so the bridge is the sole owner
//! from the moment it's wrapped.

use std::os::unix::io::{FromRawFd, RawFd};

/// FD layout fixed by the broker's dup2 fixups.
pub const CLIENT_SOCKET_FD: RawFd = 3;

/// Wraps FD 3 as a `tokio::net::UnixStream`, taking ownership of the raw
/// fd. The broker set 30s/10s auth-phase read/write timeouts on this
/// socket; they're cleared here since the Yamux session that follows is
/// long-lived.
pub fn adopt_client_socket() -> std::io::Result<tokio::net::UnixStream> {
    // SAFETY: the broker guarantees FD 3 is a valid, already-accepted
    // `AF_UNIX` stream socket in this process's fd table, not shared with
    // any other owner.
    let std_stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(CLIENT_SOCKET_FD) };
    std_stream.set_read_timeout(None)?;
    std_stream.set_write_timeout(None)?;
    std_stream.set_nonblocking(true)?;
    tokio::net::UnixStream::from_std(std_stream)
}

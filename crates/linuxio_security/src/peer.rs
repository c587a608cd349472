//! Peer credential checks on the accepted Unix socket: the connecting
//! process must run as uid 0, or as a member of the configured
//! bridge-socket group.

use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use nix::unistd::Uid;
use std::os::unix::io::AsRawFd;

/// Returns `true` if the peer on `socket` is uid 0 or belongs to `group`,
/// either as primary gid or via the group's member list.
pub fn peer_is_authorized(socket: &impl AsRawFd, group: &str) -> std::io::Result<bool> {
    let creds = getsockopt(socket, PeerCredentials)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;

    if creds.uid() == 0 {
        return Ok(true);
    }

    let Some(group) =
        nix::unistd::Group::from_name(group).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?
    else {
        return Ok(false);
    };

    if creds.gid() == group.gid.as_raw() {
        return Ok(true);
    }

    Ok(user_name(creds.uid())
        .map(|name| group.mem.contains(&name))
        .unwrap_or(false))
}

fn user_name(uid: u32) -> Option<String> {
    nix::unistd::User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|user| user.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_name_resolves_root() {
        assert_eq!(user_name(0).as_deref(), Some("root"));
    }

    #[test]
    fn user_name_is_none_for_unallocated_uid() {
        assert_eq!(user_name(u32::MAX - 1), None);
    }
}

//! Bridge binary validation: the broker must not exec an
//! attacker-writable binary. Everything here operates on an
//! already-open file descriptor (opened `O_PATH`, stat'd via `/proc`) so a
//! symlink swap between "check" and "exec" cannot change what actually
//! gets run — the broker later execs the very fd it validated here.

use crate::error::BridgeValidationFailure;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::{fstat, Mode};
use nix::unistd::{close, getuid};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

type Result<T> = std::result::Result<T, BridgeValidationFailure>;

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_ISUID: u32 = 0o4000;
const S_ISGID: u32 = 0o2000;
const S_IWGRP: u32 = 0o020;
const S_IWOTH: u32 = 0o002;
const S_IXUSR: u32 = 0o100;

/// Opens `path` with `O_PATH | O_NOFOLLOW` and validates it in place:
/// regular file, owned by `expected_owner` (normally uid 0 or the broker's
/// own uid), not setuid/setgid, not group/world-writable, executable by
/// owner, and its parent directory not group/world-writable either.
///
/// Returns the open fd on success — the caller execs this exact fd
/// (`/proc/self/fd/<n>` or `execveat`), never the path again.
pub fn validate_bridge_binary(path: &Path, expected_owner: u32) -> Result<RawFd> {
    let fd = open(path, OFlag::O_PATH | OFlag::O_NOFOLLOW | OFlag::O_CLOEXEC, Mode::empty())?;

    if let Err(e) = validate_open_fd(fd, expected_owner).and_then(|()| validate_parent_dir(fd)) {
        let _ = close(fd);
        return Err(e);
    }

    Ok(fd)
}

fn validate_open_fd(fd: RawFd, expected_owner: u32) -> Result<()> {
    let st = fstat(fd)?;

    if st.st_mode & S_IFMT != S_IFREG {
        return Err(BridgeValidationFailure::NotRegular);
    }
    if st.st_uid != expected_owner {
        return Err(BridgeValidationFailure::BadOwner(st.st_uid));
    }
    if st.st_mode & (S_ISUID | S_ISGID) != 0 {
        return Err(BridgeValidationFailure::SetuidBit);
    }
    if st.st_mode & (S_IWGRP | S_IWOTH) != 0 {
        return Err(BridgeValidationFailure::Writable);
    }
    if st.st_mode & S_IXUSR == 0 {
        return Err(BridgeValidationFailure::NotExecutable);
    }
    Ok(())
}

/// Resolves the fd's path through `/proc/self/fd/<n>` (never the original
/// argument — that string might not even point at this inode any more) and
/// checks the immediate parent directory's write bits and owner.
fn validate_parent_dir(fd: RawFd) -> Result<()> {
    let proc_path: PathBuf = format!("/proc/self/fd/{}", fd).into();
    let resolved = std::fs::read_link(&proc_path)?;

    let parent = resolved
        .parent()
        .ok_or(BridgeValidationFailure::ParentDirPolicy)?;

    let dir_meta = std::fs::metadata(parent)?;
    let mode = std::os::unix::fs::PermissionsExt::mode(&dir_meta.permissions());

    if mode & (S_IWGRP | S_IWOTH) != 0 {
        return Err(BridgeValidationFailure::ParentDirPolicy);
    }

    let self_uid = getuid().as_raw();
    if dir_meta.st_uid_compat() != 0 && dir_meta.st_uid_compat() != self_uid {
        return Err(BridgeValidationFailure::ParentDirPolicy);
    }

    Ok(())
}

/// Small shim so this module only needs `std::fs::Metadata` plus libc's
/// uid field, without pulling in another stat call through nix.
trait MetadataUidExt {
    fn st_uid_compat(&self) -> u32;
}

impl MetadataUidExt for std::fs::Metadata {
    fn st_uid_compat(&self) -> u32 {
        std::os::unix::fs::MetadataExt::uid(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::io::FromRawFd;

    fn write_exe(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn accepts_owner_executable_private_binary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::set_permissions(dir.path(), Permissions::from_mode(0o755)).unwrap();
        let path = write_exe(dir.path(), "bridge", 0o755);
        let uid = getuid().as_raw();
        let fd = validate_bridge_binary(&path, uid).unwrap();
        unsafe { std::fs::File::from_raw_fd(fd) };
    }

    #[test]
    fn rejects_group_writable_binary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::set_permissions(dir.path(), Permissions::from_mode(0o755)).unwrap();
        let path = write_exe(dir.path(), "bridge", 0o775);
        let uid = getuid().as_raw();
        let err = validate_bridge_binary(&path, uid).unwrap_err();
        assert!(matches!(err, BridgeValidationFailure::Writable));
    }

    #[test]
    fn rejects_setuid_binary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::set_permissions(dir.path(), Permissions::from_mode(0o755)).unwrap();
        let path = write_exe(dir.path(), "bridge", 0o4755);
        let uid = getuid().as_raw();
        let err = validate_bridge_binary(&path, uid).unwrap_err();
        assert!(matches!(err, BridgeValidationFailure::SetuidBit));
    }

    #[test]
    fn rejects_non_owner_binary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::set_permissions(dir.path(), Permissions::from_mode(0o755)).unwrap();
        let path = write_exe(dir.path(), "bridge", 0o755);
        let err = validate_bridge_binary(&path, 999_999).unwrap_err();
        assert!(matches!(err, BridgeValidationFailure::BadOwner(_)));
    }

    #[test]
    fn rejects_world_writable_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::set_permissions(dir.path(), Permissions::from_mode(0o777)).unwrap();
        let path = write_exe(dir.path(), "bridge", 0o755);
        let uid = getuid().as_raw();
        let err = validate_bridge_binary(&path, uid).unwrap_err();
        assert!(matches!(err, BridgeValidationFailure::ParentDirPolicy));
    }
}

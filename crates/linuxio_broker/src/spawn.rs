//! Fork, FD rearrangement, resource limits, env scrubbing and exec-by-fd
//! for the bridge child. The broker is single-threaded aside from this
//! one fork.

use crate::config::BrokerConfig;
use crate::env::build_child_env;
use crate::error::SpawnFailure;
use linuxio_protocol::Bootstrap;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{
    close, dup, dup2, fork, initgroups, pipe, setgid, setgroups, setresgid, setresuid, setuid,
    ForkResult, Gid, Pid, Uid,
};
use std::ffi::CString;
use std::io::{Read, Write};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};
use tracing::{error, warn};

const RLIMIT_CPU_SECONDS: u64 = 600;
const RLIMIT_NOFILE: u64 = 2048;
const RLIMIT_AS_BYTES: u64 = 16 * 1024 * 1024 * 1024;

const TARGET_STDIN: RawFd = 0;
const TARGET_STDOUT: RawFd = 1;
const TARGET_STDERR: RawFd = 2;
const TARGET_CLIENT_SOCKET: RawFd = 3;
const TARGET_EXEC_STATUS: RawFd = 4;
const TARGET_BRIDGE_FD: RawFd = 5;
const FIRST_UNRESERVED_FD: RawFd = 6;

/// Outcome of the fork: the parent gets the bridge's pid plus its ends of
/// the two pipes; the child never returns from [`spawn_bridge`] at all —
/// it either execs or calls `_exit` directly.
pub struct SpawnedBridge {
    pub pid: Pid,
    pub bootstrap_write: RawFd,
    pub exec_status_read: RawFd,
}

/// Forks the bridge child and, in the parent, returns immediately with
/// its pid and pipe ends. The child rearranges its file descriptors,
/// applies resource limits, scrubs its environment, and execs the
/// validated bridge binary by fd; it never returns to this function's
/// caller.
pub fn spawn_bridge(
    validated_bridge_fd: RawFd,
    client_socket_fd: RawFd,
    bootstrap: &Bootstrap,
    home_dir: &str,
    config: &BrokerConfig,
) -> Result<SpawnedBridge, SpawnFailure> {
    let (bootstrap_read, bootstrap_write) = pipe().map_err(SpawnFailure::Fork)?;
    let (exec_status_read, exec_status_write) = pipe().map_err(SpawnFailure::Fork)?;

    // SAFETY: the child either execs or `_exit`s before returning from
    // this match arm; nothing past the fork runs twice.
    match unsafe { fork() }.map_err(SpawnFailure::Fork)? {
        ForkResult::Parent { child } => {
            let _ = close(bootstrap_read);
            let _ = close(exec_status_write);
            Ok(SpawnedBridge {
                pid: child,
                bootstrap_write,
                exec_status_read,
            })
        }
        ForkResult::Child => {
            let _ = close(bootstrap_write);
            child_main(
                bootstrap_read,
                exec_status_write,
                validated_bridge_fd,
                client_socket_fd,
                bootstrap,
                home_dir,
                config,
            );
            unreachable!("child_main never returns");
        }
    }
}

/// Runs entirely in the forked child. Any failure here writes one byte to
/// the exec-status pipe and `_exit(127)`s; success replaces this process
/// image entirely, so the function's `!` return type is never actually
/// produced by a `return`.
fn child_main(
    bootstrap_read: RawFd,
    exec_status_write: RawFd,
    bridge_fd: RawFd,
    client_socket_fd: RawFd,
    bootstrap: &Bootstrap,
    home_dir: &str,
    config: &BrokerConfig,
) -> ! {
    if let Err(e) = rearrange_fds(bootstrap_read, client_socket_fd, exec_status_write, bridge_fd) {
        fail(exec_status_write, &e);
    }

    if let Err(e) = apply_resource_limits(config.rlimit_nproc) {
        fail(exec_status_write, &SpawnFailure::ResourceLimit(e));
    }

    umask(Mode::from_bits_truncate(0o077));

    for (key, _) in std::env::vars() {
        std::env::remove_var(key);
    }
    for (key, value) in build_child_env(
        bootstrap.privileged,
        bootstrap.uid,
        bootstrap.gid,
        home_dir,
        &bootstrap.username,
    ) {
        std::env::set_var(key, value);
    }

    if bootstrap.privileged {
        if setresgid(Gid::from_raw(0), Gid::from_raw(0), Gid::from_raw(0)).is_err()
            || setresuid(Uid::from_raw(0), Uid::from_raw(0), Uid::from_raw(0)).is_err()
        {
            fail(exec_status_write, &SpawnFailure::ResourceLimit(nix::Error::EPERM));
        }
    } else if let Err(e) = drop_to_user(bootstrap.uid, bootstrap.gid, &bootstrap.username) {
        fail(exec_status_write, &SpawnFailure::ResourceLimit(e));
    } else if setuid(Uid::from_raw(0)).is_ok() {
        // Regaining root after a real drop must be impossible.
        fail(exec_status_write, &SpawnFailure::ResourceLimit(nix::Error::EPERM));
    }

    std::env::set_current_dir(if bootstrap.privileged { "/root" } else { home_dir }).ok();

    exec_bridge(bridge_fd, exec_status_write);
}

fn drop_to_user(uid: u32, gid: u32, username: &str) -> nix::Result<()> {
    setgroups(&[])?;
    initgroups(&CString::new(username).unwrap_or_default(), Gid::from_raw(gid))?;
    setgid(Gid::from_raw(gid))?;
    setuid(Uid::from_raw(uid))?;
    Ok(())
}

/// Deterministic FD rearrangement. Any source fd that already occupies a
/// target slot other than its own gets relocated to a high, unreserved fd
/// first, so later `dup2` calls never clobber a still-needed source.
fn rearrange_fds(
    mut bootstrap_read: RawFd,
    mut client_socket: RawFd,
    mut exec_status_write: RawFd,
    mut bridge_fd: RawFd,
) -> Result<(), SpawnFailure> {
    let reserved = [
        TARGET_STDIN,
        TARGET_STDOUT,
        TARGET_STDERR,
        TARGET_CLIENT_SOCKET,
        TARGET_EXEC_STATUS,
        TARGET_BRIDGE_FD,
    ];

    for (source, target) in [
        (&mut bootstrap_read, TARGET_STDIN),
        (&mut client_socket, TARGET_CLIENT_SOCKET),
        (&mut exec_status_write, TARGET_EXEC_STATUS),
        (&mut bridge_fd, TARGET_BRIDGE_FD),
    ] {
        if *source != target && reserved.contains(source) {
            *source = dup(*source).map_err(SpawnFailure::Dup2)?;
        }
    }

    dup2(bootstrap_read, TARGET_STDIN).map_err(SpawnFailure::Dup2)?;
    dup2(TARGET_STDERR, TARGET_STDOUT).map_err(SpawnFailure::Dup2)?;
    dup2(client_socket, TARGET_CLIENT_SOCKET).map_err(SpawnFailure::Dup2)?;
    dup2(exec_status_write, TARGET_EXEC_STATUS).map_err(SpawnFailure::Dup2)?;
    dup2(bridge_fd, TARGET_BRIDGE_FD).map_err(SpawnFailure::Dup2)?;

    // dup2 always clears FD_CLOEXEC on the destination; the exec-status
    // write end needs it back so a successful exec closes it and signals
    // the parent via EOF.
    fcntl(TARGET_EXEC_STATUS, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(SpawnFailure::Dup2)?;

    close_fds_from(FIRST_UNRESERVED_FD);
    Ok(())
}

fn close_fds_from(min_fd: RawFd) {
    match nix::unistd::close_range(
        min_fd as u32,
        u32::MAX,
        nix::unistd::CloseRangeFlags::empty(),
    ) {
        Ok(()) => {}
        Err(_) => {
            for fd in min_fd..=1024 {
                let _ = close(fd);
            }
        }
    }
}

fn apply_resource_limits(rlimit_nproc: u64) -> nix::Result<()> {
    setrlimit(Resource::RLIMIT_CPU, RLIMIT_CPU_SECONDS, RLIMIT_CPU_SECONDS)?;
    setrlimit(Resource::RLIMIT_NOFILE, RLIMIT_NOFILE, RLIMIT_NOFILE)?;
    setrlimit(Resource::RLIMIT_NPROC, rlimit_nproc, rlimit_nproc)?;
    setrlimit(Resource::RLIMIT_AS, RLIMIT_AS_BYTES, RLIMIT_AS_BYTES)?;
    Ok(())
}

/// `execveat(BRIDGE_FD, "", {"linuxio-bridge"}, env, AT_EMPTY_PATH)`, with
/// an ENOSYS fallback that recovers a path via `/proc/self/fd/<fd>` and
/// calls `execv`. Never returns on success; on failure writes one byte to
/// the exec-status pipe and `_exit(127)`.
fn exec_bridge(bridge_fd: RawFd, exec_status_write: RawFd) -> ! {
    // CLOEXEC goes on right before the exec call: execveat still resolves
    // the target through this fd, but a successful exec will not leave it
    // open in the new image.
    let _ = fcntl(TARGET_BRIDGE_FD, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC));

    let argv0 = CString::new("linuxio-bridge").unwrap();
    let empty_path = CString::new("").unwrap();
    let argv = [argv0.as_ptr(), std::ptr::null()];

    let envp: Vec<CString> = std::env::vars()
        .map(|(k, v)| CString::new(format!("{k}={v}")).unwrap_or_default())
        .collect();
    let mut envp_ptrs: Vec<*const libc::c_char> = envp.iter().map(|c| c.as_ptr()).collect();
    envp_ptrs.push(std::ptr::null());

    let rc = unsafe {
        libc::syscall(
            libc::SYS_execveat,
            bridge_fd,
            empty_path.as_ptr(),
            argv.as_ptr(),
            envp_ptrs.as_ptr(),
            libc::AT_EMPTY_PATH,
        )
    };

    if rc == -1 && errno_is_enosys() {
        if let Ok(path) = std::fs::read_link(format!("/proc/self/fd/{bridge_fd}")) {
            if let Some(path) = path.to_str() {
                let path_c = CString::new(path).unwrap_or_default();
                unsafe {
                    libc::execv(path_c.as_ptr(), argv.as_ptr());
                }
            }
        }
    }

    let mut status_pipe = unsafe { std::fs::File::from_raw_fd_owned(exec_status_write) };
    let _ = status_pipe.write_all(&[1u8]);
    std::process::exit(127)
}

fn errno_is_enosys() -> bool {
    std::io::Error::last_os_error().raw_os_error() == Some(libc::ENOSYS)
}

/// Writes the bootstrap record to the child's stdin pipe, then waits on the
/// exec-status pipe with a bounded timeout. EOF means the exec succeeded
/// (CLOEXEC closed the pipe's write end); a byte means it failed; timeout
/// means the child is stuck and gets killed.
pub fn send_bootstrap_and_await_exec(
    bootstrap_write: RawFd,
    exec_status_read: RawFd,
    child: Pid,
    bootstrap: &Bootstrap,
    timeout: Duration,
) -> Result<(), SpawnFailure> {
    {
        let mut pipe_writer = unsafe { std::fs::File::from_raw_fd_owned(bootstrap_write) };
        bootstrap
            .write(&mut pipe_writer)
            .map_err(|e| SpawnFailure::Exec(e.to_string()))?;
    } // drop closes the write end, signalling EOF to the bridge's stdin.

    let deadline = Instant::now() + timeout;
    let mut status_reader = unsafe { std::fs::File::from_raw_fd_owned(exec_status_read) };
    let mut byte = [0u8; 1];

    loop {
        match status_reader.read(&mut byte) {
            Ok(0) => return Ok(()),
            Ok(_) => return Err(SpawnFailure::StartupByte),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    warn!(pid = child.as_raw(), "bridge exec status timed out, killing child");
                    let _ = nix::sys::signal::kill(child, nix::sys::signal::Signal::SIGKILL);
                    let _ = nix::sys::wait::waitpid(child, None);
                    return Err(SpawnFailure::ExecTimeout);
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                error!("error reading exec-status pipe: {e}");
                return Err(SpawnFailure::Exec(e.to_string()));
            }
        }
    }
}

fn fail(exec_status_write: RawFd, err: &SpawnFailure) -> ! {
    error!("bridge child setup failed before exec: {err}");
    let mut status_pipe = unsafe { std::fs::File::from_raw_fd_owned(exec_status_write) };
    let _ = status_pipe.write_all(&[1u8]);
    std::process::exit(127)
}

trait FromRawFdOwned {
    unsafe fn from_raw_fd_owned(fd: RawFd) -> Self;
}

impl FromRawFdOwned for std::fs::File {
    unsafe fn from_raw_fd_owned(fd: RawFd) -> Self {
        use std::os::unix::io::FromRawFd;
        std::fs::File::from_raw_fd(fd)
    }
}

//! Sudo capability probing: after PAM accepts the credential, the broker
//! checks whether the authenticated user can actually invoke `sudo`, by
//! forking a throwaway child that drops to that user's
//! uid/gid and runs `sudo -S -p "" -v` with the password on stdin. The
//! parent only observes the child's exit status and a timeout.

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, initgroups, setgid, setgroups, setuid, ForkResult, Gid, Uid};
use std::ffi::CString;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::AuthFailure;

/// Default time budget for the whole probe; `LINUXIO_SUDO_TIMEOUT_PASSWORD`
/// overrides it.
pub const DEFAULT_SUDO_TIMEOUT: Duration = Duration::from_secs(4);

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Seam so broker logic can run without forking real children in tests.
pub trait SudoProbe: Send + Sync {
    fn probe(&self, username: &str, uid: u32, gid: u32, password: &str) -> Result<bool, AuthFailure>;
}

/// Real implementation: fork, drop privileges in the child, run
/// `sudo -S -p "" -v`, reap with a timeout in the parent.
pub struct ForkingSudoProbe {
    pub timeout: Duration,
}

impl Default for ForkingSudoProbe {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SUDO_TIMEOUT,
        }
    }
}

impl SudoProbe for ForkingSudoProbe {
    fn probe(&self, username: &str, uid: u32, gid: u32, password: &str) -> Result<bool, AuthFailure> {
        // SAFETY: the child exits (or execs) before returning from this
        // function; no Rust destructors run twice across the fork.
        let outcome = match unsafe { fork() }.map_err(|e| AuthFailure::PamInternal(e.to_string()))? {
            ForkResult::Child => {
                drop_privileges_or_exit(username, uid, gid);
                run_sudo_dash_v(password);
            }
            ForkResult::Parent { child } => reap_with_timeout(child, self.timeout)?,
        };

        if outcome {
            invalidate_sudo_cache(username, uid, gid);
        }
        Ok(outcome)
    }
}

fn drop_privileges_or_exit(username: &str, uid: u32, gid: u32) -> ! {
    let name = CString::new(username).unwrap_or_default();
    if setgroups(&[]).is_err()
        || initgroups(&name, Gid::from_raw(gid)).is_err()
        || setgid(Gid::from_raw(gid)).is_err()
        || setuid(Uid::from_raw(uid)).is_err()
    {
        std::process::exit(127);
    }
    unreachable!("drop_privileges_or_exit only returns by exiting")
}

/// Runs in the forked child after privileges are dropped. Never returns:
/// either `sudo` execs over this process image or we exit with its status.
/// Environment is cleared to just `PATH` and `LANG=C` before spawning.
fn run_sudo_dash_v(password: &str) -> ! {
    for (key, _) in std::env::vars() {
        std::env::remove_var(key);
    }
    std::env::set_var("PATH", "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin");
    std::env::set_var("LANG", "C");

    let mut child = match Command::new("sudo")
        .args(["-S", "-p", "", "-v"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(_) => std::process::exit(126),
    };

    if let Some(stdin) = child.stdin.as_mut() {
        let _ = writeln!(stdin, "{}", password);
    }

    let status = child.wait().map(|s| s.success()).unwrap_or(false);
    std::process::exit(if status { 0 } else { 1 })
}

/// Fire-and-forget child that runs `sudo -k` so the probe never leaves a
/// live sudo timestamp behind for a password it only meant to test.
fn invalidate_sudo_cache(username: &str, uid: u32, gid: u32) {
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            let name = CString::new(username).unwrap_or_default();
            if setgroups(&[]).is_err()
                || initgroups(&name, Gid::from_raw(gid)).is_err()
                || setgid(Gid::from_raw(gid)).is_err()
                || setuid(Uid::from_raw(uid)).is_err()
            {
                std::process::exit(127);
            }
            let status = Command::new("sudo")
                .arg("-k")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            std::process::exit(status.map(|s| s.code().unwrap_or(1)).unwrap_or(1));
        }
        Ok(ForkResult::Parent { child }) => {
            let _ = waitpid(child, None);
        }
        Err(_) => {}
    }
}

fn reap_with_timeout(child: nix::unistd::Pid, timeout: Duration) -> Result<bool, AuthFailure> {
    let deadline = Instant::now() + timeout;
    loop {
        match waitpid(child, Some(nix::sys::wait::WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code == 0),
            Ok(WaitStatus::Signaled(..)) => return Ok(false),
            Ok(WaitStatus::StillAlive) => {
                if Instant::now() >= deadline {
                    warn!("sudo probe child {} timed out, killing", child);
                    let _ = nix::sys::signal::kill(child, nix::sys::signal::Signal::SIGKILL);
                    let _ = waitpid(child, None);
                    return Ok(false);
                }
                std::thread::sleep(REAP_POLL_INTERVAL);
            }
            Ok(_) => std::thread::sleep(REAP_POLL_INTERVAL),
            Err(e) => return Err(AuthFailure::PamInternal(e.to_string())),
        }
    }
}

/// In-memory sudo-probe double, reused by this crate's own unit tests and
/// by other crates' integration tests (under the `testing` feature).
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::{AuthFailure, SudoProbe};

    pub struct FakeSudoProbe {
        pub capable: Vec<u32>,
    }

    impl SudoProbe for FakeSudoProbe {
        fn probe(&self, _username: &str, uid: u32, _gid: u32, _password: &str) -> Result<bool, AuthFailure> {
            Ok(self.capable.contains(&uid))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeSudoProbe;
    use super::*;

    #[test]
    fn fake_probe_reports_capability_by_uid() {
        let probe = FakeSudoProbe { capable: vec![1000] };
        assert!(probe.probe("alice", 1000, 1000, "x").unwrap());
        assert!(!probe.probe("bob", 1001, 1001, "x").unwrap());
    }
}

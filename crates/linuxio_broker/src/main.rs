//! Entry point for `linuxio-broker`: one process per accepted connection,
//! invoked by the activation system with that connection on stdin/stdout.

use clap::Parser;
use linuxio_broker::{config::BrokerConfig, request};
use linuxio_security::{ForkingSudoProbe, SystemPam};
use std::os::fd::FromRawFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

/// Auth-phase socket timeouts. Cleared by the bridge before handing the fd
/// off to the long-lived Yamux session.
const AUTH_READ_TIMEOUT: Duration = Duration::from_secs(30);
const AUTH_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "linuxio-broker", about = "LinuxIO privileged-IPC auth broker")]
struct Args {
    /// Override the bridge binary path (default: LINUXIO_BRIDGE_PATH env or
    /// the built-in default).
    #[arg(long)]
    bridge_path: Option<PathBuf>,

    #[arg(long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = linuxio_logging::init_logging(linuxio_logging::LogConfig {
        app_name: "linuxio-broker",
        verbose: args.verbose,
    }) {
        eprintln!("failed to initialize logging: {e}");
    }

    enforce_not_dumpable();

    if !running_as_root() {
        error!("linuxio-broker must run as uid 0");
        std::process::exit(126);
    }

    let socket = match adopt_stdin_socket() {
        Ok(socket) => socket,
        Err(e) => {
            error!("stdin is not a usable socket: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = socket
        .set_read_timeout(Some(AUTH_READ_TIMEOUT))
        .and_then(|()| socket.set_write_timeout(Some(AUTH_WRITE_TIMEOUT)))
    {
        error!("failed to set auth-phase socket timeouts: {e}");
        std::process::exit(2);
    }

    let config = BrokerConfig::from_env(args.bridge_path, args.verbose);

    if !peer_is_authorized_or_log(&socket, &config.socket_group) {
        error!("rejecting connection from unauthorized peer");
        std::process::exit(1);
    }

    let pam = SystemPam::new(config.pam_service.clone());
    let sudo = ForkingSudoProbe {
        timeout: config.sudo_timeout,
    };
    let ctx = request::RequestContext {
        config: &config,
        pam: &pam,
        sudo: &sudo,
    };

    match request::handle_connection(&ctx, socket) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("connection handling failed: {e}");
            std::process::exit(1)
        }
    }
}

fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

fn enforce_not_dumpable() {
    // SAFETY: PR_SET_DUMPABLE takes one immediate argument and has no
    // aliasing/lifetime requirements on the caller.
    unsafe {
        libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0);
    }
}

/// Takes ownership of fd 0 as the accepted client socket. Fails if stdin is
/// not actually a socket (e.g. run interactively from a TTY).
fn adopt_stdin_socket() -> std::io::Result<UnixStream> {
    use nix::sys::socket::{getsockopt, sockopt::SockType};

    let stream = unsafe { UnixStream::from_raw_fd(0) };
    match getsockopt(&stream, SockType) {
        Ok(_) => Ok(stream),
        Err(e) => {
            std::mem::forget(stream); // fd 0 was never really ours to drop here
            Err(std::io::Error::from(e))
        }
    }
}

fn peer_is_authorized_or_log(socket: &UnixStream, group: &str) -> bool {
    match linuxio_security::peer_is_authorized(socket, group) {
        Ok(authorized) => authorized,
        Err(e) => {
            error!("peer credential check failed: {e}");
            false
        }
    }
}

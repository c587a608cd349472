//! One request's worth of the broker flow: read, authenticate, probe sudo,
//! validate the bridge binary, spawn it and hand off the socket, then
//! answer the caller.

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::spawn::{send_bootstrap_and_await_exec, spawn_bridge};
use linuxio_ids::SessionId;
use linuxio_protocol::{AuthMode, AuthRequest, AuthResponse};
use linuxio_security::{validate_bridge_binary, PamAuthenticator, SudoProbe};
use nix::sys::wait::waitpid;
use nix::unistd::User;
use std::os::unix::io::AsRawFd;
use tracing::{info, warn};

/// Everything step 1 through the peer-credential check needs before the
/// real PAM conversation starts.
pub struct RequestContext<'a> {
    pub config: &'a BrokerConfig,
    pub pam: &'a dyn PamAuthenticator,
    pub sudo: &'a dyn SudoProbe,
}

/// Bridge pid and logging context left over once the success `AuthResponse`
/// has gone out and the socket is no longer the broker's to hold.
struct SpawnedSession {
    pid: nix::unistd::Pid,
}

/// Runs the full flow against an already-accepted, peer-checked socket,
/// taking ownership of it so it can be dropped the moment the broker is
/// done with it. Always writes exactly one `AuthResponse` before the
/// socket goes away; the caller only needs the process exit code, which
/// this derives from whether the flow succeeded.
pub fn handle_connection(
    ctx: &RequestContext<'_>,
    mut socket: impl std::io::Read + std::io::Write + AsRawFd,
) -> Result<(), BrokerError> {
    match run_flow(ctx, &mut socket) {
        Ok(spawned) => {
            // The broker holds no reference to the client socket past this
            // point; the bridge is the sole owner of the connection.
            drop(socket);
            match waitpid(spawned.pid, None) {
                Ok(status) => info!(pid = spawned.pid.as_raw(), ?status, "bridge exited"),
                Err(e) => warn!("waitpid on bridge child failed: {e}"),
            }
            Ok(())
        }
        Err(e) => {
            warn!("request failed: {e}");
            let response = AuthResponse::error(e.response_body());
            let _ = response.write(&mut socket);
            Err(e)
        }
    }
}

fn run_flow(
    ctx: &RequestContext<'_>,
    socket: &mut (impl std::io::Read + std::io::Write + AsRawFd),
) -> Result<SpawnedSession, BrokerError> {
    let request = AuthRequest::read(socket)?;
    let session_id =
        SessionId::parse(&request.session_id).map_err(|_| BrokerError::Transport(
            std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed session id"),
        ))?;

    let pam_session = ctx.pam.authenticate(&request.username, &request.password)?;

    let user = User::from_name(&request.username)
        .map_err(|e| BrokerError::Transport(std::io::Error::other(e)))?
        .ok_or(linuxio_security::UserLookupFailure)?;

    let privileged = ctx
        .sudo
        .probe(&request.username, user.uid.as_raw(), user.gid.as_raw(), &request.password)
        .unwrap_or(false);

    let bridge_fd = validate_bridge_binary(&ctx.config.bridge_path, 0)?;

    let home_dir = user.dir.to_string_lossy().into_owned();
    let bootstrap = linuxio_protocol::Bootstrap {
        session_id: session_id.clone(),
        username: request.username.clone(),
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
        verbose: request.verbose,
        privileged,
        motd: Some(pam_session.motd().to_string()),
        server_cert: None,
        log_pipe_descriptor: None,
    };

    let spawned = match spawn_bridge(
        bridge_fd,
        socket.as_raw_fd(),
        &bootstrap,
        &home_dir,
        ctx.config,
    ) {
        Ok(spawned) => spawned,
        Err(e) => {
            let _ = nix::unistd::close(bridge_fd);
            return Err(e.into());
        }
    };
    let _ = nix::unistd::close(bridge_fd);

    send_bootstrap_and_await_exec(
        spawned.bootstrap_write,
        spawned.exec_status_read,
        spawned.pid,
        &bootstrap,
        ctx.config.bridge_start_timeout,
    )?;

    let mode = if privileged { AuthMode::Priv } else { AuthMode::Unpriv };
    let motd = pam_session.motd().trim_end_matches('\n').to_string();
    let response = AuthResponse::ok(mode, motd);
    response.write(socket)?;

    info!(
        session_id = %session_id.as_str(),
        user = %request.username,
        privileged,
        pid = spawned.pid.as_raw(),
        "bridge spawned"
    );

    Ok(SpawnedSession { pid: spawned.pid })
}

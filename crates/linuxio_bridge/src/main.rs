//! LinuxIO bridge worker.
//!
//! Never invoked directly by a user: the auth broker execs this binary
//! with a fixed FD layout and a `Bootstrap` record waiting on stdin.

use clap::Parser;
use linuxio_bridge::{fdio, run_session, BridgeConfig};
use linuxio_protocol::Bootstrap;
use linuxio_streams::handlers::{JsonApiHandler, PtyHandler};
use linuxio_streams::{RegistryBuilder, Session, SessionUser};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "linuxio-bridge", about = "LinuxIO privileged session bridge")]
struct Args {}

fn main() {
    let _ = Args::parse();

    if let Err(e) = run() {
        eprintln!("linuxio-bridge: {e}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    // Read the one-shot bootstrap record before anything else stands up,
    // so a malformed bootstrap fails fast.
    let bootstrap = {
        let stdin = std::io::stdin();
        let mut lock = stdin.lock();
        Bootstrap::read(&mut lock)?
    };

    // Step 2: logging, level from the bootstrap verbose flag.
    linuxio_logging::init_logging(linuxio_logging::LogConfig {
        app_name: "linuxio-bridge",
        verbose: bootstrap.verbose,
    })?;

    tracing::info!(
        session_id = %bootstrap.session_id,
        uid = bootstrap.uid,
        privileged = bootstrap.privileged,
        "bridge starting"
    );

    // Step 3: immutable session state.
    let session = Arc::new(Session::new(
        bootstrap.session_id.clone(),
        SessionUser {
            name: bootstrap.username.clone(),
            uid: bootstrap.uid,
            gid: bootstrap.gid,
        },
        bootstrap.privileged,
        bootstrap.verbose,
    ));

    // Step 4.
    nix::sys::stat::umask(nix::sys::stat::Mode::from_bits_truncate(0o077));

    // Step 5: adopt FD 3 without dup'ing it.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let start = std::time::Instant::now();
    let result = runtime.block_on(async move {
        let client_socket = fdio::adopt_client_socket()?;

        // Step 7: register stream handlers.
        let registry = Arc::new(
            RegistryBuilder::new()
                .register("terminal", Arc::new(PtyHandler))
                .register("api", Arc::new(JsonApiHandler::new()))
                .build(),
        );

        run_session(client_socket, session, registry, BridgeConfig::default()).await
    });

    tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "bridge exiting");
    result
}

//! Stream handler: terminal PTY.
//!
//! `args = [rows, cols, shell?]`. Starts the session user's login shell (or
//! root's, for a privileged session) in a PTY pair with a new session and
//! controlling TTY. PTY<->stream copying happens on a blocking thread pair
//! since `portable_pty`'s master reader/writer are synchronous; the async
//! stream side lives in the calling task.

use crate::conn::StreamConn;
use crate::registry::{HandlerError, StreamHandler};
use crate::ringbuffer::RingBuffer;
use crate::session::Session;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Discard-oldest backlog of everything the PTY has produced, so a stream
/// that reconnects (or opens late) can recover recent context.
const BACKLOG_CAPACITY: usize = 256 * 1024;
/// Drain-on-read buffer between the blocking PTY reader thread and the
/// async stream writer.
const OUTPUT_CAPACITY: usize = 16 * 1024;
/// How long to wait for the child to exit after SIGHUP before SIGKILL.
const CHILD_REAP_DEADLINE: Duration = Duration::from_millis(750);

pub struct PtyHandler;

#[async_trait]
impl<S> StreamHandler<S> for PtyHandler
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn handle(
        &self,
        session: Arc<Session>,
        mut conn: StreamConn<S>,
        args: Vec<String>,
        mut shutdown: Shutdown,
    ) -> Result<(), HandlerError> {
        let (rows, cols, shell) = parse_args(&args)?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| HandlerError::Other(format!("openpty failed: {e}")))?;

        let mut cmd = build_command(&session, shell);
        let child = pair
            .slave
            .spawn_command(cmd_take(&mut cmd))
            .map_err(|e| HandlerError::Other(format!("spawn failed: {e}")))?;
        drop(pair.slave);

        let master = pair.master;
        let mut writer = master
            .take_writer()
            .map_err(|e| HandlerError::Other(format!("take_writer failed: {e}")))?;
        let reader = master
            .try_clone_reader()
            .map_err(|e| HandlerError::Other(format!("try_clone_reader failed: {e}")))?;

        let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(64);
        let backlog = Arc::new(Mutex::new(RingBuffer::new(BACKLOG_CAPACITY)));
        let reader_backlog = backlog.clone();

        let reader_thread = std::thread::spawn(move || {
            pty_reader_loop(reader, output_tx, reader_backlog);
        });

        let child = Arc::new(Mutex::new(child));
        let master: Box<dyn MasterPty + Send> = master;

        let result = run_copy_loops(&mut conn, &mut writer, &mut output_rx, &mut shutdown, &master).await;

        terminate_child(&child);
        let _ = reader_thread.join();
        conn.write_close().await.ok();

        drop(backlog);
        result
    }
}

fn parse_args(args: &[String]) -> Result<(u16, u16, Option<String>), HandlerError> {
    let rows: u16 = args
        .first()
        .ok_or_else(|| HandlerError::Other("missing rows arg".into()))?
        .parse()
        .map_err(|_| HandlerError::Other("invalid rows arg".into()))?;
    let cols: u16 = args
        .get(1)
        .ok_or_else(|| HandlerError::Other("missing cols arg".into()))?
        .parse()
        .map_err(|_| HandlerError::Other("invalid cols arg".into()))?;
    let shell = args.get(2).cloned();
    Ok((rows, cols, shell))
}

fn build_command(session: &Session, shell_override: Option<String>) -> CommandBuilder {
    let shell = shell_override.unwrap_or_else(|| "/bin/bash".to_string());
    let mut cmd = CommandBuilder::new(&shell);
    cmd.arg("-l");
    cmd.env_clear();
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");
    cmd.env("HOME", home_dir(session));
    cmd.env("USER", &session.user.name);
    cmd.env("LOGNAME", &session.user.name);
    cmd.env(
        "HISTFILE",
        format!("{}/.bash_history", home_dir(session)),
    );
    cmd.env("SHELL", &shell);
    cmd
}

fn home_dir(session: &Session) -> String {
    if session.user.name == "root" {
        "/root".to_string()
    } else {
        format!("/home/{}", session.user.name)
    }
}

/// `CommandBuilder` doesn't implement `Clone`; `spawn_command` consumes it
/// by value, so this just moves it out of a temporary.
fn cmd_take(cmd: &mut CommandBuilder) -> CommandBuilder {
    std::mem::replace(cmd, CommandBuilder::new("/bin/false"))
}

fn pty_reader_loop(
    mut reader: Box<dyn std::io::Read + Send>,
    output_tx: mpsc::Sender<Vec<u8>>,
    backlog: Arc<Mutex<RingBuffer>>,
) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                backlog.lock().expect("backlog lock poisoned").push(&buf[..n]);
                if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

async fn run_copy_loops<S>(
    conn: &mut StreamConn<S>,
    writer: &mut Box<dyn std::io::Write + Send>,
    output_rx: &mut mpsc::Receiver<Vec<u8>>,
    shutdown: &mut Shutdown,
    master: &Box<dyn MasterPty + Send>,
) -> Result<(), HandlerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut pending_output = RingBuffer::new(OUTPUT_CAPACITY);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                return Err(HandlerError::Aborted);
            }

            maybe_chunk = output_rx.recv() => {
                match maybe_chunk {
                    Some(chunk) => {
                        pending_output.push(&chunk);
                        let drained = pending_output.drain_all();
                        conn.write_data(drained).await?;
                    }
                    None => return Ok(()),
                }
            }

            frame = conn.read_frame() => {
                let frame = frame?;
                match frame.opcode {
                    linuxio_protocol::Opcode::Data => {
                        if let Some((rows, cols)) = try_parse_resize(&frame.payload) {
                            let _ = master.resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 });
                        } else {
                            use std::io::Write;
                            if writer.write_all(&frame.payload).is_err() {
                                return Ok(());
                            }
                        }
                    }
                    linuxio_protocol::Opcode::Close => return Ok(()),
                    _ => return Ok(()),
                }
            }
        }
    }
}

/// In-band resize control message: `"\x01" rows(u16 BE) cols(u16 BE)`.
fn try_parse_resize(payload: &[u8]) -> Option<(u16, u16)> {
    if payload.len() != 5 || payload[0] != 0x01 {
        return None;
    }
    let rows = u16::from_be_bytes([payload[1], payload[2]]).clamp(0, 65535);
    let cols = u16::from_be_bytes([payload[3], payload[4]]).clamp(0, 65535);
    Some((rows, cols))
}

fn terminate_child(child: &Arc<Mutex<Box<dyn Child + Send + Sync>>>) {
    let mut child = child.lock().expect("child lock poisoned");

    match child.process_id() {
        Some(pid) => {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGHUP) {
                warn!("SIGHUP failed for PTY child {pid}: {e}");
            }
        }
        None => {
            let _ = child.kill();
        }
    }

    let deadline = std::time::Instant::now() + CHILD_REAP_DEADLINE;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => {
                info!("PTY child reaped");
                return;
            }
            Ok(None) => {
                if std::time::Instant::now() >= deadline {
                    warn!("PTY child did not exit within reap deadline, killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    return;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_control_message_roundtrips() {
        let payload = {
            let mut buf = vec![0x01u8];
            buf.extend_from_slice(&24u16.to_be_bytes());
            buf.extend_from_slice(&80u16.to_be_bytes());
            buf
        };
        assert_eq!(try_parse_resize(&payload), Some((24, 80)));
    }

    #[test]
    fn non_resize_payload_is_not_mistaken_for_one() {
        assert_eq!(try_parse_resize(b"hello"), None);
    }

    #[test]
    fn parses_rows_cols_and_optional_shell() {
        let (rows, cols, shell) = parse_args(&["24".into(), "80".into()]).unwrap();
        assert_eq!((rows, cols), (24, 80));
        assert!(shell.is_none());

        let (_, _, shell) = parse_args(&["24".into(), "80".into(), "/bin/zsh".into()]).unwrap();
        assert_eq!(shell.as_deref(), Some("/bin/zsh"));
    }

    #[test]
    fn missing_args_are_rejected() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&["24".into()]).is_err());
    }
}

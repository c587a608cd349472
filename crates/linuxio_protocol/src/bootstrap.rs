//! `Bootstrap` record: the one-shot binary handoff the broker writes to the
//! bridge's stdin after a successful authentication.

use crate::auth::read_magic_version;
use crate::error::Result;
use crate::framing::{read_exact, read_lenstr, write_lenstr};
use crate::limits::{MAGIC, MAX_MOTD, MAX_PATH, MAX_SESSION_ID, MAX_USERNAME, VERSION};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use linuxio_ids::SessionId;
use std::io::{Read, Write};

const BOOTSTRAP_FLAG_VERBOSE: u8 = 0x01;
const BOOTSTRAP_FLAG_PRIVILEGED: u8 = 0x02;

/// Immutable session bootstrap consumed exactly once by the bridge on
/// startup. Layout: magic+version, uid, gid, flags, then lenstr
/// session_id/username/motd/server_cert/log_pipe_descriptor.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub session_id: SessionId,
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub verbose: bool,
    pub privileged: bool,
    pub motd: Option<String>,
    pub server_cert: Option<String>,
    pub log_pipe_descriptor: Option<String>,
}

impl Bootstrap {
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&MAGIC)?;
        w.write_u8(VERSION)?;
        w.write_u32::<BigEndian>(self.uid)?;
        w.write_u32::<BigEndian>(self.gid)?;

        let mut flags = 0u8;
        if self.verbose {
            flags |= BOOTSTRAP_FLAG_VERBOSE;
        }
        if self.privileged {
            flags |= BOOTSTRAP_FLAG_PRIVILEGED;
        }
        w.write_u8(flags)?;

        write_lenstr(w, self.session_id.as_str())?;
        write_lenstr(w, &self.username)?;
        write_lenstr(w, self.motd.as_deref().unwrap_or(""))?;
        write_lenstr(w, self.server_cert.as_deref().unwrap_or(""))?;
        write_lenstr(w, self.log_pipe_descriptor.as_deref().unwrap_or(""))?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<Self> {
        read_magic_version(r)?;

        let uid = r.read_u32::<BigEndian>()?;
        let gid = r.read_u32::<BigEndian>()?;
        let flags = r.read_u8()?;

        let session_id_raw = read_lenstr(r, "session_id", MAX_SESSION_ID + 1)?;
        let username = read_lenstr(r, "username", MAX_USERNAME)?;
        let motd = non_empty(read_lenstr(r, "motd", MAX_MOTD)?);
        let server_cert = non_empty(read_lenstr(r, "server_cert", MAX_PATH)?);
        let log_pipe_descriptor = non_empty(read_lenstr(r, "log_pipe_descriptor", MAX_PATH)?);

        let session_id = SessionId::parse(&session_id_raw).map_err(|_| {
            crate::error::ProtocolError::OversizedField {
                field: "session_id",
                len: session_id_raw.len(),
                bound: MAX_SESSION_ID,
            }
        })?;

        Ok(Self {
            session_id,
            username,
            uid,
            gid,
            verbose: flags & BOOTSTRAP_FLAG_VERBOSE != 0,
            privileged: flags & BOOTSTRAP_FLAG_PRIVILEGED != 0,
            motd,
            server_cert,
            log_pipe_descriptor,
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

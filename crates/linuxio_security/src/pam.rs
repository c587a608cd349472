//! PAM authentication.
//!
//! The broker opens one PAM conversation per request under a fixed service
//! name, runs `pam_authenticate -> pam_acct_mgmt -> pam_setcred(ESTABLISH)`,
//! then `pam_open_session`. [`PamSession`] is an RAII guard: dropping it
//! performs `pam_close_session`, `pam_setcred(DELETE)` and `pam_end` exactly
//! once, on every exit path, success or failure.

use crate::error::AuthFailure;
use linuxio_protocol::framing::explicit_zero_string;
use pam_client::conv_mock::Conversation as MockConversation;
use pam_client::{Context, ConversationHandler, ErrorCode, Flag};
use std::cell::RefCell;

/// Maximum bytes collected from PAM_TEXT_INFO/PAM_ERROR_MSG messages into
/// the MOTD buffer.
const MAX_MOTD_BYTES: usize = 4096;

/// Seam so broker logic can run against a fake PAM backend in tests.
/// Implementors authenticate, run account management,
/// establish credentials and open a session, then hand back a guard that
/// tears all of that down on drop.
pub trait PamAuthenticator: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> Result<PamSession, AuthFailure>;
}

/// Live PAM session. Collected MOTD text is available via [`motd`].
pub struct PamSession {
    pub motd: String,
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl PamSession {
    fn new(motd: String, teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            motd,
            teardown: Some(Box::new(teardown)),
        }
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn fake(motd: impl Into<String>) -> Self {
        Self::new(motd.into(), || {})
    }

    pub fn motd(&self) -> &str {
        &self.motd
    }
}

impl Drop for PamSession {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

/// Collects PAM_TEXT_INFO/PAM_ERROR_MSG messages and supplies the password
/// for PAM_PROMPT_ECHO_OFF prompts.
struct PasswordConversation {
    password: String,
    collected: RefCell<String>,
}

impl ConversationHandler for PasswordConversation {
    fn prompt_echo_on(&mut self, _msg: &std::ffi::CStr) -> Result<std::ffi::CString, ErrorCode> {
        std::ffi::CString::new(self.password.as_bytes()).map_err(|_| ErrorCode::CONV_ERR)
    }

    fn prompt_echo_off(&mut self, _msg: &std::ffi::CStr) -> Result<std::ffi::CString, ErrorCode> {
        std::ffi::CString::new(self.password.as_bytes()).map_err(|_| ErrorCode::CONV_ERR)
    }

    fn text_info(&mut self, msg: &std::ffi::CStr) {
        self.append(msg);
    }

    fn error_msg(&mut self, msg: &std::ffi::CStr) {
        self.append(msg);
    }
}

impl Drop for PasswordConversation {
    fn drop(&mut self) {
        let taken = std::mem::take(&mut self.password);
        explicit_zero_string(taken);
    }
}

impl PasswordConversation {
    fn append(&self, msg: &std::ffi::CStr) {
        let mut collected = self.collected.borrow_mut();
        if collected.len() >= MAX_MOTD_BYTES {
            return;
        }
        let text = msg.to_string_lossy();
        let remaining = MAX_MOTD_BYTES - collected.len();
        if !collected.is_empty() {
            collected.push('\n');
        }
        collected.push_str(&text[..text.len().min(remaining)]);
    }
}

/// Real PAM-backed implementation, used by `linuxio-broker`.
pub struct SystemPam {
    service: String,
}

impl SystemPam {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl PamAuthenticator for SystemPam {
    fn authenticate(&self, username: &str, password: &str) -> Result<PamSession, AuthFailure> {
        let conversation = PasswordConversation {
            password: password.to_string(),
            collected: RefCell::new(String::new()),
        };

        let mut context = Context::new(&self.service, Some(username), conversation)
            .map_err(|e| AuthFailure::PamInternal(e.to_string()))?;

        context.authenticate(Flag::NONE).map_err(|e| match e.code() {
            Some(ErrorCode::AUTH_ERR) | Some(ErrorCode::USER_UNKNOWN) => {
                AuthFailure::InvalidCredential
            }
            Some(ErrorCode::PERM_DENIED) => AuthFailure::AccountDisabled,
            _ => AuthFailure::PamInternal(e.to_string()),
        })?;

        match context.acct_mgmt(Flag::NONE) {
            Ok(()) => {}
            Err(e) if e.code() == Some(ErrorCode::NEW_AUTHTOK_REQD) => {
                return Err(AuthFailure::PasswordExpired)
            }
            Err(e) if e.code() == Some(ErrorCode::ACCT_EXPIRED) => {
                return Err(AuthFailure::AccountDisabled)
            }
            Err(e) => return Err(AuthFailure::PamInternal(e.to_string())),
        }

        context
            .setcred(Flag::ESTABLISH_CRED)
            .map_err(|e| AuthFailure::PamInternal(e.to_string()))?;

        context
            .open_session(Flag::NONE)
            .map_err(|e| AuthFailure::PamInternal(e.to_string()))?;

        let motd = context.conversation().collected.borrow().clone();

        let mut context = context;
        let teardown = move || {
            let _ = context.close_session(Flag::NONE);
            let _ = context.setcred(Flag::DELETE_CRED);
        };

        Ok(PamSession::new(motd, teardown))
    }
}

#[allow(dead_code)]
fn _assert_mock_conversation_exists() {
    let _: Option<MockConversation> = None;
}

/// In-memory PAM double, reused by this crate's own unit tests and by
/// other crates' integration tests (under the `testing` feature) so they
/// can exercise the broker flow without touching real PAM.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::{AuthFailure, PamAuthenticator, PamSession};

    /// Fixed username/password table plus injectable failure modes.
    pub struct FakePam {
        pub credentials: Vec<(&'static str, &'static str)>,
        pub expired_for: Vec<&'static str>,
        pub disabled_for: Vec<&'static str>,
        pub motd: &'static str,
    }

    impl PamAuthenticator for FakePam {
        fn authenticate(&self, username: &str, password: &str) -> Result<PamSession, AuthFailure> {
            if self.disabled_for.contains(&username) {
                return Err(AuthFailure::AccountDisabled);
            }
            if self.expired_for.contains(&username) {
                return Err(AuthFailure::PasswordExpired);
            }
            if self
                .credentials
                .iter()
                .any(|(u, p)| *u == username && *p == password)
            {
                Ok(PamSession::fake(self.motd))
            } else {
                Err(AuthFailure::InvalidCredential)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakePam;
    use super::*;

    #[test]
    fn fake_pam_accepts_correct_password() {
        let pam = FakePam {
            credentials: vec![("alice", "correcthorse")],
            expired_for: vec![],
            disabled_for: vec![],
            motd: "welcome",
        };
        let session = pam.authenticate("alice", "correcthorse").unwrap();
        assert_eq!(session.motd(), "welcome");
    }

    #[test]
    fn fake_pam_rejects_wrong_password() {
        let pam = FakePam {
            credentials: vec![("alice", "correcthorse")],
            expired_for: vec![],
            disabled_for: vec![],
            motd: "",
        };
        let err = pam.authenticate("alice", "wrong").unwrap_err();
        assert!(matches!(err, AuthFailure::InvalidCredential));
    }

    #[test]
    fn fake_pam_reports_expired_password() {
        let pam = FakePam {
            credentials: vec![("bob", "pw")],
            expired_for: vec!["bob"],
            disabled_for: vec![],
            motd: "",
        };
        let err = pam.authenticate("bob", "pw").unwrap_err();
        assert!(matches!(err, AuthFailure::PasswordExpired));
    }
}

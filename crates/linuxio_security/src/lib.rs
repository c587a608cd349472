//! PAM authentication, sudo capability probing, bridge-binary validation
//! and peer-credential checks for the LinuxIO broker.

pub mod error;
pub mod pam;
pub mod peer;
pub mod sudo;
pub mod validate;

pub use error::{AuthFailure, BridgeValidationFailure, UserLookupFailure};
pub use pam::{PamAuthenticator, PamSession, SystemPam};
pub use peer::peer_is_authorized;
pub use sudo::{ForkingSudoProbe, SudoProbe, DEFAULT_SUDO_TIMEOUT};
pub use validate::validate_bridge_binary;

#[cfg(any(test, feature = "testing"))]
pub use pam::testing::FakePam;
#[cfg(any(test, feature = "testing"))]
pub use sudo::testing::FakeSudoProbe;

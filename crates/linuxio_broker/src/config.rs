//! Broker-side tuning constants, sourced from environment variables.
//! Every env lookup happens exactly once, here, with range-clamping.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BRIDGE_PATH: &str = "/usr/local/bin/linuxio-bridge";
pub const DEFAULT_PAM_SERVICE: &str = "linuxio";
pub const DEFAULT_SOCKET_GROUP: &str = "linuxio-bridge-socket";

const DEFAULT_RLIMIT_NPROC: u64 = 1024;
const MIN_RLIMIT_NPROC: u64 = 10;
const MAX_RLIMIT_NPROC: u64 = 4096;

const DEFAULT_SUDO_TIMEOUT_SECS: u64 = 4;
const MIN_SUDO_TIMEOUT_SECS: u64 = 1;
const MAX_SUDO_TIMEOUT_SECS: u64 = 30;

/// Canonical broker configuration, built once at process start.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub bridge_path: PathBuf,
    pub pam_service: String,
    pub socket_group: String,
    pub rlimit_nproc: u64,
    pub sudo_timeout: Duration,
    pub bridge_start_timeout: Duration,
    pub verbose: bool,
}

impl BrokerConfig {
    pub fn from_env(bridge_path_override: Option<PathBuf>, verbose: bool) -> Self {
        Self {
            bridge_path: bridge_path_override
                .or_else(|| std::env::var("LINUXIO_BRIDGE_PATH").ok().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BRIDGE_PATH)),
            pam_service: std::env::var("LINUXIO_PAM_SERVICE")
                .unwrap_or_else(|_| DEFAULT_PAM_SERVICE.to_string()),
            socket_group: DEFAULT_SOCKET_GROUP.to_string(),
            rlimit_nproc: clamp_env_u64(
                "LINUXIO_RLIMIT_NPROC",
                DEFAULT_RLIMIT_NPROC,
                MIN_RLIMIT_NPROC,
                MAX_RLIMIT_NPROC,
            ),
            sudo_timeout: Duration::from_secs(clamp_env_u64(
                "LINUXIO_SUDO_TIMEOUT_PASSWORD",
                DEFAULT_SUDO_TIMEOUT_SECS,
                MIN_SUDO_TIMEOUT_SECS,
                MAX_SUDO_TIMEOUT_SECS,
            )),
            bridge_start_timeout: Duration::from_secs(5),
            verbose,
        }
    }
}

fn clamp_env_u64(var: &str, default: u64, min: u64, max: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(|value| value.clamp(min, max))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_with_no_env() {
        std::env::remove_var("LINUXIO_RLIMIT_NPROC");
        std::env::remove_var("LINUXIO_SUDO_TIMEOUT_PASSWORD");
        let config = BrokerConfig::from_env(None, false);
        assert_eq!(config.rlimit_nproc, DEFAULT_RLIMIT_NPROC);
        assert_eq!(config.sudo_timeout, Duration::from_secs(DEFAULT_SUDO_TIMEOUT_SECS));
        assert_eq!(config.bridge_path, PathBuf::from(DEFAULT_BRIDGE_PATH));
    }

    #[test]
    fn out_of_range_nproc_is_clamped() {
        assert_eq!(clamp_env_u64("__does_not_exist__", 5, 10, 4096), 5);
        std::env::set_var("LINUXIO_TEST_CLAMP", "99999");
        assert_eq!(clamp_env_u64("LINUXIO_TEST_CLAMP", 1024, 10, 4096), 4096);
        std::env::remove_var("LINUXIO_TEST_CLAMP");
    }

    #[test]
    fn bridge_path_override_wins_over_env() {
        let config = BrokerConfig::from_env(Some(PathBuf::from("/opt/bridge")), false);
        assert_eq!(config.bridge_path, PathBuf::from("/opt/bridge"));
    }
}

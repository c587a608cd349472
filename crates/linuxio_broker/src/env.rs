//! Environment allowlist construction for the bridge child. Everything not
//! explicitly listed here is absent in the child's environment.

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const DEFAULT_LANG: &str = "C.UTF-8";
const DEFAULT_TERM: &str = "xterm-256color";

/// One key=value pair destined for the child's environment, built with
/// `Vec<(String, String)>` rather than a real `exec`-ready `CString`
/// array — that conversion happens at the exec call site.
pub fn build_child_env(privileged: bool, uid: u32, gid: u32, home: &str, username: &str) -> Vec<(String, String)> {
    let mut env = vec![("PATH".to_string(), DEFAULT_PATH.to_string())];

    if let Ok(lang) = std::env::var("LANG") {
        env.push(("LANG".to_string(), validate_locale(&lang)));
    } else {
        env.push(("LANG".to_string(), DEFAULT_LANG.to_string()));
    }
    if let Ok(lc_all) = std::env::var("LC_ALL") {
        env.push(("LC_ALL".to_string(), validate_locale(&lc_all)));
    }

    if let Ok(term) = std::env::var("TERM") {
        env.push(("TERM".to_string(), validate_term(&term)));
    } else {
        env.push(("TERM".to_string(), DEFAULT_TERM.to_string()));
    }

    if let Ok(journal_stream) = std::env::var("JOURNAL_STREAM") {
        env.push(("JOURNAL_STREAM".to_string(), journal_stream));
    }

    if privileged {
        env.push(("HOME".to_string(), "/root".to_string()));
        env.push(("USER".to_string(), "root".to_string()));
        env.push(("LOGNAME".to_string(), "root".to_string()));
    } else {
        env.push(("HOME".to_string(), home.to_string()));
        env.push(("USER".to_string(), username.to_string()));
        env.push(("LOGNAME".to_string(), username.to_string()));
        env.push((
            "XDG_RUNTIME_DIR".to_string(),
            format!("/run/user/{uid}"),
        ));
    }
    let _ = gid;

    env
}

/// Locale strings must look like `C.UTF-8` or `en_US.UTF-8`; anything else
/// falls back to the default rather than being passed through verbatim.
fn validate_locale(value: &str) -> String {
    let looks_valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
        && !value.is_empty();
    if looks_valid {
        value.to_string()
    } else {
        DEFAULT_LANG.to_string()
    }
}

/// `TERM` must be alnum+`-` only.
fn validate_term(value: &str) -> String {
    let looks_valid = !value.is_empty()
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if looks_valid {
        value.to_string()
    } else {
        DEFAULT_TERM.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privileged_env_sets_root_identity() {
        let env = build_child_env(true, 0, 0, "/home/alice", "alice");
        assert!(env.contains(&("HOME".to_string(), "/root".to_string())));
        assert!(env.contains(&("USER".to_string(), "root".to_string())));
    }

    #[test]
    fn unprivileged_env_sets_user_identity_and_runtime_dir() {
        let env = build_child_env(false, 1000, 1000, "/home/alice", "alice");
        assert!(env.contains(&("HOME".to_string(), "/home/alice".to_string())));
        assert!(env.contains(&("XDG_RUNTIME_DIR".to_string(), "/run/user/1000".to_string())));
    }

    #[test]
    fn locale_validation_rejects_shell_metacharacters() {
        assert_eq!(validate_locale("en_US.UTF-8"), "en_US.UTF-8");
        assert_eq!(validate_locale("C.UTF-8"), "C.UTF-8");
        assert_eq!(validate_locale("; rm -rf /"), DEFAULT_LANG);
    }

    #[test]
    fn term_validation_rejects_non_alnum_dash() {
        assert_eq!(validate_term("xterm-256color"), "xterm-256color");
        assert_eq!(validate_term("xterm; evil"), DEFAULT_TERM);
    }

    #[test]
    fn path_is_always_the_fixed_allowlist() {
        let env = build_child_env(false, 1000, 1000, "/home/alice", "alice");
        assert!(env.contains(&("PATH".to_string(), DEFAULT_PATH.to_string())));
    }
}

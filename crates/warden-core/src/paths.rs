//! Resolution of the three environment-variable overrides that locate the
//! governor's on-disk state, config, and hooks directory.

use std::path::{Path, PathBuf};

const STATE_DIR_ENV: &str = "STATE_DIR_OVERRIDE";
const CONFIG_PATH_ENV: &str = "CONFIG_PATH_OVERRIDE";
const HOOKS_DIR_ENV: &str = "HOOKS_DIR_OVERRIDE";

/// The three filesystem roots every hook binary needs, resolved once at
/// startup from environment overrides (falling back to `~/.claude/hooks/...`).
#[derive(Debug, Clone)]
pub struct StatePaths {
    /// Root directory for session state, audit log, heal log, and metrics log.
    pub state_dir: PathBuf,
    /// Path to the single configuration JSON document.
    pub config_path: PathBuf,
    /// Directory self-heal inspects for required hook files.
    pub hooks_dir: PathBuf,
}

impl StatePaths {
    /// Resolve paths from the process environment, falling back to the
    /// documented defaults under the user's home directory.
    #[must_use]
    pub fn from_env() -> Self {
        let home = directories::UserDirs::new().map(|d| d.home_dir().to_path_buf());
        Self {
            state_dir: env_or(STATE_DIR_ENV, || {
                default_under_home(&home, "hooks/session-state")
            }),
            config_path: env_or(CONFIG_PATH_ENV, || {
                default_under_home(&home, "hooks/token-guard-config.json")
            }),
            hooks_dir: env_or(HOOKS_DIR_ENV, || default_under_home(&home, "hooks")),
        }
    }

    /// Session-state file for a given session id: `<state_dir>/<sid>.json`.
    #[must_use]
    pub fn session_state_file(&self, session_id: &str) -> PathBuf {
        self.state_dir.join(format!("{session_id}.json"))
    }

    /// Read-state file for a given session id: `<state_dir>/<sid>-reads.json`.
    #[must_use]
    pub fn read_state_file(&self, session_id: &str) -> PathBuf {
        self.state_dir.join(format!("{session_id}-reads.json"))
    }

    /// Path to the append-only audit log.
    #[must_use]
    pub fn audit_log(&self) -> PathBuf {
        self.state_dir.join("audit.jsonl")
    }

    /// Path to the audit log's rotated backup.
    #[must_use]
    pub fn audit_log_backup(&self) -> PathBuf {
        self.state_dir.join("audit.jsonl.1")
    }

    /// Path to the self-heal report log.
    #[must_use]
    pub fn heal_log(&self) -> PathBuf {
        self.state_dir.join("self-heal.jsonl")
    }

    /// Path to the per-agent metrics log.
    #[must_use]
    pub fn metrics_log(&self) -> PathBuf {
        self.state_dir.join("agent-metrics.jsonl")
    }
}

fn env_or(var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    std::env::var_os(var).map(PathBuf::from).unwrap_or_else(default)
}

fn default_under_home(home: &Option<PathBuf>, suffix: &str) -> PathBuf {
    let base = home.clone().unwrap_or_else(|| PathBuf::from("."));
    base.join(".claude").join(suffix)
}

/// Expand a leading `~` (or `~/...`) to the user's home directory.
///
/// Paths without a leading `~` are returned unchanged.
#[must_use]
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = directories::UserDirs::new().map(|d| d.home_dir().to_path_buf()) {
            let rest = rest.strip_prefix('/').unwrap_or(rest);
            return if rest.is_empty() { home } else { home.join(rest) };
        }
    }
    Path::new(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_tilde_prefixed_path() {
        let expanded = expand_tilde("~/Projects/foo");
        assert!(expanded.ends_with("Projects/foo"));
        assert!(!expanded.starts_with("~"));
    }

    #[test]
    fn leaves_absolute_path_unchanged() {
        assert_eq!(expand_tilde("/repo/src"), PathBuf::from("/repo/src"));
    }

    #[test]
    fn falls_back_when_env_var_absent() {
        // STATE_DIR_OVERRIDE is not set in the test process, so this must
        // hit the default closure rather than panicking on a missing var.
        let resolved = env_or("WARDEN_TEST_UNSET_VAR", || PathBuf::from("/fallback"));
        assert_eq!(resolved, PathBuf::from("/fallback"));
    }
}

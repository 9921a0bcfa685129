//! Atomic JSON state store (C2) and the two state shapes it persists:
//! per-session spawn-guard state and per-session read-guard state.

use std::io::Write as _;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Seconds older than which `blocked_attempts` and `reads` entries are pruned.
pub const PRUNE_WINDOW_SECONDS: f64 = 300.0;

/// Current Unix time in fractional seconds.
#[must_use]
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Load and parse a JSON state file, returning `T::default()` on any
/// failure (missing file, unreadable, malformed JSON). Never panics.
pub fn load_json_state<T: DeserializeOwned + Default>(path: &Path) -> T {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|contents| serde_json::from_str(&contents).ok())
        .unwrap_or_default()
}

/// Atomically persist `state` to `path`: write to a temp file in the same
/// directory, then rename over the target. Returns `false` on any failure
/// rather than propagating — a failed save is a loss of enforcement for
/// this event, not a crash.
pub fn save_json_state<T: Serialize>(path: &Path, state: &T) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    if std::fs::create_dir_all(parent).is_err() {
        return false;
    }
    let Ok(json) = serde_json::to_vec_pretty(state) else {
        return false;
    };
    let Ok(mut tmp) = tempfile::NamedTempFile::new_in(parent) else {
        return false;
    };
    if tmp.write_all(&json).is_err() {
        return false;
    }
    let _ = tmp.as_file().sync_all();
    tmp.persist(path).is_ok()
}

/// Per-session state owned by the spawn guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    /// Number of sub-agents ever allowed in this session.
    #[serde(default)]
    pub agent_count: u64,
    /// Append-only record of every allowed agent.
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
    /// Recent spawn rejections, pruned to the last 300 seconds on each touch.
    #[serde(default)]
    pub blocked_attempts: Vec<BlockedAttempt>,
}

impl SessionState {
    /// Drop `blocked_attempts` entries older than [`PRUNE_WINDOW_SECONDS`].
    pub fn prune_blocked_attempts(&mut self, now: f64) {
        self.blocked_attempts
            .retain(|attempt| now - attempt.timestamp < PRUNE_WINDOW_SECONDS);
    }

    /// Agents matching `agent_type`, in spawn order.
    #[must_use]
    pub fn agents_of_type<'a>(&'a self, agent_type: &'a str) -> impl Iterator<Item = &'a AgentRecord> {
        self.agents.iter().filter(move |a| a.agent_type == agent_type)
    }

    /// Timestamp of the most recent agent that was not a team spawn.
    #[must_use]
    pub fn last_non_team_timestamp(&self) -> Option<f64> {
        self.agents
            .iter()
            .filter(|a| a.team.is_none())
            .map(|a| a.timestamp)
            .fold(None, |acc, ts| Some(acc.map_or(ts, |prev: f64| prev.max(ts))))
    }
}

/// One allowed sub-agent spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// The `subagent_type` field from the Task payload.
    #[serde(rename = "type")]
    pub agent_type: String,
    /// Truncated to 80 characters by the caller before insertion.
    pub description: String,
    /// Seconds since epoch when the spawn was allowed.
    pub timestamp: f64,
    /// Set when the spawn bypassed the rule cascade via `team_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// Populated only for `Explore` agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_dirs: Option<Vec<String>>,
}

/// One rejected spawn attempt, kept around for the R6 type-switching rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedAttempt {
    /// The `subagent_type` field from the rejected Task payload.
    #[serde(rename = "type")]
    pub agent_type: String,
    /// Truncated to 80 characters by the caller before insertion.
    pub description: String,
    /// Seconds since epoch when the attempt was blocked.
    pub timestamp: f64,
}

/// Per-session state owned by the read guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadState {
    /// Append-only (pruned) record of every Read event observed.
    #[serde(default)]
    pub reads: Vec<ReadRecord>,
    /// Timestamp of the last emitted sequential-reads warning, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sequential_warn: Option<f64>,
}

impl ReadState {
    /// Drop `reads` entries older than [`PRUNE_WINDOW_SECONDS`].
    pub fn prune_reads(&mut self, now: f64) {
        self.reads.retain(|r| now - r.timestamp < PRUNE_WINDOW_SECONDS);
    }
}

/// One observed Read event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRecord {
    /// The `file_path` field from the Read payload.
    pub path: String,
    /// Seconds since epoch when the read was observed.
    pub timestamp: f64,
    /// Set on the record that triggered a duplicate-path or sequential block.
    #[serde(default, skip_serializing_if = "is_false")]
    pub blocked: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_file_yields_default() {
        let dir = TempDir::new().unwrap();
        let state: SessionState = load_json_state(&dir.path().join("nope.json"));
        assert_eq!(state.agent_count, 0);
        assert!(state.agents.is_empty());
    }

    #[test]
    fn load_malformed_json_yields_default_not_panic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let state: SessionState = load_json_state(&path);
        assert_eq!(state.agent_count, 0);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let mut state = SessionState::default();
        state.agent_count = 2;
        state.agents.push(AgentRecord {
            agent_type: "Explore".to_string(),
            description: "map the repo".to_string(),
            timestamp: 100.0,
            team: None,
            target_dirs: Some(vec!["/repo".to_string()]),
        });
        assert!(save_json_state(&path, &state));

        let reloaded: SessionState = load_json_state(&path);
        assert_eq!(reloaded.agent_count, 2);
        assert_eq!(reloaded.agents.len(), 1);
        assert_eq!(reloaded.agents[0].agent_type, "Explore");
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        assert!(save_json_state(&path, &SessionState::default()));
        let leftover: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path() != path)
            .collect();
        assert!(leftover.is_empty(), "unexpected files: {leftover:?}");
    }

    #[test]
    fn prune_blocked_attempts_drops_stale_entries() {
        let mut state = SessionState {
            blocked_attempts: vec![
                BlockedAttempt {
                    agent_type: "Explore".into(),
                    description: "old".into(),
                    timestamp: 0.0,
                },
                BlockedAttempt {
                    agent_type: "Explore".into(),
                    description: "recent".into(),
                    timestamp: 290.0,
                },
            ],
            ..Default::default()
        };
        state.prune_blocked_attempts(300.0);
        assert_eq!(state.blocked_attempts.len(), 1);
        assert_eq!(state.blocked_attempts[0].description, "recent");
    }
}

//! Typed configuration (C4): defaults, JSON overlay, and per-field coercion
//! so a malformed document degrades field-by-field instead of failing whole.

use std::collections::HashSet;
use std::path::Path;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

fn default_max_agents() -> u64 {
    5
}

fn default_parallel_window_seconds() -> u64 {
    30
}

fn default_global_cooldown_seconds() -> u64 {
    5
}

fn default_max_per_subagent_type() -> u64 {
    1
}

fn default_state_ttl_hours() -> u64 {
    24
}

fn default_audit_log() -> bool {
    true
}

fn default_one_per_session() -> HashSet<String> {
    [
        "Explore",
        "master-coder",
        "master-researcher",
        "master-architect",
        "master-workflow",
        "Plan",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_always_allowed() -> HashSet<String> {
    ["claude-code-guide", "statusline-setup", "haiku"]
        .into_iter()
        .map(String::from)
        .collect()
}

// Each numeric field needs its own default on coercion failure, so the
// "safe-int" fallback helper is generated per field rather than shared.
macro_rules! coerce_u64_field {
    ($name:ident, $default:expr) => {
        fn $name<'de, D>(deserializer: D) -> Result<u64, D::Error>
        where
            D: Deserializer<'de>,
        {
            let value = serde_json::Value::deserialize(deserializer).unwrap_or(serde_json::Value::Null);
            Ok(value.as_u64().unwrap_or_else($default))
        }
    };
}

coerce_u64_field!(coerce_max_agents, default_max_agents);
coerce_u64_field!(coerce_parallel_window_seconds, default_parallel_window_seconds);
coerce_u64_field!(coerce_global_cooldown_seconds, default_global_cooldown_seconds);
coerce_u64_field!(coerce_max_per_subagent_type, default_max_per_subagent_type);
coerce_u64_field!(coerce_state_ttl_hours, default_state_ttl_hours);

fn coerce_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer).unwrap_or(serde_json::Value::Null);
    Ok(value.as_bool().unwrap_or_else(default_audit_log))
}

fn coerce_string_set<'de, D>(deserializer: D) -> Result<HashSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer).unwrap_or(serde_json::Value::Null);
    match value {
        serde_json::Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()),
        _ => Err(de::Error::custom("not an array, caller falls back to default")),
    }
}

/// The governor's single JSON configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cumulative per-session spawn cap.
    #[serde(default = "default_max_agents", deserialize_with = "coerce_max_agents")]
    pub max_agents: u64,
    /// Minimum spacing between spawns of the same type.
    #[serde(default = "default_parallel_window_seconds", deserialize_with = "coerce_parallel_window_seconds")]
    pub parallel_window_seconds: u64,
    /// Minimum spacing between any two non-team spawns.
    #[serde(default = "default_global_cooldown_seconds", deserialize_with = "coerce_global_cooldown_seconds")]
    pub global_cooldown_seconds: u64,
    /// Cap per distinct type (except those in `one_per_session`).
    #[serde(default = "default_max_per_subagent_type", deserialize_with = "coerce_max_per_subagent_type")]
    pub max_per_subagent_type: u64,
    /// Age after which session files are deleted on each run.
    #[serde(default = "default_state_ttl_hours", deserialize_with = "coerce_state_ttl_hours")]
    pub state_ttl_hours: u64,
    /// Whether audit records are written at all.
    #[serde(default = "default_audit_log", deserialize_with = "coerce_bool")]
    pub audit_log: bool,
    /// Types limited to at most one spawn per session.
    #[serde(default = "default_one_per_session", deserialize_with = "coerce_one_per_session")]
    pub one_per_session: HashSet<String>,
    /// Types that bypass the rule cascade entirely.
    #[serde(default = "default_always_allowed", deserialize_with = "coerce_always_allowed")]
    pub always_allowed: HashSet<String>,
}

fn coerce_one_per_session<'de, D>(deserializer: D) -> Result<HashSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(coerce_string_set(deserializer).unwrap_or_else(|_| default_one_per_session()))
}

fn coerce_always_allowed<'de, D>(deserializer: D) -> Result<HashSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(coerce_string_set(deserializer).unwrap_or_else(|_| default_always_allowed()))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            parallel_window_seconds: default_parallel_window_seconds(),
            global_cooldown_seconds: default_global_cooldown_seconds(),
            max_per_subagent_type: default_max_per_subagent_type(),
            state_ttl_hours: default_state_ttl_hours(),
            audit_log: default_audit_log(),
            one_per_session: default_one_per_session(),
            always_allowed: default_always_allowed(),
        }
    }
}

impl Config {
    /// Load from `path`, starting from defaults and overlaying whatever the
    /// document provides. Missing file, unreadable file, or a document that
    /// isn't a JSON object all yield the default config untouched.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default()
    }

    /// Serialize the default config, the shape self-heal writes when the
    /// on-disk document is missing or malformed.
    #[must_use]
    pub fn defaults_json() -> serde_json::Value {
        serde_json::to_value(Self::default()).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_canonical_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_agents, 5);
        assert_eq!(cfg.parallel_window_seconds, 30);
        assert_eq!(cfg.global_cooldown_seconds, 5);
        assert_eq!(cfg.max_per_subagent_type, 1);
        assert_eq!(cfg.state_ttl_hours, 24);
        assert!(cfg.audit_log);
        assert!(cfg.one_per_session.contains("Explore"));
        assert!(cfg.one_per_session.contains("Plan"));
        assert!(cfg.always_allowed.contains("haiku"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(&dir.path().join("nope.json"));
        assert_eq!(cfg.max_agents, 5);
    }

    #[test]
    fn partial_document_overlays_only_present_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_agents": 9}"#).unwrap();
        let cfg = Config::load(&path);
        assert_eq!(cfg.max_agents, 9);
        assert_eq!(cfg.parallel_window_seconds, 30);
    }

    #[test]
    fn malformed_field_type_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_agents": "nine", "audit_log": "yes"}"#).unwrap();
        let cfg = Config::load(&path);
        assert_eq!(cfg.max_agents, 5);
        assert!(cfg.audit_log);
    }

    #[test]
    fn non_object_document_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "[1,2,3]").unwrap();
        let cfg = Config::load(&path);
        assert_eq!(cfg.max_agents, 5);
    }
}

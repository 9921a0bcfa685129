//! Append-only audit log (C3): one JSON object per line, serialized-append
//! locking, fault-tolerant reads, and size-based rotation.

use std::io::Write as _;
use std::path::Path;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::lock::LockGuard;

/// Default line count above which the audit log is rotated to `.1`.
pub const ROTATION_THRESHOLD_LINES: usize = 10_000;

/// The `event` tag on an [`AuditRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    /// A spawn or read was permitted.
    Allow,
    /// A spawn or read was rejected.
    Block,
    /// A team spawn bypassed the rule cascade.
    AllowTeam,
    /// A resumed Task call was skipped.
    Resume,
    /// A non-blocking advisory was emitted.
    Warn,
}

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// ISO-8601 local timestamp.
    pub ts: String,
    /// What happened.
    pub event: AuditEvent,
    /// The `subagent_type` or a fixed tag such as `"Read"`.
    #[serde(rename = "type")]
    pub record_type: String,
    /// Truncated to 80 characters.
    pub desc: String,
    /// Truncated to 12 characters of the session id.
    pub session: String,
    /// Rule name or other machine-readable cause, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Necessity-classifier pattern name, when R5 fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl AuditRecord {
    /// Build a record, truncating `desc` to 80 chars and `session` to 12.
    #[must_use]
    pub fn new(event: AuditEvent, record_type: &str, desc: &str, session: &str) -> Self {
        Self {
            ts: Local::now().to_rfc3339(),
            event,
            record_type: record_type.to_string(),
            desc: truncate_chars(desc, 80),
            session: truncate_chars(session, 12),
            reason: None,
            pattern: None,
        }
    }

    /// Attach a rule/cause name.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach a necessity-classifier pattern name.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Append one record to the audit log under an exclusive lock. Non-fatal:
/// logs a warning and returns on any failure rather than propagating.
pub fn append(path: &Path, record: &AuditRecord) {
    let Ok(line) = serde_json::to_string(record) else {
        tracing::warn!("failed to serialize audit record");
        return;
    };
    let _guard = match LockGuard::acquire(path) {
        Ok(guard) => guard,
        Err(err) => {
            tracing::warn!(%err, "failed to acquire audit log lock");
            return;
        }
    };
    let opened = std::fs::OpenOptions::new().create(true).append(true).open(path);
    match opened {
        Ok(mut file) => {
            if let Err(err) = writeln!(file, "{line}") {
                tracing::warn!(%err, "failed to append audit record");
            }
        }
        Err(err) => tracing::warn!(%err, "failed to open audit log for append"),
    }
}

/// Read every well-formed line of a JSONL file, silently discarding
/// malformed lines. Returns an empty vector if the file does not exist.
#[must_use]
pub fn read_jsonl_fault_tolerant<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Number of lines in a file, or 0 if it does not exist or cannot be read.
#[must_use]
pub fn line_count(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|contents| contents.lines().count())
        .unwrap_or(0)
}

/// Rotate `path` to `path.1` (clobbering any existing backup) if it has
/// grown past `threshold` lines. Called from self-heal, never from the
/// hot-path appender. Best-effort.
pub fn rotate_if_needed(path: &Path, threshold: usize) -> bool {
    if line_count(path) <= threshold {
        return false;
    }
    let backup = path.with_extension(append_extension(path, "1"));
    std::fs::rename(path, &backup).is_ok()
}

fn append_extension(path: &Path, suffix: &str) -> std::ffi::OsString {
    let mut ext = path
        .extension()
        .map(std::ffi::OsStr::to_owned)
        .unwrap_or_default();
    ext.push(".");
    ext.push(suffix);
    ext
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_and_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        append(&path, &AuditRecord::new(AuditEvent::Allow, "Explore", "map repo", "abcd1234efgh"));
        append(&path, &AuditRecord::new(AuditEvent::Block, "Explore", "again", "abcd1234efgh").with_reason("one_per_session"));

        let records: Vec<AuditRecord> = read_jsonl_fault_tolerant(&path);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, AuditEvent::Allow);
        assert_eq!(records[1].reason.as_deref(), Some("one_per_session"));
    }

    #[test]
    fn read_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "{\"ts\":\"x\",\"event\":\"allow\",\"type\":\"Explore\",\"desc\":\"d\",\"session\":\"s\"}\nnot json\n").unwrap();
        let records: Vec<AuditRecord> = read_jsonl_fault_tolerant(&path);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn read_missing_file_yields_empty() {
        let dir = TempDir::new().unwrap();
        let records: Vec<AuditRecord> = read_jsonl_fault_tolerant(&dir.path().join("nope.jsonl"));
        assert!(records.is_empty());
    }

    #[test]
    fn desc_and_session_are_truncated() {
        let long_desc = "x".repeat(200);
        let record = AuditRecord::new(AuditEvent::Allow, "Explore", &long_desc, "a-very-long-session-id-indeed");
        assert_eq!(record.desc.chars().count(), 80);
        assert_eq!(record.session.chars().count(), 12);
    }

    #[test]
    fn rotate_renames_when_over_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "a\nb\nc\n").unwrap();
        assert!(rotate_if_needed(&path, 2));
        assert!(!path.exists());
        assert!(dir.path().join("audit.jsonl.1").exists());
    }

    #[test]
    fn rotate_is_noop_under_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "a\nb\n").unwrap();
        assert!(!rotate_if_needed(&path, 10));
        assert!(path.exists());
    }
}

//! Read guard (C7): the Read-event entry point. Duplicate-path and
//! sequential-read caps, plus an Explore-aware advisory sourced from the
//! spawn guard's session file.

use crate::audit::{self, AuditEvent, AuditRecord};
use crate::config::Config;
use crate::event::{self, HookEvent};
use crate::lock::LockGuard;
use crate::paths::StatePaths;
use crate::state::{self, ReadRecord, ReadState, SessionState};

/// Seconds within which consecutive reads count toward the sequential-reads check.
pub const SEQUENTIAL_WINDOW_SECONDS: f64 = 120.0;
/// Reads within the window at which a non-blocking warning is emitted.
pub const SEQUENTIAL_WARN_THRESHOLD: usize = 4;
/// Reads within the window at which the read is blocked outright.
pub const SEQUENTIAL_BLOCK_THRESHOLD: usize = 15;
/// Repeat reads of the same path at which the read is blocked.
pub const DUPLICATE_PATH_THRESHOLD: usize = 3;

/// Result of running the read guard on one payload.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    /// `0` to allow (optionally with an advisory), `2` to block.
    pub exit_code: i32,
    /// Advisory or block message, when any.
    pub message: Option<String>,
}

impl ReadOutcome {
    fn allow() -> Self {
        Self {
            exit_code: 0,
            message: None,
        }
    }

    fn allow_with(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: Some(message.into()),
        }
    }

    fn block(message: impl Into<String>) -> Self {
        Self {
            exit_code: 2,
            message: Some(message.into()),
        }
    }
}

/// Run the full read-guard pipeline on a raw stdin payload.
pub fn handle_payload(payload: &str, paths: &StatePaths, config: &Config) -> ReadOutcome {
    let read = match event::parse(payload) {
        Ok(HookEvent::Read(read)) => read,
        Ok(_) => return ReadOutcome::allow(),
        Err(err) => {
            tracing::debug!(%err, "malformed payload, failing open");
            return ReadOutcome::allow();
        }
    };

    if read.file_path.is_empty() {
        return ReadOutcome::allow();
    }

    let state_path = paths.read_state_file(&read.session_id);
    let _guard = match LockGuard::acquire(&state_path) {
        Ok(guard) => guard,
        Err(err) => {
            tracing::warn!(%err, "failed to acquire read-guard lock, failing open");
            return ReadOutcome::allow();
        }
    };

    let mut read_state: ReadState = state::load_json_state(&state_path);
    let now = state::now_seconds();
    read_state.prune_reads(now);

    let duplicate_count = read_state.reads.iter().filter(|r| r.path == read.file_path).count() + 1;
    if duplicate_count >= DUPLICATE_PATH_THRESHOLD {
        read_state.reads.push(ReadRecord {
            path: read.file_path.clone(),
            timestamp: now,
            blocked: true,
        });
        state::save_json_state(&state_path, &read_state);
        if config.audit_log {
            audit::append(
                &paths.audit_log(),
                &AuditRecord::new(AuditEvent::Block, "Read", &read.file_path, &read.session_id)
                    .with_reason("duplicate_path"),
            );
        }
        return ReadOutcome::block(format!(
            "BLOCKED: '{}' has been read {duplicate_count} times this session. Re-use the earlier result instead of re-reading.",
            read.file_path
        ));
    }

    let recent_count = read_state
        .reads
        .iter()
        .filter(|r| now - r.timestamp < SEQUENTIAL_WINDOW_SECONDS)
        .count()
        + 1;
    if recent_count >= SEQUENTIAL_BLOCK_THRESHOLD {
        read_state.reads.push(ReadRecord {
            path: read.file_path.clone(),
            timestamp: now,
            blocked: true,
        });
        state::save_json_state(&state_path, &read_state);
        if config.audit_log {
            audit::append(
                &paths.audit_log(),
                &AuditRecord::new(AuditEvent::Block, "Read", &read.file_path, &read.session_id)
                    .with_reason("sequential_reads"),
            );
        }
        return ReadOutcome::block(format!(
            "BLOCKED: {recent_count} reads within {SEQUENTIAL_WINDOW_SECONDS:.0}s. Batch remaining reads into parallel groups instead."
        ));
    }

    let mut advisory = None;
    if recent_count >= SEQUENTIAL_WARN_THRESHOLD {
        let should_warn = read_state
            .last_sequential_warn
            .is_none_or(|last| now - last >= SEQUENTIAL_WINDOW_SECONDS);
        if should_warn {
            read_state.last_sequential_warn = Some(now);
            advisory = Some(format!(
                "TOKEN EFFICIENCY: {recent_count} sequential Read calls in {SEQUENTIAL_WINDOW_SECONDS:.0}s. Batch independent reads into parallel groups."
            ));
        }
    }

    if advisory.is_none() {
        if let Some(explore_dir) = matching_explore_dir(paths, &read.session_id, &read.file_path) {
            advisory = Some(format!(
                "TOKEN EFFICIENCY: '{}' is inside '{explore_dir}', already mapped by an Explore agent. Trust that output instead of re-reading.",
                read.file_path
            ));
            if config.audit_log {
                audit::append(
                    &paths.audit_log(),
                    &AuditRecord::new(AuditEvent::Warn, "Read", &read.file_path, &read.session_id)
                        .with_reason("post_explore_duplicate"),
                );
            }
        }
    }

    read_state.reads.push(ReadRecord {
        path: read.file_path.clone(),
        timestamp: now,
        blocked: false,
    });
    state::save_json_state(&state_path, &read_state);

    advisory.map_or_else(ReadOutcome::allow, ReadOutcome::allow_with)
}

fn matching_explore_dir(paths: &StatePaths, session_id: &str, file_path: &str) -> Option<String> {
    let spawn_state_path = paths.session_state_file(session_id);
    let _guard = LockGuard::acquire(&spawn_state_path).ok()?;
    let spawn_state: SessionState = state::load_json_state(&spawn_state_path);
    spawn_state
        .agents
        .iter()
        .filter(|a| a.agent_type == "Explore")
        .filter_map(|a| a.target_dirs.as_ref())
        .flatten()
        .find(|dir| {
            file_path.strip_prefix(dir.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
        .cloned()
}

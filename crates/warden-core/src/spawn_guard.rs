//! Spawn guard (C6): the Task-event entry point. Rule cascade R1–R7 plus
//! advisories, session-id validation, the stale-state sweep, and the
//! Explore `target_dirs` extraction.

use std::sync::LazyLock;

use regex::Regex;

use crate::audit::{self, AuditEvent, AuditRecord};
use crate::classifier;
use crate::config::Config;
use crate::error::WardenError;
use crate::event::{self, HookEvent, TaskEvent};
use crate::lock::LockGuard;
use crate::paths::{expand_tilde, StatePaths};
use crate::similarity::word_ratio_str;
use crate::state::{self, AgentRecord, BlockedAttempt, SessionState};

/// Result of running the spawn guard on one payload.
#[derive(Debug, Clone)]
pub struct SpawnOutcome {
    /// `0` to allow (the host proceeds), `2` to block (the host aborts).
    pub exit_code: i32,
    /// User-visible advisory or block reason, when any.
    pub message: Option<String>,
}

impl SpawnOutcome {
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

static SESSION_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{8,64}$").expect("static pattern is valid regex"));

const BLOCKED_ATTEMPT_DESC_MAX: usize = 80;

/// Run the full spawn-guard pipeline on a raw stdin payload.
pub fn handle_payload(payload: &str, paths: &StatePaths, config: &Config) -> SpawnOutcome {
    let task = match event::parse(payload) {
        Ok(HookEvent::Task(task)) => task,
        Ok(_) => return SpawnOutcome::allow(),
        Err(err) => {
            tracing::debug!(%err, "malformed payload, failing open");
            return SpawnOutcome::allow();
        }
    };

    if !SESSION_ID_PATTERN.is_match(&task.session_id) {
        let err = WardenError::InvalidSessionId(task.session_id.clone());
        tracing::debug!(%err, "failing closed");
        return SpawnOutcome::block(format!("BLOCKED: {err} — expected 8-64 chars of [A-Za-z0-9_-]."));
    }

    if config.always_allowed.contains(&task.subagent_type) {
        return SpawnOutcome::allow();
    }

    if task.resume {
        if config.audit_log {
            audit::append(
                &paths.audit_log(),
                &AuditRecord::new(AuditEvent::Resume, &task.subagent_type, &task.description, &task.session_id),
            );
        }
        return SpawnOutcome::allow();
    }

    sweep_stale_state(paths, config.state_ttl_hours);

    let state_path = paths.session_state_file(&task.session_id);
    let _guard = match LockGuard::acquire(&state_path) {
        Ok(guard) => guard,
        Err(err) => {
            tracing::warn!(%err, "failed to acquire spawn-guard lock, failing open");
            return SpawnOutcome::allow();
        }
    };

    let mut session_state: SessionState = state::load_json_state(&state_path);
    let now = state::now_seconds();
    session_state.prune_blocked_attempts(now);

    if let Some(team) = task.team_name.clone() {
        return allow_team_spawn(&task, team, &mut session_state, &state_path, paths, config, now);
    }

    if let Some(block) = evaluate_rule_cascade(&task, &session_state, config, now) {
        session_state.blocked_attempts.push(BlockedAttempt {
            agent_type: task.subagent_type.clone(),
            description: truncate(&task.description, BLOCKED_ATTEMPT_DESC_MAX),
            timestamp: now,
        });
        state::save_json_state(&state_path, &session_state);
        if config.audit_log {
            let mut record = AuditRecord::new(AuditEvent::Block, &task.subagent_type, &task.description, &task.session_id)
                .with_reason(block.rule_name);
            if let Some(pattern) = block.pattern {
                record = record.with_pattern(pattern);
            }
            audit::append(&paths.audit_log(), &record);
        }
        return SpawnOutcome::block(block.message);
    }

    let advisory = advisory_for(&session_state, &task);

    let target_dirs = if task.subagent_type == "Explore" {
        Some(extract_target_dirs(&task.prompt))
    } else {
        None
    };
    session_state.agents.push(AgentRecord {
        agent_type: task.subagent_type.clone(),
        description: truncate(&task.description, BLOCKED_ATTEMPT_DESC_MAX),
        timestamp: now,
        team: None,
        target_dirs,
    });
    session_state.agent_count += 1;
    state::save_json_state(&state_path, &session_state);

    if config.audit_log {
        audit::append(
            &paths.audit_log(),
            &AuditRecord::new(AuditEvent::Allow, &task.subagent_type, &task.description, &task.session_id),
        );
    }

    advisory.map_or_else(SpawnOutcome::allow, SpawnOutcome::allow_with)
}

fn allow_team_spawn(
    task: &TaskEvent,
    team: String,
    session_state: &mut SessionState,
    state_path: &std::path::Path,
    paths: &StatePaths,
    config: &Config,
    now: f64,
) -> SpawnOutcome {
    if session_state.agent_count >= config.max_agents {
        state::save_json_state(state_path, session_state);
        return SpawnOutcome::block(format!(
            "BLOCKED: Agent cap reached ({}/session), even for team spawns.",
            config.max_agents
        ));
    }
    session_state.agents.push(AgentRecord {
        agent_type: task.subagent_type.clone(),
        description: truncate(&task.description, BLOCKED_ATTEMPT_DESC_MAX),
        timestamp: now,
        team: Some(team),
        target_dirs: None,
    });
    session_state.agent_count += 1;
    state::save_json_state(state_path, session_state);
    if config.audit_log {
        audit::append(
            &paths.audit_log(),
            &AuditRecord::new(AuditEvent::AllowTeam, &task.subagent_type, &task.description, &task.session_id),
        );
    }
    SpawnOutcome::allow()
}

struct RuleBlock {
    rule_name: &'static str,
    pattern: Option<String>,
    message: String,
}

#[allow(clippy::too_many_lines)]
fn evaluate_rule_cascade(task: &TaskEvent, state: &SessionState, config: &Config, now: f64) -> Option<RuleBlock> {
    // R1: one-per-session
    if config.one_per_session.contains(&task.subagent_type)
        && state.agents_of_type(&task.subagent_type).next().is_some()
    {
        return Some(RuleBlock {
            rule_name: "one_per_session",
            pattern: None,
            message: format!(
                "BLOCKED: Already spawned a {} agent this session. Max 1 per session. Merge your queries into one agent, or use Grep/Read/WebSearch directly.",
                task.subagent_type
            ),
        });
    }

    // R2: per-type cap
    let same_type_count = state.agents_of_type(&task.subagent_type).count() as u64;
    if same_type_count >= config.max_per_subagent_type {
        return Some(RuleBlock {
            rule_name: "per_type_cap",
            pattern: None,
            message: format!(
                "BLOCKED: Already {same_type_count} {} agent(s) this session. Max {} of this type. Use tools directly instead.",
                task.subagent_type, config.max_per_subagent_type
            ),
        });
    }

    // R3: session cap
    if state.agent_count >= config.max_agents {
        return Some(RuleBlock {
            rule_name: "session_cap",
            pattern: None,
            message: format!(
                "BLOCKED: Agent cap reached ({}/session). You've spawned {} agents already. Use Grep/Read/WebSearch directly instead.",
                config.max_agents, state.agent_count
            ),
        });
    }

    // R4: parallel window
    if let Some(recent) = state
        .agents_of_type(&task.subagent_type)
        .find(|a| now - a.timestamp < config.parallel_window_seconds as f64)
    {
        let elapsed = now - recent.timestamp;
        return Some(RuleBlock {
            rule_name: "parallel_window",
            pattern: None,
            message: format!(
                "BLOCKED: Another {} agent was spawned {elapsed:.0}s ago. Wait or merge into one agent.",
                task.subagent_type
            ),
        });
    }

    // R5: necessity classifier
    let classified = classifier::classify(&task.description, &task.prompt);
    if classified.should_block {
        return Some(RuleBlock {
            rule_name: "necessity",
            pattern: classified.pattern,
            message: format!(
                "BLOCKED: {}",
                classified.suggestion.unwrap_or_else(|| "Use direct tools instead of spawning an agent.".to_string())
            ),
        });
    }

    // R6: type-switching
    if let Some(similar) = state.blocked_attempts.iter().find(|attempt| {
        attempt.agent_type != task.subagent_type && word_ratio_str(&attempt.description, &task.description) > 0.6
    }) {
        return Some(RuleBlock {
            rule_name: "type_switching",
            pattern: None,
            message: format!(
                "BLOCKED: This looks like the same request as a recently blocked {} attempt. Address that feedback instead of switching agent types.",
                similar.agent_type
            ),
        });
    }

    // R7: global cooldown
    if let Some(last) = state.last_non_team_timestamp() {
        let elapsed = now - last;
        if elapsed < config.global_cooldown_seconds as f64 {
            return Some(RuleBlock {
                rule_name: "global_cooldown",
                pattern: None,
                message: format!(
                    "BLOCKED: Another agent was spawned {elapsed:.0}s ago. Global cooldown is {}s.",
                    config.global_cooldown_seconds
                ),
            });
        }
    }

    None
}

fn advisory_for(state: &SessionState, task: &TaskEvent) -> Option<String> {
    if state.agent_count == 0 {
        return Some("This is the first agent spawned this session.".to_string());
    }
    if task.model.as_deref() == Some("opus") {
        return Some("Cost advisory: opus sub-agents are substantially more expensive than sonnet/haiku.".to_string());
    }
    None
}

static START_MARKER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:START:\s*)(~?/[^\s\n,]+)").expect("static pattern is valid regex"));
static TILDE_PATH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)(~/[^\s\n,]+)").expect("static pattern is valid regex"));
static ABSOLUTE_PATH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)(/[^\s\n,]+/[^\s\n,]+)").expect("static pattern is valid regex"));

/// Extract unique directory hints from an Explore agent's prompt (§4.6 step 10).
#[must_use]
pub fn extract_target_dirs(prompt: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    for pattern in [&*START_MARKER_PATTERN, &*TILDE_PATH_PATTERN, &*ABSOLUTE_PATH_PATTERN] {
        for capture in pattern.captures_iter(prompt) {
            let Some(raw) = capture.get(1) else { continue };
            let candidate = raw.as_str().trim_end_matches('/');
            let expanded = expand_tilde(candidate);
            let looks_like_dir = expanded.extension().is_none() || expanded.is_dir();
            if !looks_like_dir {
                continue;
            }
            let display = expanded.display().to_string();
            if !dirs.contains(&display) {
                dirs.push(display);
            }
        }
    }
    dirs
}

fn sweep_stale_state(paths: &StatePaths, state_ttl_hours: u64) {
    let Ok(entries) = std::fs::read_dir(&paths.state_dir) else {
        return;
    };
    let ttl = std::time::Duration::from_secs(state_ttl_hours.saturating_mul(3600));
    let now = std::time::SystemTime::now();
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        if name == "audit.jsonl" || name == "audit.jsonl.1" {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        if now.duration_since(modified).unwrap_or_default() > ttl {
            let _ = std::fs::remove_file(&path);
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

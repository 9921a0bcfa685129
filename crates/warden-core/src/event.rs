//! The tagged-variant event type the hot-path hooks parse stdin into.
//!
//! The host's payload is untyped JSON at the boundary; everything below
//! this module works with one of these three variants instead of a raw
//! `serde_json::Value`, so a new field on the wire never needs a new call
//! site to thread it through.

use serde::Deserialize;
use serde_json::Value;

use crate::error::WardenResult;

/// A parsed hook payload.
#[derive(Debug, Clone)]
pub enum HookEvent {
    /// A `Task` tool call — the spawn guard's concern.
    Task(TaskEvent),
    /// A `Read` tool call — the read guard's concern.
    Read(ReadEvent),
    /// Any other `tool_name`; both guards exit 0 immediately on this.
    Other,
}

/// Fields consumed from a Task payload (§6).
#[derive(Debug, Clone, Default)]
pub struct TaskEvent {
    /// Raw, unvalidated session id.
    pub session_id: String,
    /// `tool_input.subagent_type`.
    pub subagent_type: String,
    /// `tool_input.description`.
    pub description: String,
    /// `tool_input.prompt`.
    pub prompt: String,
    /// `tool_input.team_name`, if set.
    pub team_name: Option<String>,
    /// `tool_input.model`, if set.
    pub model: Option<String>,
    /// `tool_input.resume`, coerced to a bool.
    pub resume: bool,
}

/// Fields consumed from a Read payload (§6).
#[derive(Debug, Clone, Default)]
pub struct ReadEvent {
    /// Raw, unvalidated session id.
    pub session_id: String,
    /// `tool_input.file_path`.
    pub file_path: String,
}

#[derive(Deserialize)]
struct RawPayload {
    #[serde(default)]
    tool_name: String,
    #[serde(default)]
    tool_input: Value,
    #[serde(default)]
    session_id: String,
}

/// Parse a raw stdin payload into a [`HookEvent`].
///
/// Returns `Err` only when the payload isn't valid JSON at all (or isn't a
/// JSON object) — callers treat that as an input-shape error and fail open.
pub fn parse(payload: &str) -> WardenResult<HookEvent> {
    let raw: RawPayload = serde_json::from_str(payload)?;
    let input = &raw.tool_input;

    Ok(match raw.tool_name.as_str() {
        "Task" => HookEvent::Task(TaskEvent {
            session_id: raw.session_id,
            subagent_type: field_str(input, "subagent_type"),
            description: field_str(input, "description"),
            prompt: field_str(input, "prompt"),
            team_name: field_str_opt(input, "team_name"),
            model: field_str_opt(input, "model"),
            resume: field_truthy(input, "resume"),
        }),
        "Read" => HookEvent::Read(ReadEvent {
            session_id: raw.session_id,
            file_path: field_str(input, "file_path"),
        }),
        _ => HookEvent::Other,
    })
}

fn field_str(input: &Value, key: &str) -> String {
    input.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn field_str_opt(input: &Value, key: &str) -> Option<String> {
    input.get(key).and_then(Value::as_str).map(str::to_string)
}

fn field_truthy(input: &Value, key: &str) -> bool {
    match input.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty() && s != "false",
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    }
}

//! End-to-end tests driving the hook binaries as subprocesses, exactly as
//! the host would: a JSON payload on stdin, an exit code and optional
//! stderr message back.

use std::io::Write as _;
use std::process::{Command, Stdio};

use tempfile::TempDir;

struct Env {
    _dir: TempDir,
    state_dir: std::path::PathBuf,
    config_path: std::path::PathBuf,
    hooks_dir: std::path::PathBuf,
}

impl Env {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        let hooks_dir = dir.path().join("hooks");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::create_dir_all(&hooks_dir).unwrap();
        Self {
            config_path: state_dir.join("token-guard-config.json"),
            state_dir,
            hooks_dir,
            _dir: dir,
        }
    }

    fn run(&self, bin_env: &str, payload: &str) -> std::process::Output {
        let mut child = Command::new(bin_env)
            .env("STATE_DIR_OVERRIDE", &self.state_dir)
            .env("CONFIG_PATH_OVERRIDE", &self.config_path)
            .env("HOOKS_DIR_OVERRIDE", &self.hooks_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn hook binary");
        child
            .stdin
            .take()
            .unwrap()
            .write_all(payload.as_bytes())
            .unwrap();
        child.wait_with_output().expect("hook binary did not exit")
    }
}

fn task_payload(session_id: &str, subagent_type: &str, description: &str) -> String {
    serde_json::json!({
        "tool_name": "Task",
        "session_id": session_id,
        "tool_input": {
            "subagent_type": subagent_type,
            "description": description,
            "prompt": "",
        }
    })
    .to_string()
}

fn read_payload(session_id: &str, file_path: &str) -> String {
    serde_json::json!({
        "tool_name": "Read",
        "session_id": session_id,
        "tool_input": {"file_path": file_path}
    })
    .to_string()
}

#[test]
fn first_spawn_is_allowed() {
    let env = Env::new();
    let output = env.run(
        env!("CARGO_BIN_EXE_spawn-guard"),
        &task_payload("abcd1234efgh", "general-purpose", "refactor the billing module end to end"),
    );
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn second_explore_is_blocked() {
    let env = Env::new();
    let first = env.run(env!("CARGO_BIN_EXE_spawn-guard"), &task_payload("abcd1234efgh", "Explore", "map the repo"));
    assert_eq!(first.status.code(), Some(0));

    let second = env.run(
        env!("CARGO_BIN_EXE_spawn-guard"),
        &task_payload("abcd1234efgh", "Explore", "map the repo again"),
    );
    assert_eq!(second.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(stderr.contains("Max 1 per session"));
}

#[test]
fn necessity_classifier_blocks_direct_tool_phrasing() {
    let env = Env::new();
    let output = env.run(
        env!("CARGO_BIN_EXE_spawn-guard"),
        &task_payload("abcd1234efgh", "general-purpose", "search for the auth handler in the codebase"),
    );
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn invalid_session_id_is_blocked() {
    let env = Env::new();
    let output = env.run(env!("CARGO_BIN_EXE_spawn-guard"), &task_payload("x", "general-purpose", "do work"));
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn malformed_payload_fails_open() {
    let env = Env::new();
    let output = env.run(env!("CARGO_BIN_EXE_spawn-guard"), "not json");
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn duplicate_reads_of_the_same_path_are_blocked() {
    let env = Env::new();
    for _ in 0..2 {
        let output = env.run(env!("CARGO_BIN_EXE_read-guard"), &read_payload("abcd1234efgh", "/repo/auth.ts"));
        assert_eq!(output.status.code(), Some(0));
    }
    let third = env.run(env!("CARGO_BIN_EXE_read-guard"), &read_payload("abcd1234efgh", "/repo/auth.ts"));
    assert_eq!(third.status.code(), Some(2));
}

#[test]
fn self_heal_always_exits_zero_and_creates_state_dirs() {
    let env = Env::new();
    std::fs::remove_dir_all(&env.state_dir).unwrap();
    let output = env.run(env!("CARGO_BIN_EXE_self-heal"), "");
    assert_eq!(output.status.code(), Some(0));
    assert!(env.state_dir.is_dir());
    assert!(env.config_path.exists());
}

#[test]
fn agent_metrics_appends_a_record_for_a_transcript() {
    let env = Env::new();
    let transcript = env.hooks_dir.join("transcript.jsonl");
    std::fs::write(
        &transcript,
        "{\"message\":{\"usage\":{\"input_tokens\":1000,\"output_tokens\":200}}}\n",
    )
    .unwrap();
    let payload = serde_json::json!({
        "session_id": "abcd1234efgh",
        "agent_type": "general-purpose",
        "agent_id": "agent-1",
        "agent_transcript_path": transcript.display().to_string(),
    })
    .to_string();
    let output = env.run(env!("CARGO_BIN_EXE_agent-metrics"), &payload);
    assert_eq!(output.status.code(), Some(0));
    let metrics_log = env.state_dir.join("agent-metrics.jsonl");
    let contents = std::fs::read_to_string(metrics_log).unwrap();
    assert_eq!(contents.lines().count(), 1);
    assert!(contents.contains("\"agent_type\":\"general-purpose\""));
}

#[test]
fn report_mode_runs_without_stdin() {
    let env = Env::new();
    env.run(env!("CARGO_BIN_EXE_spawn-guard"), &task_payload("abcd1234efgh", "Explore", "map the repo"));

    let mut child = Command::new(env!("CARGO_BIN_EXE_spawn-guard"))
        .arg("--report")
        .env("STATE_DIR_OVERRIDE", &env.state_dir)
        .env("CONFIG_PATH_OVERRIDE", &env.config_path)
        .env("HOOKS_DIR_OVERRIDE", &env.hooks_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("allowed:"));
}

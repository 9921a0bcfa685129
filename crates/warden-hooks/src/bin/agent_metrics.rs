//! `agent-metrics`: the `SubagentStop` hook. Reads a JSON payload naming a
//! transcript file, folds its token usage, and appends one record to the
//! per-agent metrics log. Always exits 0 — metrics are best-effort and
//! never gate a host decision.

use std::io::Read as _;
use std::path::PathBuf;

use serde::Deserialize;
use warden_core::{metrics, paths::StatePaths};

#[derive(Deserialize, Default)]
struct StopPayload {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    agent_type: String,
    #[serde(default)]
    agent_id: String,
    #[serde(default)]
    agent_transcript_path: String,
}

fn main() {
    warden_core::logging::init();
    let paths = StatePaths::from_env();

    let mut payload = String::new();
    if std::io::stdin().read_to_string(&mut payload).is_err() {
        return;
    }

    let Ok(stop) = serde_json::from_str::<StopPayload>(&payload) else {
        tracing::debug!("malformed SubagentStop payload, skipping");
        return;
    };
    if stop.agent_transcript_path.is_empty() {
        return;
    }

    let totals = metrics::parse_transcript(&PathBuf::from(&stop.agent_transcript_path));
    let record = metrics::MetricsRecord::new(&stop.agent_type, &stop.agent_id, &stop.session_id, totals);
    metrics::append_and_truncate(&paths.metrics_log(), &record);
}

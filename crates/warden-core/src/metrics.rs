//! Per-agent metrics consumer (C10): fold a sub-agent's transcript into
//! real token totals and append one record to the metrics log.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Price per 1,000 fresh (non-cache-read) input tokens, in USD.
pub const COST_PER_1K_INPUT: f64 = 0.003;
/// Price per 1,000 output tokens, in USD.
pub const COST_PER_1K_OUTPUT: f64 = 0.015;
/// Price per 1,000 cache-read input tokens, in USD.
pub const COST_PER_1K_CACHE_READ: f64 = 0.0003;

/// Line count above which the metrics log is truncated.
pub const TRUNCATE_ABOVE_LINES: usize = 500;
/// Number of trailing lines kept after truncation.
pub const TRUNCATE_KEEP_LINES: usize = 400;

/// Summed token usage from one sub-agent transcript.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscriptTotals {
    /// Sum of `message.usage.input_tokens` across all lines.
    pub input_tokens: u64,
    /// Sum of `message.usage.output_tokens` across all lines.
    pub output_tokens: u64,
    /// Sum of `message.usage.cache_read_input_tokens` across all lines.
    pub cache_read_tokens: u64,
    /// Sum of `message.usage.cache_creation_input_tokens` across all lines.
    pub cache_creation_tokens: u64,
    /// Number of lines that contained a `message.usage` object.
    pub api_calls: u64,
}

#[derive(Deserialize)]
struct TranscriptLine {
    message: Option<TranscriptMessage>,
}

#[derive(Deserialize)]
struct TranscriptMessage {
    usage: Option<Usage>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

/// Parse a transcript file, summing token usage over every well-formed
/// line that carries a `message.usage` object. Malformed lines, lines
/// without a `usage` object, and a missing file are all silently skipped.
#[must_use]
pub fn parse_transcript(transcript_path: &Path) -> TranscriptTotals {
    let mut totals = TranscriptTotals::default();
    let Ok(contents) = std::fs::read_to_string(transcript_path) else {
        return totals;
    };
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(parsed) = serde_json::from_str::<TranscriptLine>(line) else {
            continue;
        };
        let Some(usage) = parsed.message.and_then(|m| m.usage) else {
            continue;
        };
        totals.input_tokens += usage.input_tokens;
        totals.output_tokens += usage.output_tokens;
        totals.cache_read_tokens += usage.cache_read_input_tokens;
        totals.cache_creation_tokens += usage.cache_creation_input_tokens;
        totals.api_calls += 1;
    }
    totals
}

/// Estimated cost in USD for a set of transcript totals, rounded to 4
/// decimal places. Fresh (non-cache-read) input tokens are derived as
/// `max(0, input_tokens - cache_read_tokens)`, never tracked separately.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_cost(totals: &TranscriptTotals) -> f64 {
    let fresh_input = totals.input_tokens.saturating_sub(totals.cache_read_tokens);
    let cost = (fresh_input as f64 / 1000.0) * COST_PER_1K_INPUT
        + (totals.cache_read_tokens as f64 / 1000.0) * COST_PER_1K_CACHE_READ
        + (totals.output_tokens as f64 / 1000.0) * COST_PER_1K_OUTPUT;
    (cost * 10_000.0).round() / 10_000.0
}

/// One line of the per-agent metrics log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// ISO-8601 UTC timestamp.
    pub ts: String,
    /// Always `"agent_completed"`.
    pub event: String,
    /// `agent_type` from the SubagentStop payload.
    pub agent_type: String,
    /// `agent_id` from the SubagentStop payload.
    pub agent_id: String,
    /// Truncated to 8 characters of the session id.
    pub session: String,
    /// Summed input tokens.
    pub input_tokens: u64,
    /// Summed output tokens.
    pub output_tokens: u64,
    /// Summed cache-read input tokens.
    pub cache_read_tokens: u64,
    /// Summed cache-creation input tokens.
    pub cache_creation_tokens: u64,
    /// Number of transcript lines carrying a `usage` object.
    pub api_calls: u64,
    /// `input_tokens + output_tokens`.
    pub total_tokens: u64,
    /// Estimated cost in USD, rounded to 4 decimal places.
    pub cost_usd: f64,
}

impl MetricsRecord {
    /// Build a record from a SubagentStop payload and its parsed transcript totals.
    #[must_use]
    pub fn new(agent_type: &str, agent_id: &str, session_id: &str, totals: TranscriptTotals) -> Self {
        Self {
            ts: Utc::now().to_rfc3339(),
            event: "agent_completed".to_string(),
            agent_type: agent_type.to_string(),
            agent_id: agent_id.to_string(),
            session: session_id.chars().take(8).collect(),
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
            cache_read_tokens: totals.cache_read_tokens,
            cache_creation_tokens: totals.cache_creation_tokens,
            api_calls: totals.api_calls,
            total_tokens: totals.input_tokens + totals.output_tokens,
            cost_usd: calculate_cost(&totals),
        }
    }
}

/// Append `record` to the metrics log, then truncate the log to its most
/// recent [`TRUNCATE_KEEP_LINES`] lines once it exceeds [`TRUNCATE_ABOVE_LINES`].
pub fn append_and_truncate(path: &Path, record: &MetricsRecord) {
    let Ok(line) = serde_json::to_string(record) else {
        tracing::warn!("failed to serialize metrics record");
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    use std::io::Write as _;
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut file) => {
            if let Err(err) = writeln!(file, "{line}") {
                tracing::warn!(%err, "failed to append metrics record");
                return;
            }
        }
        Err(err) => {
            tracing::warn!(%err, "failed to open metrics log for append");
            return;
        }
    }
    truncate_if_needed(path);
}

/// Read every well-formed [`MetricsRecord`] line of the metrics log,
/// silently discarding malformed lines. Returns an empty vector if the
/// file does not exist.
#[must_use]
pub fn parse_metrics_log(path: &Path) -> Vec<MetricsRecord> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

fn truncate_if_needed(path: &Path) {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return;
    };
    let lines: Vec<&str> = contents.lines().collect();
    if lines.len() <= TRUNCATE_ABOVE_LINES {
        return;
    }
    let kept = lines[lines.len() - TRUNCATE_KEEP_LINES..].join("\n");
    let _ = std::fs::write(path, kept + "\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_and_sums_usage_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transcript.jsonl");
        std::fs::write(
            &path,
            "{\"message\":{\"usage\":{\"input_tokens\":100,\"output_tokens\":20,\"cache_read_input_tokens\":10,\"cache_creation_input_tokens\":5}}}\n\
             not json\n\
             {\"message\":{\"no_usage\":true}}\n\
             {\"message\":{\"usage\":{\"input_tokens\":50,\"output_tokens\":5}}}\n",
        )
        .unwrap();
        let totals = parse_transcript(&path);
        assert_eq!(totals.input_tokens, 150);
        assert_eq!(totals.output_tokens, 25);
        assert_eq!(totals.cache_read_tokens, 10);
        assert_eq!(totals.api_calls, 2);
    }

    #[test]
    fn missing_transcript_yields_zero_totals() {
        let dir = TempDir::new().unwrap();
        let totals = parse_transcript(&dir.path().join("nope.jsonl"));
        assert_eq!(totals, TranscriptTotals::default());
    }

    #[test]
    fn cost_formula_matches_documented_constants() {
        let totals = TranscriptTotals {
            input_tokens: 35_000,
            output_tokens: 15_000,
            cache_read_tokens: 5_000,
            cache_creation_tokens: 0,
            api_calls: 1,
        };
        // fresh_input = 30_000 -> 30 * 0.003 = 0.09
        // cache_read = 5 * 0.0003 = 0.0015
        // output = 15 * 0.015 = 0.225
        let cost = calculate_cost(&totals);
        assert!((cost - 0.3165).abs() < 1e-9);
    }

    #[test]
    fn cache_read_never_produces_negative_fresh_input() {
        let totals = TranscriptTotals {
            input_tokens: 10,
            output_tokens: 0,
            cache_read_tokens: 1_000,
            cache_creation_tokens: 0,
            api_calls: 1,
        };
        let cost = calculate_cost(&totals);
        assert!(cost >= 0.0);
    }

    #[test]
    fn session_is_truncated_to_eight_chars() {
        let record = MetricsRecord::new("general-purpose", "agent-1", "abcd1234efgh", TranscriptTotals::default());
        assert_eq!(record.session, "abcd1234");
    }

    #[test]
    fn log_truncates_once_past_five_hundred_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent-metrics.jsonl");
        let filler = (0..520)
            .map(|i| format!("{{\"line\":{i}}}"))
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&path, filler + "\n").unwrap();
        truncate_if_needed(&path);
        let remaining = std::fs::read_to_string(&path).unwrap();
        assert_eq!(remaining.lines().count(), TRUNCATE_KEEP_LINES);
    }
}

//! Analytics reducer (C8): offline folding of the audit log (and, when
//! present, the metrics log) into counts, top-N breakdowns, and cost
//! estimates. Read-only; never touches the hot path.

use std::collections::HashMap;
use std::path::Path;

use crate::audit::{self, AuditEvent, AuditRecord};
use crate::metrics::{self, MetricsRecord};

/// Estimated input tokens a disallowed spawn would otherwise have cost.
pub const ESTIMATED_BLOCKED_INPUT_TOKENS: u64 = 35_000;
/// Estimated output tokens a disallowed spawn would otherwise have cost.
pub const ESTIMATED_BLOCKED_OUTPUT_TOKENS: u64 = 15_000;

/// Top-N breakdown entries are capped at this size.
const TOP_N: usize = 10;

/// Full `--report` output.
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// Count of `allow` audit events.
    pub allow_count: u64,
    /// Count of `block` audit events.
    pub block_count: u64,
    /// Count of `resume` audit events.
    pub resume_count: u64,
    /// Count of `allow_team` audit events.
    pub team_count: u64,
    /// `(type, count)` pairs, most frequent first.
    pub top_types: Vec<(String, u64)>,
    /// `(reason, count)` pairs, most frequent first.
    pub top_reasons: Vec<(String, u64)>,
    /// `(pattern, count)` pairs, most frequent first.
    pub top_necessity_patterns: Vec<(String, u64)>,
    /// Heuristic tokens saved across all blocks.
    pub estimated_tokens_saved: u64,
    /// Heuristic cost saved across all blocks, in USD.
    pub estimated_cost_saved_usd: f64,
    /// Real totals folded from the metrics log, if it exists.
    pub real_usage: Option<RealUsageTotals>,
}

/// Real, transcript-derived totals folded from the metrics log.
#[derive(Debug, Clone, Default)]
pub struct RealUsageTotals {
    /// Number of `agent_completed` records folded.
    pub agent_count: u64,
    /// Sum of `total_tokens` across all records.
    pub total_tokens: u64,
    /// Sum of `cost_usd` across all records.
    pub total_cost_usd: f64,
}

/// Short `--usage` summary.
#[derive(Debug, Clone, Default)]
pub struct UsageSummary {
    /// Distinct session ids observed in the audit log.
    pub sessions_tracked: u64,
    /// Total non-resume attempts (allow + block + team).
    pub total_attempts: u64,
    /// Count of `block` audit events.
    pub block_count: u64,
    /// Heuristic cost saved across all blocks, in USD.
    pub estimated_savings_usd: f64,
    /// Up to three most common block reasons.
    pub top_block_reasons: Vec<(String, u64)>,
}

fn load_records(audit_log: &Path) -> Vec<AuditRecord> {
    audit::read_jsonl_fault_tolerant(audit_log)
}

fn top_n(counts: HashMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

/// Build the full `--report` output from the audit log and (if present) the metrics log.
#[must_use]
pub fn build_report(audit_log: &Path, metrics_log: &Path) -> Report {
    let records = load_records(audit_log);
    let mut report = Report::default();
    let mut types = HashMap::new();
    let mut reasons = HashMap::new();
    let mut patterns = HashMap::new();

    for record in &records {
        *types.entry(record.record_type.clone()).or_insert(0u64) += 1;
        match record.event {
            AuditEvent::Allow => report.allow_count += 1,
            AuditEvent::Block => {
                report.block_count += 1;
                if let Some(reason) = &record.reason {
                    *reasons.entry(reason.clone()).or_insert(0u64) += 1;
                }
                if let Some(pattern) = &record.pattern {
                    *patterns.entry(pattern.clone()).or_insert(0u64) += 1;
                }
            }
            AuditEvent::AllowTeam => report.team_count += 1,
            AuditEvent::Resume => report.resume_count += 1,
            AuditEvent::Warn => {}
        }
    }

    report.top_types = top_n(types, TOP_N);
    report.top_reasons = top_n(reasons, TOP_N);
    report.top_necessity_patterns = top_n(patterns, TOP_N);
    report.estimated_tokens_saved =
        report.block_count * (ESTIMATED_BLOCKED_INPUT_TOKENS + ESTIMATED_BLOCKED_OUTPUT_TOKENS);
    report.estimated_cost_saved_usd = estimated_cost_saved(report.block_count);

    let metrics_records: Vec<MetricsRecord> = metrics::parse_metrics_log(metrics_log);
    if !metrics_records.is_empty() {
        let total_tokens = metrics_records.iter().map(|m| m.total_tokens).sum();
        let total_cost_usd = metrics_records.iter().map(|m| m.cost_usd).sum();
        report.real_usage = Some(RealUsageTotals {
            agent_count: metrics_records.len() as u64,
            total_tokens,
            total_cost_usd,
        });
    }

    report
}

/// Build the short `--usage` summary from the audit log.
#[must_use]
pub fn build_usage_summary(audit_log: &Path) -> UsageSummary {
    let records = load_records(audit_log);
    let mut sessions = std::collections::HashSet::new();
    let mut reasons = HashMap::new();
    let mut summary = UsageSummary::default();

    for record in &records {
        sessions.insert(record.session.clone());
        match record.event {
            AuditEvent::Allow | AuditEvent::Block | AuditEvent::AllowTeam => summary.total_attempts += 1,
            AuditEvent::Resume | AuditEvent::Warn => {}
        }
        if record.event == AuditEvent::Block {
            summary.block_count += 1;
            if let Some(reason) = &record.reason {
                *reasons.entry(reason.clone()).or_insert(0u64) += 1;
            }
        }
    }

    summary.sessions_tracked = sessions.len() as u64;
    summary.estimated_savings_usd = estimated_cost_saved(summary.block_count);
    summary.top_block_reasons = top_n(reasons, 3);
    summary
}

#[allow(clippy::cast_precision_loss)]
fn estimated_cost_saved(block_count: u64) -> f64 {
    let per_block = (ESTIMATED_BLOCKED_INPUT_TOKENS as f64 / 1000.0) * metrics::COST_PER_1K_INPUT
        + (ESTIMATED_BLOCKED_OUTPUT_TOKENS as f64 / 1000.0) * metrics::COST_PER_1K_OUTPUT;
    (block_count as f64 * per_block * 10_000.0).round() / 10_000.0
}

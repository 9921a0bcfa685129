//! `spawn-guard`: the Task-tool `PreToolUse` hook. Reads a JSON payload on
//! stdin and exits 0 to allow, 2 to block. `--report`/`--usage` switch to
//! the offline analytics reducer instead of reading stdin.

use std::io::Read as _;

use clap::Parser;
use warden_core::{config::Config, paths::StatePaths, reducer, spawn_guard};

/// Enforce sub-agent spawn policy, or print analytics about past enforcement.
#[derive(Parser, Debug)]
#[command(name = "spawn-guard", version, about)]
struct Args {
    /// Print the full analytics report (counts, top reasons, estimated savings) and exit.
    #[arg(long)]
    report: bool,
    /// Print a short usage summary and exit.
    #[arg(long)]
    usage: bool,
}

fn main() {
    warden_core::logging::init();
    let args = Args::parse();
    let paths = StatePaths::from_env();

    if args.report {
        let report = reducer::build_report(&paths.audit_log(), &paths.metrics_log());
        print_report(&report);
        return;
    }
    if args.usage {
        let summary = reducer::build_usage_summary(&paths.audit_log());
        print_usage(&summary);
        return;
    }

    let mut payload = String::new();
    if std::io::stdin().read_to_string(&mut payload).is_err() {
        std::process::exit(0);
    }

    let config = Config::load(&paths.config_path);
    let outcome = spawn_guard::handle_payload(&payload, &paths, &config);
    if let Some(message) = outcome.message {
        eprintln!("{message}");
    }
    std::process::exit(outcome.exit_code);
}

fn print_report(report: &reducer::Report) {
    println!("warden spawn-guard report");
    println!("  allowed:      {}", report.allow_count);
    println!("  blocked:      {}", report.block_count);
    println!("  team spawns:  {}", report.team_count);
    println!("  resumed:      {}", report.resume_count);
    println!("  top types:");
    for (name, count) in &report.top_types {
        println!("    {name}: {count}");
    }
    println!("  top block reasons:");
    for (name, count) in &report.top_reasons {
        println!("    {name}: {count}");
    }
    println!("  top necessity patterns:");
    for (name, count) in &report.top_necessity_patterns {
        println!("    {name}: {count}");
    }
    println!(
        "  estimated tokens saved: {} (~${:.2})",
        report.estimated_tokens_saved, report.estimated_cost_saved_usd
    );
    if let Some(real) = &report.real_usage {
        println!(
            "  real usage: {} agent(s), {} tokens, ${:.4}",
            real.agent_count, real.total_tokens, real.total_cost_usd
        );
    }
}

fn print_usage(summary: &reducer::UsageSummary) {
    println!(
        "sessions tracked: {}, attempts: {}, blocked: {}, estimated savings: ${:.2}",
        summary.sessions_tracked, summary.total_attempts, summary.block_count, summary.estimated_savings_usd
    );
    for (reason, count) in &summary.top_block_reasons {
        println!("  {reason}: {count}");
    }
}

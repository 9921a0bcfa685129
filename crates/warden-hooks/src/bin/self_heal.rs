//! `self-heal`: out-of-band maintenance pass. Always exits 0; prints a
//! one-line summary and appends the full report to the heal log.

use warden_core::{heal, paths::StatePaths};

fn main() {
    warden_core::logging::init();
    let paths = StatePaths::from_env();
    let report = heal::run(&paths);
    println!("{}", report.summary_line());
    for issue in &report.structural_issues {
        eprintln!("structural: {issue}");
    }
    for issue in &report.smoke_test_issues {
        eprintln!("smoke test: {issue}");
    }
}

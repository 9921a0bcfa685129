//! Logging setup shared by every hook binary.
//!
//! The hot path must stay quiet by default — stdout/stderr on the hot path
//! are the host-facing allow/block/advisory channel, not a log stream — so
//! the subscriber writes to stderr only once an operator opts in via
//! `RUST_LOG`, and defaults to `warn`.

/// Install a process-wide `tracing` subscriber filtered by `RUST_LOG`.
///
/// Safe to call once per process. Defaults to `warn` so a host that never
/// sets `RUST_LOG` sees no extra output on the hot path.
pub fn init() {
    let filter = tracing_subscriber_env_filter();
    let _ = tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .without_time()
            .finish(),
    );
}

fn tracing_subscriber_env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

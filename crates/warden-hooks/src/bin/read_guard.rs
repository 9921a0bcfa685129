//! `read-guard`: the Read-tool `PreToolUse` hook. Reads a JSON payload on
//! stdin and exits 0 to allow (optionally with an advisory on stderr), 2 to
//! block.

use std::io::Read as _;

use warden_core::{config::Config, paths::StatePaths, read_guard};

fn main() {
    warden_core::logging::init();
    let paths = StatePaths::from_env();

    let mut payload = String::new();
    if std::io::stdin().read_to_string(&mut payload).is_err() {
        std::process::exit(0);
    }

    let config = Config::load(&paths.config_path);
    let outcome = read_guard::handle_payload(&payload, &paths, &config);
    if let Some(message) = outcome.message {
        eprintln!("{message}");
    }
    std::process::exit(outcome.exit_code);
}

//! Self-heal (C9): a best-effort maintenance pass run out of band from the
//! hot path. Never blocks a spawn or a read; always exits 0.

use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::audit;
use crate::config::Config;
use crate::paths::StatePaths;

/// `.lock` sidecars older than this are considered abandoned and removed.
pub const STALE_LOCK_SECONDS: u64 = 300;
/// Wall-clock budget for each smoke-test subprocess.
pub const SMOKE_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Hook binaries the structural check and smoke test expect to find under
/// [`StatePaths::hooks_dir`].
const EXPECTED_HOOK_BINARIES: &[&str] = &["spawn-guard", "read-guard", "self-heal", "agent-metrics"];

/// One run's findings, appended to the heal log as a single JSON line.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealReport {
    /// ISO-8601 local timestamp.
    pub ts: String,
    /// Problems found during the structural check.
    pub structural_issues: Vec<String>,
    /// Problems found (or skipped) during the smoke test.
    pub smoke_test_issues: Vec<String>,
    /// Stale session/read-state files deleted for being unparseable.
    pub state_files_removed: u64,
    /// Leftover `.tmp` files deleted.
    pub tmp_files_removed: u64,
    /// Stale `.lock` sidecars deleted.
    pub lock_files_removed: u64,
    /// Whether the audit log was rotated this run.
    pub audit_rotated: bool,
    /// Repairs applied during the auto-repair phase.
    pub repairs_made: Vec<String>,
}

impl HealReport {
    /// One-line human summary, suitable for stdout.
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "self-heal: {} structural issue(s), {} state file(s) removed, {} lock file(s) removed, {} repair(s), audit_rotated={}",
            self.structural_issues.len(),
            self.state_files_removed,
            self.lock_files_removed,
            self.repairs_made.len(),
            self.audit_rotated
        )
    }
}

/// Run all five phases and append the resulting report to the heal log.
/// Always succeeds from the caller's point of view; every phase is
/// best-effort and failures are recorded as report entries, not errors.
pub fn run(paths: &StatePaths) -> HealReport {
    let mut report = HealReport {
        ts: Local::now().to_rfc3339(),
        ..HealReport::default()
    };

    report.structural_issues = structural_check(paths);
    report.smoke_test_issues = smoke_test(paths);

    let sweep = state_health_sweep(paths);
    report.state_files_removed = sweep.state_files_removed;
    report.tmp_files_removed = sweep.tmp_files_removed;
    report.lock_files_removed = sweep.lock_files_removed;
    report.audit_rotated = audit::rotate_if_needed(&paths.audit_log(), audit::ROTATION_THRESHOLD_LINES);

    report.repairs_made = auto_repair(paths);

    append_report(&paths.heal_log(), &report);
    report
}

fn structural_check(paths: &StatePaths) -> Vec<String> {
    let mut issues = Vec::new();

    if !paths.state_dir.is_dir() {
        issues.push(format!("state dir missing: {}", paths.state_dir.display()));
    }
    if !paths.hooks_dir.is_dir() {
        issues.push(format!("hooks dir missing: {}", paths.hooks_dir.display()));
    }
    for name in EXPECTED_HOOK_BINARIES {
        if !paths.hooks_dir.join(name).exists() {
            issues.push(format!("hook binary missing: {name}"));
        }
    }
    if paths.config_path.exists() {
        match std::fs::read_to_string(&paths.config_path) {
            Ok(contents) => {
                if serde_json::from_str::<serde_json::Value>(&contents).is_err() {
                    issues.push("config file is not valid JSON".to_string());
                }
            }
            Err(err) => issues.push(format!("config file unreadable: {err}")),
        }
    }

    issues
}

fn smoke_test(paths: &StatePaths) -> Vec<String> {
    let mut issues = Vec::new();
    let probes: &[(&str, &str)] = &[
        (
            "spawn-guard",
            r#"{"tool_name":"Task","session_id":"selfheal0smoketest","tool_input":{"subagent_type":"claude-code-guide","description":"smoke test"}}"#,
        ),
        (
            "read-guard",
            r#"{"tool_name":"Read","session_id":"selfheal0smoketest","tool_input":{"file_path":"/tmp/self-heal-smoke-test"}}"#,
        ),
    ];

    for (binary, payload) in probes {
        let path = paths.hooks_dir.join(binary);
        if !path.exists() {
            issues.push(format!("{binary}: skipped, binary not present"));
            continue;
        }
        match run_with_timeout(&path, payload, SMOKE_TEST_TIMEOUT) {
            Ok(true) => {}
            Ok(false) => issues.push(format!("{binary}: exited with an unexpected status")),
            Err(err) => issues.push(format!("{binary}: {err}")),
        }
    }

    issues
}

/// Run `binary` with `payload` piped to stdin, killing it if it outlives
/// `timeout`. `Ok(true)` means it exited with status 0 or 2 (both are
/// legitimate guard outcomes); anything else is treated as a failure.
fn run_with_timeout(binary: &Path, payload: &str, timeout: Duration) -> std::io::Result<bool> {
    use std::process::{Command, Stdio};

    let mut child = Command::new(binary)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(payload.as_bytes());
    }

    let start = std::time::Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(matches!(status.code(), Some(0) | Some(2)));
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(false);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[derive(Default)]
struct SweepCounts {
    state_files_removed: u64,
    tmp_files_removed: u64,
    lock_files_removed: u64,
}

fn state_health_sweep(paths: &StatePaths) -> SweepCounts {
    let mut counts = SweepCounts::default();
    let Ok(entries) = std::fs::read_dir(&paths.state_dir) else {
        return counts;
    };

    let now = std::time::SystemTime::now();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if name.ends_with(".tmp") {
            if std::fs::remove_file(&path).is_ok() {
                counts.tmp_files_removed += 1;
            }
            continue;
        }

        if name.ends_with(".lock") {
            if is_stale(&path, now, STALE_LOCK_SECONDS) && std::fs::remove_file(&path).is_ok() {
                counts.lock_files_removed += 1;
            }
            continue;
        }

        if name.ends_with(".json") && !is_reserved_log(name) {
            let parses = std::fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<serde_json::Value>(&c).ok())
                .is_some();
            if !parses && std::fs::remove_file(&path).is_ok() {
                counts.state_files_removed += 1;
            }
        }
    }

    counts
}

fn is_reserved_log(name: &str) -> bool {
    matches!(name, "token-guard-config.json")
}

fn is_stale(path: &Path, now: std::time::SystemTime, max_age_secs: u64) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .is_some_and(|age| age.as_secs() >= max_age_secs)
}

fn auto_repair(paths: &StatePaths) -> Vec<String> {
    let mut repairs = Vec::new();

    if !paths.state_dir.is_dir() && std::fs::create_dir_all(&paths.state_dir).is_ok() {
        repairs.push(format!("recreated state dir: {}", paths.state_dir.display()));
    }
    if !paths.hooks_dir.is_dir() && std::fs::create_dir_all(&paths.hooks_dir).is_ok() {
        repairs.push(format!("recreated hooks dir: {}", paths.hooks_dir.display()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for name in EXPECTED_HOOK_BINARIES {
            let path = paths.hooks_dir.join(name);
            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };
            let mode = metadata.permissions().mode();
            if mode & 0o111 == 0 {
                let mut perms = metadata.permissions();
                perms.set_mode(mode | 0o111);
                if std::fs::set_permissions(&path, perms).is_ok() {
                    repairs.push(format!("made {name} executable"));
                }
            }
        }
    }

    let config_invalid = std::fs::read_to_string(&paths.config_path)
        .ok()
        .is_none_or(|c| serde_json::from_str::<serde_json::Value>(&c).is_err());
    if config_invalid {
        let defaults = Config::defaults_json();
        if let Ok(serialized) = serde_json::to_string_pretty(&defaults) {
            if let Some(parent) = paths.config_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if std::fs::write(&paths.config_path, serialized).is_ok() {
                repairs.push("regenerated config from defaults".to_string());
            }
        }
    }

    repairs
}

fn append_report(path: &Path, report: &HealReport) {
    let Ok(line) = serde_json::to_string(report) else {
        tracing::warn!("failed to serialize self-heal report");
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut file) => {
            if let Err(err) = writeln!(file, "{line}") {
                tracing::warn!(%err, "failed to append self-heal report");
            }
        }
        Err(err) => tracing::warn!(%err, "failed to open self-heal log for append"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> StatePaths {
        StatePaths {
            state_dir: dir.path().join("state"),
            config_path: dir.path().join("state/token-guard-config.json"),
            hooks_dir: dir.path().join("hooks"),
        }
    }

    #[test]
    fn missing_dirs_are_recreated_and_reported() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        let report = run(&p);
        assert!(p.state_dir.is_dir());
        assert!(p.hooks_dir.is_dir());
        assert!(report.repairs_made.iter().any(|r| r.contains("state dir")));
        assert!(report.repairs_made.iter().any(|r| r.contains("hooks dir")));
    }

    #[test]
    fn malformed_state_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        std::fs::create_dir_all(&p.state_dir).unwrap();
        std::fs::write(p.state_dir.join("abcd1234efgh.json"), "not json").unwrap();
        let report = run(&p);
        assert_eq!(report.state_files_removed, 1);
        assert!(!p.state_dir.join("abcd1234efgh.json").exists());
    }

    #[test]
    fn leftover_tmp_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        std::fs::create_dir_all(&p.state_dir).unwrap();
        std::fs::write(p.state_dir.join("stray.tmp"), "x").unwrap();
        let report = run(&p);
        assert_eq!(report.tmp_files_removed, 1);
    }

    #[test]
    fn missing_config_is_regenerated_from_defaults() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        let report = run(&p);
        assert!(p.config_path.exists());
        assert!(report.repairs_made.iter().any(|r| r.contains("regenerated config")));
    }

    #[test]
    fn report_is_appended_to_heal_log() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        run(&p);
        let contents = std::fs::read_to_string(p.heal_log()).unwrap();
        assert_eq!(contents.lines().count(), 1);
        let parsed: HealReport = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.ts, parsed.ts);
    }

    #[test]
    fn fresh_lock_file_is_kept() {
        let dir = TempDir::new().unwrap();
        let p = paths(&dir);
        std::fs::create_dir_all(&p.state_dir).unwrap();
        std::fs::write(p.state_dir.join("abcd1234efgh.json.lock"), "").unwrap();
        let report = run(&p);
        assert_eq!(report.lock_files_removed, 0);
        assert!(p.state_dir.join("abcd1234efgh.json.lock").exists());
    }
}

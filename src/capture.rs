//! One capture run: resolve the executable, drive it, dump and render.

use std::path::Path;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::Settings;
use tokmon_core::pty::{ChainResolver, ExecutableResolver};
use tokmon_core::usage::{fetch_usage, render, render_session_error, CaptureRequest, OutputMode};

/// Resolver configured from `[target]` and the environment overrides
pub fn system_resolver(settings: &Settings) -> impl ExecutableResolver {
    ChainResolver::system()
        .with_override(settings.target.executable.clone())
        .with_known_locations(&settings.target.known_locations)
        .with_search_timeout(settings.target.search_timeout())
}

/// Capture the status screen and return the text to print.
///
/// Never fails: session errors are rendered in the output itself.
pub fn run(
    settings: &Settings,
    resolver: &dyn ExecutableResolver,
    mode: OutputMode,
    raw: Option<&Path>,
) -> String {
    let executable = resolver.resolve();
    debug!("Resolved {:?} via {:?}", executable.path, executable.source);

    let request = CaptureRequest {
        executable,
        working_dir: settings.target.resolved_working_dir(),
        window: settings.target.window(),
        term: settings.target.term.clone(),
        driver: settings.driver.clone(),
    };

    match fetch_usage(&request) {
        Ok(capture) => {
            if let Some(path) = raw {
                write_raw(path, &capture.transcript);
            }
            render(&capture.extraction, mode)
        }
        Err(e) => {
            warn!("Usage capture failed: {}", e);
            render_session_error(&e, mode, Utc::now())
        }
    }
}

/// Best-effort transcript dump; failures are logged and ignored
pub fn write_raw(path: &Path, transcript: &str) {
    if let Err(e) = std::fs::write(path, transcript) {
        debug!("Failed to write raw transcript to {:?}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tokmon_core::driver::DriverConfig;
    use tokmon_core::pty::{ResolutionSource, ResolvedExecutable};

    struct FixedResolver(PathBuf);

    impl ExecutableResolver for FixedResolver {
        fn resolve(&self) -> ResolvedExecutable {
            ResolvedExecutable {
                path: self.0.clone(),
                source: ResolutionSource::Override,
            }
        }
    }

    /// Stands in for the target: prompt, status panel on `/status`, quits on `/exit`
    const FAKE_TARGET: &str = r#"#!/bin/sh
printf '\033[1m\342\235\257\033[0m Try "hello"\n'
while IFS= read -r line; do
  case "$line" in
    */status*) printf 'Current session\n\033[2m45%% used\033[0m\nResets in 3 hours\n' ;;
    */exit*) exit 0 ;;
  esac
done
"#;

    fn fast_settings(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.target.working_dir = Some(dir.to_path_buf());
        settings.driver = DriverConfig {
            initial_wait_sec: 2.0,
            ready_settle_sec: 0.1,
            command_ack_wait_sec: 0.2,
            submit_delay_sec: 0.1,
            detail_settle_sec: 0.2,
            exit_settle_sec: 1.0,
            hard_ceiling_sec: 10.0,
            poll_interval_ms: 20,
            ..DriverConfig::default()
        };
        settings
    }

    #[test]
    fn test_run_against_fake_target() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("claude");
        std::fs::write(&script, FAKE_TARGET).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let raw = dir.path().join("raw.txt");

        let settings = fast_settings(dir.path());
        let output = run(
            &settings,
            &FixedResolver(script),
            OutputMode::Plain,
            Some(&raw),
        );

        assert_eq!(output, "current_session: Resets in 3 hours");
        let dumped = std::fs::read_to_string(&raw).unwrap();
        assert!(dumped.contains("45% used"));
        assert!(!dumped.contains('\x1b'));
    }

    #[test]
    fn test_spawn_failure_is_reported_in_output() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fast_settings(dir.path());
        let missing = dir.path().join("no-such-claude");

        let output = run(
            &settings,
            &FixedResolver(missing),
            OutputMode::Json,
            None,
        );

        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["error"], "spawn_failed");
        assert_eq!(value["source"], "status_ui");
    }

    #[test]
    fn test_write_raw_failure_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(&dir.path().join("missing/dir/raw.txt"), "transcript");

        let path = dir.path().join("raw.txt");
        write_raw(&path, "transcript");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "transcript");
    }
}

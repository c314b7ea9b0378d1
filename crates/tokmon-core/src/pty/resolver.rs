//! Executable discovery for the target program.
//!
//! Resolution is an ordered fallback chain; each step runs only when the
//! previous one produced nothing:
//!
//! 1. explicit override (config file or `CLAUDE_PATH`)
//! 2. known install locations that exist and are executable
//! 3. `which <name>` with a short timeout
//! 4. the bare name, left to PATH lookup at spawn time

use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

/// Default program name of the target CLI
pub const DEFAULT_PROGRAM: &str = "claude";

/// Default timeout for the PATH search utility
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Install locations probed when no override is configured (`~` is the home directory)
pub const DEFAULT_KNOWN_LOCATIONS: &[&str] = &[
    "/opt/homebrew/bin/claude",
    "/usr/local/bin/claude",
    "~/.claude/local/claude",
    "~/.local/bin/claude",
];

/// Which step of the chain produced the executable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// Explicitly configured path
    Override,
    /// One of the known install locations
    KnownLocation,
    /// Found by the PATH search utility
    PathSearch,
    /// Bare program name, resolved by the OS at spawn time
    Bare,
}

/// Result of executable resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExecutable {
    pub path: PathBuf,
    pub source: ResolutionSource,
}

/// Anything that can decide which executable to launch
pub trait ExecutableResolver {
    fn resolve(&self) -> ResolvedExecutable;
}

/// Filesystem and PATH access used by [`ChainResolver`]
pub trait ExecutableProbe {
    /// Whether `path` exists and carries an executable permission bit
    fn is_executable(&self, path: &Path) -> bool;

    /// Look `name` up on PATH, giving up after `timeout`
    fn search_path(&self, name: &str, timeout: Duration) -> Option<PathBuf>;
}

/// Probe backed by the real filesystem and the `which` utility
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl ExecutableProbe for SystemProbe {
    fn is_executable(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    fn search_path(&self, name: &str, timeout: Duration) -> Option<PathBuf> {
        let mut child = Command::new("which")
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if start.elapsed() >= timeout => {
                    debug!("which {} timed out after {:?}", name, timeout);
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                Ok(None) => thread::sleep(Duration::from_millis(20)),
                Err(e) => {
                    debug!("which {} failed: {}", name, e);
                    return None;
                }
            }
        };

        if !status.success() {
            return None;
        }

        let mut stdout = String::new();
        child.stdout.take()?.read_to_string(&mut stdout).ok()?;
        let found = stdout.lines().next().unwrap_or("").trim();
        if found.is_empty() {
            None
        } else {
            Some(PathBuf::from(found))
        }
    }
}

/// Ordered fallback chain over an [`ExecutableProbe`]
#[derive(Debug, Clone)]
pub struct ChainResolver<P> {
    probe: P,
    program: String,
    override_path: Option<PathBuf>,
    known_locations: Vec<PathBuf>,
    search_timeout: Duration,
}

impl ChainResolver<SystemProbe> {
    /// Resolver for the default program using the real filesystem
    pub fn system() -> Self {
        Self::new(SystemProbe, DEFAULT_PROGRAM)
    }
}

impl<P: ExecutableProbe> ChainResolver<P> {
    /// Create a resolver with the default install locations
    pub fn new(probe: P, program: impl Into<String>) -> Self {
        Self {
            probe,
            program: program.into(),
            override_path: None,
            known_locations: DEFAULT_KNOWN_LOCATIONS
                .iter()
                .map(|p| expand_home(p))
                .collect(),
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
        }
    }

    /// Use an explicit path when set (empty paths are ignored)
    pub fn with_override(mut self, path: Option<PathBuf>) -> Self {
        self.override_path = path.filter(|p| !p.as_os_str().is_empty());
        self
    }

    /// Replace the known install locations (`~` is expanded)
    pub fn with_known_locations<S: AsRef<str>>(mut self, locations: &[S]) -> Self {
        self.known_locations = locations.iter().map(|p| expand_home(p.as_ref())).collect();
        self
    }

    /// Timeout for the PATH search step
    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }
}

impl<P: ExecutableProbe> ExecutableResolver for ChainResolver<P> {
    fn resolve(&self) -> ResolvedExecutable {
        if let Some(path) = &self.override_path {
            return ResolvedExecutable {
                path: path.clone(),
                source: ResolutionSource::Override,
            };
        }

        if let Some(path) = self
            .known_locations
            .iter()
            .find(|p| self.probe.is_executable(p))
        {
            return ResolvedExecutable {
                path: path.clone(),
                source: ResolutionSource::KnownLocation,
            };
        }

        if let Some(path) = self.probe.search_path(&self.program, self.search_timeout) {
            return ResolvedExecutable {
                path,
                source: ResolutionSource::PathSearch,
            };
        }

        debug!("No {} executable found, deferring to PATH at spawn", self.program);
        ResolvedExecutable {
            path: PathBuf::from(&self.program),
            source: ResolutionSource::Bare,
        }
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashSet;

    /// Fake probe with a fixed set of executables and an optional PATH hit
    struct FakeProbe {
        executables: HashSet<PathBuf>,
        on_path: Option<PathBuf>,
        searches: Cell<usize>,
    }

    impl FakeProbe {
        fn new(executables: &[&str], on_path: Option<&str>) -> Self {
            Self {
                executables: executables.iter().map(PathBuf::from).collect(),
                on_path: on_path.map(PathBuf::from),
                searches: Cell::new(0),
            }
        }
    }

    impl ExecutableProbe for &FakeProbe {
        fn is_executable(&self, path: &Path) -> bool {
            self.executables.contains(path)
        }

        fn search_path(&self, _name: &str, _timeout: Duration) -> Option<PathBuf> {
            self.searches.set(self.searches.get() + 1);
            self.on_path.clone()
        }
    }

    #[test]
    fn test_override_wins() {
        let probe = FakeProbe::new(&["/usr/local/bin/claude"], Some("/bin/claude"));
        let resolved = ChainResolver::new(&probe, "claude")
            .with_override(Some(PathBuf::from("/custom/claude")))
            .resolve();
        assert_eq!(resolved.path, PathBuf::from("/custom/claude"));
        assert_eq!(resolved.source, ResolutionSource::Override);
        assert_eq!(probe.searches.get(), 0);
    }

    #[test]
    fn test_empty_override_ignored() {
        let probe = FakeProbe::new(&[], None);
        let resolved = ChainResolver::new(&probe, "claude")
            .with_override(Some(PathBuf::new()))
            .resolve();
        assert_eq!(resolved.source, ResolutionSource::Bare);
    }

    #[test]
    fn test_known_location_in_order() {
        let probe = FakeProbe::new(&["/b/claude", "/c/claude"], Some("/bin/claude"));
        let resolved = ChainResolver::new(&probe, "claude")
            .with_known_locations(&["/a/claude", "/b/claude", "/c/claude"])
            .resolve();
        assert_eq!(resolved.path, PathBuf::from("/b/claude"));
        assert_eq!(resolved.source, ResolutionSource::KnownLocation);
        assert_eq!(probe.searches.get(), 0);
    }

    #[test]
    fn test_path_search_after_known_locations() {
        let probe = FakeProbe::new(&[], Some("/opt/bin/claude"));
        let resolved = ChainResolver::new(&probe, "claude")
            .with_known_locations(&["/a/claude"])
            .resolve();
        assert_eq!(resolved.path, PathBuf::from("/opt/bin/claude"));
        assert_eq!(resolved.source, ResolutionSource::PathSearch);
        assert_eq!(probe.searches.get(), 1);
    }

    #[test]
    fn test_bare_name_fallback() {
        let probe = FakeProbe::new(&[], None);
        let resolved = ChainResolver::new(&probe, "claude")
            .with_known_locations(&["/a/claude"])
            .resolve();
        assert_eq!(resolved.path, PathBuf::from("claude"));
        assert_eq!(resolved.source, ResolutionSource::Bare);
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home("~/.local/bin/claude");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join(".local/bin/claude"));
        }
        assert_eq!(expand_home("/usr/bin/claude"), PathBuf::from("/usr/bin/claude"));
    }

    #[test]
    fn test_system_probe_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("claude");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();

        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!SystemProbe.is_executable(&exe));

        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(SystemProbe.is_executable(&exe));

        assert!(!SystemProbe.is_executable(dir.path()));
        assert!(!SystemProbe.is_executable(&dir.path().join("missing")));
    }
}

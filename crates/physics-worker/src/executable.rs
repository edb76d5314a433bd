//! Worker executable discovery and launch commands.
//!
//! Candidate locations come from a per-platform strategy; each candidate is
//! checked with a version probe and the first one that answers wins.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::error::{WorkerError, WorkerResult};

/// Environment variable holding an explicit worker interpreter path.
pub const WORKER_PYTHON_ENV: &str = "PHYSICS_MCP_PYTHON";

const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
const UNIX_WELL_KNOWN_PYTHONS: &[&str] = &[
    "/opt/homebrew/bin/python3",
    "/usr/local/bin/python3",
    "/usr/bin/python3",
];
const UNIX_GENERIC_NAMES: &[&str] = &["python3", "python"];
const WINDOWS_PYTHON_VERSIONS: &[&str] = &["313", "312", "311", "310"];
const WINDOWS_GENERIC_NAMES: &[&str] = &["py", "python", "python3"];

/// Fully resolved command used to spawn the worker process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }
}

/// Produces the command for each worker start.
pub trait WorkerLauncher: Send + Sync {
    fn command(&self) -> WorkerResult<WorkerCommand>;
}

impl WorkerLauncher for WorkerCommand {
    fn command(&self) -> WorkerResult<WorkerCommand> {
        Ok(self.clone())
    }
}

/// Platform-specific list of interpreter locations, most specific first.
pub trait PlatformCandidates: Send + Sync {
    fn platform(&self) -> &'static str;
    fn well_known(&self) -> Vec<String>;
    fn generic_names(&self) -> &'static [&'static str];
}

/// Candidate layout for Linux and macOS hosts.
#[derive(Debug, Clone, Default)]
pub struct UnixCandidates {
    pub virtual_env: Option<PathBuf>,
}

impl PlatformCandidates for UnixCandidates {
    fn platform(&self) -> &'static str {
        "unix"
    }

    fn well_known(&self) -> Vec<String> {
        let mut candidates = Vec::new();
        if let Some(venv) = &self.virtual_env {
            candidates.push(path_string(&venv.join("bin").join("python")));
        }
        candidates.extend(UNIX_WELL_KNOWN_PYTHONS.iter().map(|path| path.to_string()));
        candidates
    }

    fn generic_names(&self) -> &'static [&'static str] {
        UNIX_GENERIC_NAMES
    }
}

/// Candidate layout for Windows hosts.
#[derive(Debug, Clone, Default)]
pub struct WindowsCandidates {
    pub virtual_env: Option<PathBuf>,
    pub local_app_data: Option<PathBuf>,
}

impl PlatformCandidates for WindowsCandidates {
    fn platform(&self) -> &'static str {
        "windows"
    }

    fn well_known(&self) -> Vec<String> {
        let mut candidates = Vec::new();
        if let Some(venv) = &self.virtual_env {
            candidates.push(path_string(&venv.join("Scripts").join("python.exe")));
        }
        if let Some(local) = &self.local_app_data {
            for version in WINDOWS_PYTHON_VERSIONS {
                candidates.push(path_string(
                    &local
                        .join("Programs")
                        .join("Python")
                        .join(format!("Python{version}"))
                        .join("python.exe"),
                ));
            }
        }
        for version in WINDOWS_PYTHON_VERSIONS {
            candidates.push(format!("C:\\Python{version}\\python.exe"));
        }
        candidates
    }

    fn generic_names(&self) -> &'static [&'static str] {
        WINDOWS_GENERIC_NAMES
    }
}

/// Returns the candidate strategy for the host platform, seeded from the environment.
pub fn host_platform_candidates() -> Box<dyn PlatformCandidates> {
    let virtual_env = std::env::var_os("VIRTUAL_ENV").map(PathBuf::from);
    if cfg!(windows) {
        Box::new(WindowsCandidates {
            virtual_env,
            local_app_data: std::env::var_os("LOCALAPPDATA").map(PathBuf::from),
        })
    } else {
        Box::new(UnixCandidates { virtual_env })
    }
}

/// Checks whether a candidate executable responds.
pub trait VersionProbe: Send + Sync {
    fn responds(&self, candidate: &str) -> bool;
}

/// Runs `<candidate> --version` and accepts a zero exit within the timeout.
#[derive(Debug, Clone)]
pub struct ProcessVersionProbe {
    pub timeout: Duration,
}

impl Default for ProcessVersionProbe {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }
}

impl VersionProbe for ProcessVersionProbe {
    fn responds(&self, candidate: &str) -> bool {
        let spawned = Command::new(candidate)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(error) => {
                tracing::debug!(candidate, %error, "worker executable candidate did not spawn");
                return false;
            }
        };
        match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status.success(),
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::debug!(candidate, "worker executable version probe timed out");
                false
            }
            Err(error) => {
                tracing::debug!(candidate, %error, "worker executable version probe failed");
                false
            }
        }
    }
}

/// Picks the first responding interpreter from override, platform, and generic candidates.
pub struct ExecutableResolver {
    override_path: Option<String>,
    platform: Box<dyn PlatformCandidates>,
    probe: Box<dyn VersionProbe>,
}

impl ExecutableResolver {
    pub fn new(
        override_path: Option<String>,
        platform: Box<dyn PlatformCandidates>,
        probe: Box<dyn VersionProbe>,
    ) -> Self {
        let override_path = override_path
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Self {
            override_path,
            platform,
            probe,
        }
    }

    /// Host resolver using `PHYSICS_MCP_PYTHON` when no explicit override is given.
    pub fn for_host(override_path: Option<String>) -> Self {
        let override_path = override_path.or_else(|| std::env::var(WORKER_PYTHON_ENV).ok());
        Self::new(
            override_path,
            host_platform_candidates(),
            Box::new(ProcessVersionProbe::default()),
        )
    }

    /// Ordered, de-duplicated candidate list.
    pub fn candidates(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.override_path
            .iter()
            .cloned()
            .chain(self.platform.well_known())
            .chain(
                self.platform
                    .generic_names()
                    .iter()
                    .map(|name| name.to_string()),
            )
            .filter(|candidate| seen.insert(candidate.clone()))
            .collect()
    }

    pub fn resolve(&self) -> WorkerResult<String> {
        let candidates = self.candidates();
        for candidate in &candidates {
            if self.probe.responds(candidate) {
                tracing::info!(
                    platform = self.platform.platform(),
                    executable = %candidate,
                    "resolved worker executable"
                );
                return Ok(candidate.clone());
            }
        }
        Err(WorkerError::Configuration { tried: candidates })
    }
}

/// Launches the Python worker script with a lazily resolved interpreter.
pub struct PythonWorkerLauncher {
    resolver: ExecutableResolver,
    script: PathBuf,
    env: BTreeMap<String, String>,
    resolved: OnceLock<String>,
}

impl PythonWorkerLauncher {
    pub fn new(resolver: ExecutableResolver, script: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            script: script.into(),
            env: BTreeMap::new(),
            resolved: OnceLock::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn interpreter(&self) -> WorkerResult<String> {
        if let Some(resolved) = self.resolved.get() {
            return Ok(resolved.clone());
        }
        let resolved = self.resolver.resolve()?;
        Ok(self.resolved.get_or_init(|| resolved).clone())
    }
}

impl WorkerLauncher for PythonWorkerLauncher {
    fn command(&self) -> WorkerResult<WorkerCommand> {
        let program = self.interpreter()?;
        let script = absolute_path(&self.script);
        let mut env = self.env.clone();
        env.entry("PYTHONUNBUFFERED".to_string())
            .or_insert_with(|| "1".to_string());
        Ok(WorkerCommand {
            program,
            args: vec!["-u".to_string(), path_string(&script)],
            env,
            cwd: script.parent().map(Path::to_path_buf),
        })
    }
}

// The worker runs from its own directory, so a relative script path must be
// anchored to ours first.
fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingProbe {
        accepted: Vec<String>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingProbe {
        fn accepting(accepted: &[&str]) -> Self {
            Self {
                accepted: accepted.iter().map(|value| value.to_string()).collect(),
                seen: Arc::default(),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().expect("probe lock").clone()
        }
    }

    impl VersionProbe for RecordingProbe {
        fn responds(&self, candidate: &str) -> bool {
            self.seen
                .lock()
                .expect("probe lock")
                .push(candidate.to_string());
            self.accepted.iter().any(|accepted| accepted == candidate)
        }
    }

    #[test]
    fn unit_unix_candidates_put_virtual_env_before_system_paths() {
        let candidates = UnixCandidates {
            virtual_env: Some(PathBuf::from("/work/.venv")),
        };
        let well_known = candidates.well_known();
        assert_eq!(well_known[0], "/work/.venv/bin/python");
        assert!(well_known.contains(&"/usr/bin/python3".to_string()));
        assert_eq!(candidates.generic_names(), &["python3", "python"]);
    }

    #[test]
    fn unit_windows_candidates_include_local_app_data_installs() {
        let candidates = WindowsCandidates {
            virtual_env: None,
            local_app_data: Some(PathBuf::from("/appdata")),
        };
        let well_known = candidates.well_known();
        assert!(well_known[0].contains("Python313"));
        assert!(well_known.iter().any(|path| path == "C:\\Python310\\python.exe"));
        assert_eq!(candidates.generic_names()[0], "py");
    }

    #[test]
    fn functional_resolver_prefers_override_then_platform_then_generic() {
        let probe = RecordingProbe::accepting(&["python3"]);
        let resolver = ExecutableResolver::new(
            Some("/custom/python".to_string()),
            Box::new(UnixCandidates::default()),
            Box::new(probe.clone()),
        );
        assert_eq!(resolver.resolve().expect("resolve"), "python3");
        let seen = probe.seen();
        assert_eq!(seen[0], "/custom/python");
        assert_eq!(seen[1], "/opt/homebrew/bin/python3");
        assert_eq!(seen.last().map(String::as_str), Some("python3"));
    }

    #[test]
    fn functional_resolver_accepts_responding_override() {
        let probe = RecordingProbe::accepting(&["/custom/python"]);
        let resolver = ExecutableResolver::new(
            Some("  /custom/python ".to_string()),
            Box::new(UnixCandidates::default()),
            Box::new(probe.clone()),
        );
        assert_eq!(resolver.resolve().expect("resolve"), "/custom/python");
        assert_eq!(probe.seen().len(), 1);
    }

    #[test]
    fn regression_resolver_reports_configuration_error_with_all_candidates() {
        let resolver = ExecutableResolver::new(
            Some("python3".to_string()),
            Box::new(UnixCandidates::default()),
            Box::new(RecordingProbe::default()),
        );
        let candidates = resolver.candidates();
        assert_eq!(
            candidates.iter().filter(|value| *value == "python3").count(),
            1
        );
        match resolver.resolve() {
            Err(WorkerError::Configuration { tried }) => assert_eq!(tried, candidates),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn regression_process_probe_rejects_missing_executable() {
        let probe = ProcessVersionProbe {
            timeout: Duration::from_millis(500),
        };
        assert!(!probe.responds("/definitely/not/a/python-binary"));
    }

    #[test]
    fn functional_python_launcher_caches_resolution() {
        let probe = RecordingProbe::accepting(&["python3"]);
        let resolver = ExecutableResolver::new(
            None,
            Box::new(UnixCandidates::default()),
            Box::new(probe.clone()),
        );
        let launcher = PythonWorkerLauncher::new(resolver, "/srv/worker/worker.py");
        let first = launcher.command().expect("first command");
        let probes_after_first = probe.seen().len();
        let second = launcher.command().expect("second command");
        assert_eq!(first, second);
        assert_eq!(probe.seen().len(), probes_after_first);
        assert_eq!(first.args, vec!["-u", "/srv/worker/worker.py"]);
        assert_eq!(first.cwd, Some(PathBuf::from("/srv/worker")));
        assert_eq!(
            first.env.get("PYTHONUNBUFFERED").map(String::as_str),
            Some("1")
        );
    }

    #[test]
    fn regression_relative_worker_script_is_anchored_to_current_dir() {
        let resolver = ExecutableResolver::new(
            None,
            Box::new(UnixCandidates::default()),
            Box::new(RecordingProbe::accepting(&["python3"])),
        );
        let launcher = PythonWorkerLauncher::new(resolver, "packages/worker.py");
        let command = launcher.command().expect("command");
        let script = PathBuf::from(&command.args[1]);
        assert!(script.is_absolute());
        assert!(script.ends_with("packages/worker.py"));
        assert_eq!(command.cwd.as_deref(), script.parent());
    }
}

//! Configuration resolution for Conductor.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/conductor/settings.json)
//! 3. Project config (.conductor/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::workflow::WorkflowTemplate;

/// Complete Conductor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Extra workflow templates, merged over the built-ins.
    #[serde(default)]
    pub workflows: Vec<WorkflowTemplate>,
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub log_level: String,
    pub database_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            database_path: None,
        }
    }
}

/// Tunables for the process orchestrator.
///
/// Durations are kept in milliseconds so they round-trip through settings
/// files and the control protocol unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Cap on workers in `running` or `waiting_for_input`.
    pub max_concurrent_processes: usize,
    /// Ceiling on time since launch while running.
    pub process_timeout_ms: u64,
    /// Ceiling on time spent waiting for interactive input.
    pub interaction_timeout_ms: u64,
    /// Cadence of the reap-and-refill sweep.
    pub cleanup_interval_ms: u64,
    /// Retention of terminal records before they are reaped.
    pub old_process_max_age_ms: u64,
    /// Poll interval of the per-process timeout watchdog.
    pub watchdog_interval_ms: u64,
    /// Worker binary. Launches fail while unset.
    pub worker_executable_path: Option<PathBuf>,
    /// Worker arguments; `{prompt}`, `{task}` and `{role}` are substituted.
    pub worker_args: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_processes: 3,
            process_timeout_ms: 30 * 60 * 1000,
            interaction_timeout_ms: 5 * 60 * 1000,
            cleanup_interval_ms: 60 * 1000,
            old_process_max_age_ms: 60 * 60 * 1000,
            watchdog_interval_ms: 10 * 1000,
            worker_executable_path: None,
            worker_args: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub const fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }

    pub const fn interaction_timeout(&self) -> Duration {
        Duration::from_millis(self.interaction_timeout_ms)
    }

    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub const fn old_process_max_age(&self) -> Duration {
        Duration::from_millis(self.old_process_max_age_ms)
    }

    pub const fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    /// Merge a partial update into this config.
    ///
    /// Returns `true` when the concurrency ceiling was raised, i.e. new
    /// slots may have opened.
    pub fn apply(&mut self, update: ConfigUpdate) -> bool {
        let previous_max = self.max_concurrent_processes;
        if let Some(v) = update.max_concurrent_processes {
            self.max_concurrent_processes = v;
        }
        if let Some(v) = update.process_timeout_ms {
            self.process_timeout_ms = v;
        }
        if let Some(v) = update.interaction_timeout_ms {
            self.interaction_timeout_ms = v;
        }
        if let Some(v) = update.cleanup_interval_ms {
            self.cleanup_interval_ms = v;
        }
        if let Some(v) = update.old_process_max_age_ms {
            self.old_process_max_age_ms = v;
        }
        if let Some(v) = update.watchdog_interval_ms {
            self.watchdog_interval_ms = v.max(1);
        }
        if update.worker_executable_path.is_some() {
            self.worker_executable_path = update.worker_executable_path;
        }
        if let Some(v) = update.worker_args {
            self.worker_args = v;
        }
        self.max_concurrent_processes > previous_max
    }
}

/// Partial update of [`OrchestratorConfig`]; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub max_concurrent_processes: Option<usize>,
    pub process_timeout_ms: Option<u64>,
    pub interaction_timeout_ms: Option<u64>,
    pub cleanup_interval_ms: Option<u64>,
    pub old_process_max_age_ms: Option<u64>,
    pub watchdog_interval_ms: Option<u64>,
    pub worker_executable_path: Option<PathBuf>,
    pub worker_args: Option<Vec<String>>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// On-disk settings file. Every field is optional so a file only needs to
/// mention what it overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    log_level: Option<String>,
    database_path: Option<PathBuf>,
    orchestrator: ConfigUpdate,
    workflows: Vec<WorkflowTemplate>,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let global = global_config_path();
    load_config_from(global.as_deref(), project_dir, |key| std::env::var(key).ok())
}

/// Resolve configuration from explicit sources.
///
/// `env` looks up an environment variable by name.
pub fn load_config_from(
    global_path: Option<&Path>,
    project_dir: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut config = Config::default();

    if let Some(path) = global_path
        && path.exists()
    {
        merge_settings(&mut config, load_settings_file(path)?);
    }

    if let Some(dir) = project_dir {
        let project_path = project_config_path(dir);
        if project_path.exists() {
            merge_settings(&mut config, load_settings_file(&project_path)?);
        }
    }

    apply_env_overrides(&mut config, env);

    Ok(config)
}

/// Project settings file inside `dir`.
pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(".conductor").join("settings.json")
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".conductor").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/conductor/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("conductor").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_settings_file(path: &Path) -> Result<SettingsFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_settings(base: &mut Config, overlay: SettingsFile) {
    if let Some(level) = overlay.log_level {
        base.daemon.log_level = level;
    }
    if overlay.database_path.is_some() {
        base.daemon.database_path = overlay.database_path;
    }
    base.orchestrator.apply(overlay.orchestrator);

    // Later files win for templates with the same name.
    for template in overlay.workflows {
        base.workflows.retain(|t| t.name != template.name);
        base.workflows.push(template);
    }
}

fn apply_env_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    if let Some(n) = env("CONDUCTOR_MAX_PROCESSES").and_then(|v| v.parse().ok()) {
        config.orchestrator.max_concurrent_processes = n;
    }
    if let Some(n) = env("CONDUCTOR_PROCESS_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.orchestrator.process_timeout_ms = n;
    }
    if let Some(n) = env("CONDUCTOR_INTERACTION_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.orchestrator.interaction_timeout_ms = n;
    }
    if let Some(path) = env("CONDUCTOR_WORKER_PATH").filter(|v| !v.is_empty()) {
        config.orchestrator.worker_executable_path = Some(PathBuf::from(path));
    }
    if let Some(level) = env("CONDUCTOR_LOG_LEVEL") {
        config.daemon.log_level = level;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_leave_worker_unset() {
        let config = OrchestratorConfig::default();
        assert!(config.worker_executable_path.is_none());
        assert_eq!(config.watchdog_interval(), Duration::from_secs(10));
        assert_eq!(config.max_concurrent_processes, 3);
    }

    #[test]
    fn apply_reports_raised_ceiling_only() {
        let mut config = OrchestratorConfig::default();
        assert!(!config.apply(ConfigUpdate {
            process_timeout_ms: Some(1_000),
            ..Default::default()
        }));
        assert_eq!(config.process_timeout_ms, 1_000);

        assert!(config.apply(ConfigUpdate {
            max_concurrent_processes: Some(8),
            ..Default::default()
        }));
        assert!(!config.apply(ConfigUpdate {
            max_concurrent_processes: Some(2),
            ..Default::default()
        }));
        assert_eq!(config.max_concurrent_processes, 2);
    }

    #[test]
    fn update_deserializes_partially() {
        let update: ConfigUpdate =
            serde_json::from_str(r#"{"max_concurrent_processes": 4}"#).unwrap();
        assert_eq!(update.max_concurrent_processes, Some(4));
        assert!(update.worker_executable_path.is_none());
        assert!(ConfigUpdate::default().is_empty());
        assert!(!update.is_empty());
    }

    #[test]
    fn project_file_overrides_global_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let global = dir.path().join("global.json");
        std::fs::write(
            &global,
            r#"{"log_level":"debug","orchestrator":{"max_concurrent_processes":2,"worker_executable_path":"/usr/local/bin/agent"}}"#,
        )
        .unwrap();

        let project = dir.path().join("project");
        std::fs::create_dir_all(project.join(".conductor")).unwrap();
        std::fs::write(
            project_config_path(&project),
            r#"{"orchestrator":{"max_concurrent_processes":6},"workflows":[{"name":"spike","steps":[{"task":"try {goal}","role":"generalist"}]}]}"#,
        )
        .unwrap();

        let config = load_config_from(Some(&global), Some(&project), no_env).unwrap();
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.orchestrator.max_concurrent_processes, 6);
        assert_eq!(
            config.orchestrator.worker_executable_path,
            Some(PathBuf::from("/usr/local/bin/agent"))
        );
        assert_eq!(config.workflows.len(), 1);
        assert_eq!(config.workflows[0].steps[0].priority, 5);
    }

    #[test]
    fn env_overrides_files() {
        let env: HashMap<&str, &str> = [
            ("CONDUCTOR_MAX_PROCESSES", "9"),
            ("CONDUCTOR_WORKER_PATH", "/opt/worker"),
            ("CONDUCTOR_PROCESS_TIMEOUT_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = load_config_from(None, None, |k| env.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.orchestrator.max_concurrent_processes, 9);
        assert_eq!(
            config.orchestrator.worker_executable_path,
            Some(PathBuf::from("/opt/worker"))
        );
        // Unparseable values are ignored.
        assert_eq!(
            config.orchestrator.process_timeout_ms,
            OrchestratorConfig::default().process_timeout_ms
        );
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let global = dir.path().join("settings.json");
        std::fs::write(&global, "{ not json").unwrap();
        let err = load_config_from(Some(&global), None, no_env).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

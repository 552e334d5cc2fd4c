//! Workspace lifecycle and environment configuration.
//!
//! A workspace is a target repository with durable state under
//! `.codeframe/`: `state.db` (the store), `config.yaml` (environment),
//! `checkpoints/` and `logs/`. `config.yaml` is a flat map; unknown keys are
//! preserved but ignored.

use crate::errors::StoreError;
use crate::events::{EventLog, EventType};
use crate::store::StateStore;
use crate::store::models::WorkspaceRecord;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

pub const CF_DIR: &str = ".codeframe";
pub const DB_FILE: &str = "state.db";
pub const CONFIG_FILE: &str = "config.yaml";
pub const CHECKPOINTS_DIR: &str = "checkpoints";
pub const LOGS_DIR: &str = "logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Uv,
    Pip,
    Poetry,
    Npm,
    Pnpm,
    Yarn,
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageManager::Uv => "uv",
            PackageManager::Pip => "pip",
            PackageManager::Poetry => "poetry",
            PackageManager::Npm => "npm",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Yarn => "yarn",
        };
        f.write_str(s)
    }
}

impl FromStr for PackageManager {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uv" => Ok(PackageManager::Uv),
            "pip" => Ok(PackageManager::Pip),
            "poetry" => Ok(PackageManager::Poetry),
            "npm" => Ok(PackageManager::Npm),
            "pnpm" => Ok(PackageManager::Pnpm),
            "yarn" => Ok(PackageManager::Yarn),
            _ => bail!("Invalid package manager '{s}'. Valid values: uv, pip, poetry, npm, pnpm, yarn"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestFramework {
    Pytest,
    Jest,
    Vitest,
    Mocha,
}

impl TestFramework {
    /// Default full-suite command when no override is configured.
    pub fn default_command(&self) -> &'static str {
        match self {
            TestFramework::Pytest => "pytest -x -q",
            TestFramework::Jest => "npx jest --bail",
            TestFramework::Vitest => "npx vitest run --bail 1",
            TestFramework::Mocha => "npx mocha --bail",
        }
    }
}

impl fmt::Display for TestFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestFramework::Pytest => "pytest",
            TestFramework::Jest => "jest",
            TestFramework::Vitest => "vitest",
            TestFramework::Mocha => "mocha",
        };
        f.write_str(s)
    }
}

impl FromStr for TestFramework {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pytest" => Ok(TestFramework::Pytest),
            "jest" => Ok(TestFramework::Jest),
            "vitest" => Ok(TestFramework::Vitest),
            "mocha" => Ok(TestFramework::Mocha),
            _ => bail!("Invalid test framework '{s}'. Valid values: pytest, jest, vitest, mocha"),
        }
    }
}

/// Environment configuration persisted as `config.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<PackageManager>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_framework: Option<TestFramework>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lint_tools: Vec<String>,
    /// Full-suite test command override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    /// Lint command override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint_command: Option<String>,
    /// Unknown keys: preserved across load/save, otherwise ignored.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl EnvConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("Invalid config at {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_yaml::to_string(self).context("Failed to serialize config")?;
        std::fs::write(path, raw).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Set a recognized key from its string form; unrecognized keys land in
    /// `extra` so round-trips preserve them.
    pub fn set_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "package_manager" => self.package_manager = Some(value.parse()?),
            "python_version" => self.python_version = Some(value.to_string()),
            "test_framework" => self.test_framework = Some(value.parse()?),
            "lint_tools" => {
                self.lint_tools = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "test_command" => self.test_command = Some(value.to_string()),
            "lint_command" => self.lint_command = Some(value.to_string()),
            other => {
                self.extra.insert(
                    other.to_string(),
                    serde_yaml::Value::String(value.to_string()),
                );
            }
        }
        Ok(())
    }

    /// The test command the gates should run, honoring the override.
    pub fn effective_test_command(&self) -> Option<String> {
        self.test_command
            .clone()
            .or_else(|| self.test_framework.map(|f| f.default_command().to_string()))
    }
}

/// Inspect the target repository's tool inventory and infer configuration.
pub fn detect_environment(root: &Path) -> EnvConfig {
    let mut config = EnvConfig::default();
    let exists = |name: &str| root.join(name).exists();

    if exists("uv.lock") {
        config.package_manager = Some(PackageManager::Uv);
    } else if exists("poetry.lock") {
        config.package_manager = Some(PackageManager::Poetry);
    } else if exists("pnpm-lock.yaml") {
        config.package_manager = Some(PackageManager::Pnpm);
    } else if exists("yarn.lock") {
        config.package_manager = Some(PackageManager::Yarn);
    } else if exists("package-lock.json") || exists("package.json") {
        config.package_manager = Some(PackageManager::Npm);
    } else if exists("requirements.txt") || exists("pyproject.toml") || exists("setup.py") {
        config.package_manager = Some(PackageManager::Pip);
    }

    let is_python = exists("pyproject.toml") || exists("requirements.txt") || exists("setup.py");
    let is_node = exists("package.json");

    if is_python {
        config.test_framework = Some(TestFramework::Pytest);
        config.lint_tools.push("ruff".to_string());
    } else if is_node {
        let package_json =
            std::fs::read_to_string(root.join("package.json")).unwrap_or_default();
        config.test_framework = if package_json.contains("\"vitest\"") {
            Some(TestFramework::Vitest)
        } else if package_json.contains("\"mocha\"") {
            Some(TestFramework::Mocha)
        } else {
            Some(TestFramework::Jest)
        };
        if package_json.contains("\"eslint\"") || exists(".eslintrc.json") || exists("eslint.config.js") {
            config.lint_tools.push("eslint".to_string());
        }
    }

    config
}

/// An opened workspace: paths, config, store and event log handles.
#[derive(Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub record: WorkspaceRecord,
    pub config: EnvConfig,
    pub store: Arc<StateStore>,
    pub events: EventLog,
}

impl Workspace {
    pub fn cf_dir(&self) -> PathBuf {
        self.root.join(CF_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.cf_dir().join(DB_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.cf_dir().join(CONFIG_FILE)
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.cf_dir().join(CHECKPOINTS_DIR)
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Initialize `.codeframe/` under `root`. Idempotent: an already
    /// initialized workspace is opened instead.
    pub fn init(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("No such directory: {}", root.display()))?;
        let cf_dir = root.join(CF_DIR);
        if cf_dir.join(DB_FILE).exists() {
            return Self::open(&root);
        }

        std::fs::create_dir_all(cf_dir.join(CHECKPOINTS_DIR))?;
        std::fs::create_dir_all(cf_dir.join(LOGS_DIR))?;

        // Workspace state never belongs in snapshots or agent commits.
        let gitignore = root.join(".gitignore");
        let needs_entry = std::fs::read_to_string(&gitignore)
            .map(|content| !content.lines().any(|line| line.trim() == ".codeframe/"))
            .unwrap_or(true);
        if needs_entry {
            use std::io::Write as _;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&gitignore)?;
            writeln!(file, ".codeframe/")?;
        }

        let store = Arc::new(StateStore::open(&cf_dir.join(DB_FILE))?);
        let record = store.create_workspace(&root.to_string_lossy())?;

        let config_path = cf_dir.join(CONFIG_FILE);
        let config = EnvConfig::default();
        config.save(&config_path)?;

        let events = EventLog::new(store.clone(), record.id.clone());
        events.emit(
            EventType::WorkspaceInit,
            &record.id,
            serde_json::json!({ "repo_path": record.repo_path }),
        )?;

        Ok(Self {
            root,
            record,
            config,
            store,
            events,
        })
    }

    /// Open an existing workspace; fails when `.codeframe/` is absent.
    pub fn open(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("No such directory: {}", root.display()))?;
        let cf_dir = root.join(CF_DIR);
        let db_path = cf_dir.join(DB_FILE);
        if !db_path.exists() {
            bail!(
                "Not a codeframe workspace: {} (run `codeframe init` first)",
                root.display()
            );
        }

        let store = Arc::new(StateStore::open(&db_path)?);
        let record = store.workspace()?;
        let config_path = cf_dir.join(CONFIG_FILE);
        let config = if config_path.exists() {
            EnvConfig::load(&config_path)?
        } else {
            EnvConfig::default()
        };
        let events = EventLog::new(store.clone(), record.id.clone());

        Ok(Self {
            root,
            record,
            config,
            store,
            events,
        })
    }

    /// Reload the store connection (after checkpoint restore swapped the
    /// database file underneath us).
    pub fn reopen_store(&mut self) -> Result<(), StoreError> {
        let store = Arc::new(StateStore::open(&self.db_path())?);
        self.events = EventLog::new(store.clone(), self.record.id.clone());
        self.store = store;
        Ok(())
    }
}

/// Install rotating file logging under `.codeframe/logs/`. The returned
/// guard must be held for the life of the process.
pub fn init_file_logging(root: &Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let logs_dir = root.join(CF_DIR).join(LOGS_DIR);
    if !logs_dir.exists() {
        return None;
    }
    let appender = tracing_appender::rolling::daily(logs_dir, "codeframe.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_creates_layout_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::init(dir.path()).unwrap();
        assert!(ws.db_path().exists());
        assert!(ws.config_path().exists());
        assert!(ws.checkpoints_dir().exists());

        // Second init opens instead of clobbering.
        let again = Workspace::init(dir.path()).unwrap();
        assert_eq!(again.id(), ws.id());

        let events = ws.events.tail(0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::WorkspaceInit);
    }

    #[test]
    fn open_without_init_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Workspace::open(dir.path()).is_err());
    }

    #[test]
    fn config_round_trip_preserves_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "package_manager: uv\ntest_framework: pytest\nlint_tools:\n  - ruff\ncustom_key: keep-me\n",
        )
        .unwrap();

        let config = EnvConfig::load(&path).unwrap();
        assert_eq!(config.package_manager, Some(PackageManager::Uv));
        assert_eq!(config.test_framework, Some(TestFramework::Pytest));
        assert_eq!(config.lint_tools, vec!["ruff"]);
        assert!(config.extra.contains_key("custom_key"));

        config.save(&path).unwrap();
        let reloaded = EnvConfig::load(&path).unwrap();
        assert!(reloaded.extra.contains_key("custom_key"));
    }

    #[test]
    fn set_key_validates_enums() {
        let mut config = EnvConfig::default();
        config.set_key("package_manager", "pnpm").unwrap();
        assert_eq!(config.package_manager, Some(PackageManager::Pnpm));

        assert!(config.set_key("package_manager", "cargo").is_err());
        assert!(config.set_key("test_framework", "rspec").is_err());

        config.set_key("lint_tools", "ruff, eslint").unwrap();
        assert_eq!(config.lint_tools, vec!["ruff", "eslint"]);

        config.set_key("made_up", "v").unwrap();
        assert!(config.extra.contains_key("made_up"));
    }

    #[test]
    fn detect_python_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "[project]\nname='x'\n").unwrap();
        std::fs::write(dir.path().join("uv.lock"), "").unwrap();

        let config = detect_environment(dir.path());
        assert_eq!(config.package_manager, Some(PackageManager::Uv));
        assert_eq!(config.test_framework, Some(TestFramework::Pytest));
        assert!(config.lint_tools.contains(&"ruff".to_string()));
    }

    #[test]
    fn detect_node_project_with_vitest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"devDependencies": {"vitest": "^1.0", "eslint": "^9"}}"#,
        )
        .unwrap();

        let config = detect_environment(dir.path());
        assert_eq!(config.package_manager, Some(PackageManager::Npm));
        assert_eq!(config.test_framework, Some(TestFramework::Vitest));
        assert!(config.lint_tools.contains(&"eslint".to_string()));
    }

    #[test]
    fn effective_test_command_honors_override() {
        let mut config = EnvConfig::default();
        assert_eq!(config.effective_test_command(), None);
        config.test_framework = Some(TestFramework::Pytest);
        assert_eq!(config.effective_test_command().unwrap(), "pytest -x -q");
        config.test_command = Some("make test".into());
        assert_eq!(config.effective_test_command().unwrap(), "make test");
    }
}

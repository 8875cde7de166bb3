// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed workspace holding a units file, a
// state file, and a fake home directory, plus a builder that wires them into
// an `Engine` the same way the CLI does.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dotfiles_engine::config::UnitsConfig;
use dotfiles_engine::engine::Engine;
use dotfiles_engine::logging::{Log, UnitEntry, UnitOutcome};
use dotfiles_engine::platform::Platform;
use dotfiles_engine::state::{JsonFileStore, StateStore};
use dotfiles_engine::units::Environment;

/// A units file exercising every unit family.
///
/// `homebrew-path` only applies on macOS; `cli-tools` shares `ripgrep` with
/// `search-tools`.
pub const FULL_CONFIG: &str = r#"
[[paths]]
id = "local-bin"
entries = [{ path = "~/.local/bin", prepend = true }, { path = "/usr/local/bin" }]

[[paths]]
id = "homebrew-path"
entries = [{ path = "/opt/homebrew/bin", prepend = true }]
platforms = ["macos"]

[[aliases]]
id = "core-aliases"
entries = [{ name = "ll", command = "ls -la" }, { name = "g", command = "git" }]

[[packages]]
id = "cli-tools"
entries = [{ name = "ripgrep", manager = "cargo" }, { name = "eza", manager = "cargo" }]
depends_on = ["local-bin"]

[[packages]]
id = "search-tools"
entries = [{ name = "ripgrep", manager = "cargo" }, { name = "fd-find", manager = "cargo" }]

[[shell_init]]
id = "starship"
entries = [{ name = "starship", content = 'eval "$(starship init zsh)"' }]

[shell_env]
target = "~/.config/dotfiles/env.sh"
"#;

/// [`Log`] that keeps messages and summary entries in memory.
#[derive(Debug, Default)]
pub struct CollectingLog {
    pub messages: Mutex<Vec<(String, String)>>,
    pub entries: Mutex<Vec<UnitEntry>>,
}

impl CollectingLog {
    fn push(&self, level: &str, msg: &str) {
        self.messages
            .lock()
            .expect("log lock")
            .push((level.to_string(), msg.to_string()));
    }

    /// Messages logged at `level`.
    pub fn at(&self, level: &str) -> Vec<String> {
        self.messages
            .lock()
            .expect("log lock")
            .iter()
            .filter(|(l, _)| l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Last recorded outcome of `id`.
    pub fn outcome(&self, id: &str) -> Option<UnitOutcome> {
        self.entries
            .lock()
            .expect("log lock")
            .iter()
            .rev()
            .find(|e| e.id == id)
            .map(|e| e.outcome)
    }
}

impl Log for CollectingLog {
    fn stage(&self, msg: &str) {
        self.push("stage", msg);
    }
    fn info(&self, msg: &str) {
        self.push("info", msg);
    }
    fn debug(&self, msg: &str) {
        self.push("debug", msg);
    }
    fn warn(&self, msg: &str) {
        self.push("warn", msg);
    }
    fn error(&self, msg: &str) {
        self.push("error", msg);
    }
    fn dry_run(&self, msg: &str) {
        self.push("dry_run", msg);
    }
    fn record_unit(&self, id: &str, outcome: UnitOutcome, message: Option<&str>) {
        self.entries.lock().expect("log lock").push(UnitEntry {
            id: id.to_string(),
            outcome,
            message: message.map(String::from),
        });
    }
}

/// An isolated workspace backed by a [`tempfile::TempDir`].
pub struct IntegrationTestContext {
    /// Temporary directory holding `home/`, `units.toml`, and `state.json`.
    pub root: tempfile::TempDir,
    pub platform: Platform,
}

impl IntegrationTestContext {
    /// A workspace on Ubuntu with `config` as the units file.
    pub fn new(config: &str) -> Self {
        Self::on(Platform::Ubuntu, config)
    }

    /// A workspace on `platform` with `config` as the units file.
    pub fn on(platform: Platform, config: &str) -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        std::fs::create_dir_all(root.path().join("home")).expect("create home");
        std::fs::write(root.path().join("units.toml"), config).expect("write units.toml");
        Self { root, platform }
    }

    pub fn home(&self) -> PathBuf {
        self.root.path().join("home")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.path().join("units.toml")
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.path().join("state.json")
    }

    /// The rendered shell environment file of [`FULL_CONFIG`].
    pub fn env_file(&self) -> PathBuf {
        self.home().join(".config/dotfiles/env.sh")
    }

    pub fn environment(&self) -> Environment {
        Environment {
            platform: self.platform,
            home_dir: self.home(),
            cwd: self.root.path().to_path_buf(),
            is_ci: false,
        }
    }

    /// Replace the units file.
    pub fn write_config(&self, config: &str) {
        std::fs::write(self.config_path(), config).expect("write units.toml");
    }

    /// Build an engine over a freshly opened state file, as a new process
    /// would.
    pub fn engine(&self) -> (Engine, Arc<CollectingLog>) {
        let log = Arc::new(CollectingLog::default());
        let store = JsonFileStore::open(self.state_path()).expect("open state");
        let config = UnitsConfig::load(&self.config_path()).expect("load units.toml");
        let mut engine = Engine::new(
            self.environment(),
            Arc::clone(&log) as Arc<dyn Log>,
            Arc::new(store) as Arc<dyn StateStore>,
        );
        for unit in config.into_units() {
            engine.register(unit).expect("register unit");
        }
        (engine, log)
    }

    /// Parsed contents of the state file on disk.
    pub fn state_json(&self) -> serde_json::Value {
        read_json(&self.state_path())
    }
}

pub fn read_json(path: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(path).expect("read json");
    serde_json::from_str(&text).expect("parse json")
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::contrib::Contributions;
use crate::logging::Log;
use crate::platform::Platform;
use crate::state::StateStore;

/// Callback receiving `(unit_id, message)` progress reports.
pub type ProgressSink = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Machine facts captured once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Detected operating system.
    pub platform: Platform,
    /// User's home directory.
    pub home_dir: PathBuf,
    /// Working directory the run started in.
    pub cwd: PathBuf,
    /// Whether the run happens on a CI server (`CI` set to a non-false value).
    pub is_ci: bool,
}

impl Environment {
    /// Detect the environment of the current process.
    ///
    /// # Errors
    ///
    /// Returns an error if neither `HOME` nor `USERPROFILE` is set, or the
    /// working directory cannot be determined.
    pub fn detect() -> Result<Self> {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow::anyhow!("HOME environment variable is not set"))?;
        let cwd = std::env::current_dir().context("determining the working directory")?;
        Ok(Self {
            platform: Platform::detect(),
            home_dir: PathBuf::from(home),
            cwd,
            is_ci: std::env::var("CI").is_ok_and(|v| is_truthy(&v)),
        })
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no"
    )
}

/// Everything a unit may consult during one operation.
///
/// Built by [`Engine::build_context`](crate::engine::Engine::build_context)
/// at the start of each run and passed by reference; units must not keep it
/// past the call they received it in.
pub struct Context {
    /// Detected operating system.
    pub platform: Platform,
    /// User's home directory.
    pub home_dir: PathBuf,
    /// Working directory the run started in.
    pub cwd: PathBuf,
    /// Whether the run happens on a CI server.
    pub is_ci: bool,
    /// Logger for output and summary recording.
    pub log: Arc<dyn Log>,
    /// Persisted key/value state.
    pub state: Arc<dyn StateStore>,
    /// Shared contribution namespaces.
    pub contributions: Arc<Contributions>,
    progress: Option<ProgressSink>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("platform", &self.platform)
            .field("home_dir", &self.home_dir)
            .field("cwd", &self.cwd)
            .field("is_ci", &self.is_ci)
            .field("log", &"<dyn Log>")
            .field("state", &"<dyn StateStore>")
            .field("contributions", &self.contributions)
            .field("progress", &self.progress.as_ref().map(|_| "<sink>"))
            .finish()
    }
}

impl Context {
    /// Create a context for one run.
    #[must_use]
    pub fn new(
        env: &Environment,
        log: Arc<dyn Log>,
        state: Arc<dyn StateStore>,
        contributions: Arc<Contributions>,
    ) -> Self {
        Self {
            platform: env.platform,
            home_dir: env.home_dir.clone(),
            cwd: env.cwd.clone(),
            is_ci: env.is_ci,
            log,
            state,
            contributions,
            progress: None,
        }
    }

    /// Attach a progress sink.
    #[must_use]
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Report progress of a long-running unit operation.
    ///
    /// Always logged at debug level; forwarded to the progress sink when one
    /// is attached.
    pub fn report_progress(&self, unit_id: &str, message: &str) {
        self.log.debug(&format!("{unit_id}: {message}"));
        if let Some(sink) = &self.progress {
            sink(unit_id, message);
        }
    }

    /// Expand a leading `~/` against the home directory.
    #[must_use]
    pub fn expand_home(&self, path: &str) -> PathBuf {
        if path == "~" {
            return self.home_dir.clone();
        }
        path.strip_prefix("~/")
            .map_or_else(|| PathBuf::from(path), |rest| self.home_dir.join(rest))
    }
}

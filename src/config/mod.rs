//! Configuration: runtime options plus the declarative TOML manifests that
//! describe applications and their tasks.

mod file;

pub use file::*;

use crate::model::TaskSetError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Marker file at the repository root.
pub const REPOSITORY_FILE: &str = "Chronicle.toml";

/// Per-application manifest file name.
pub const APP_FILE: &str = "App.toml";

/// Runtime options affecting how Chronicle itself runs, independent of any
/// particular task.
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(error = "ConfigError"), setter(into))]
pub struct Config {
    /// Root of the repository all task directories live under.
    #[builder(default = "self.default_repository_root()")]
    repository_root: PathBuf,

    /// Location of the SQLite run registry.
    #[builder(default = "self.default_database_path()")]
    database_path: PathBuf,

    /// Worker count for the runner pool.
    #[builder(default = "num_cpus::get()")]
    max_workers: usize,

    /// Read-only paths every sandboxed command may access, mainly for the
    /// dynamic linker and interpreter lookup.
    #[builder(default = "default_system_allow_paths()")]
    sandbox_system_paths: Vec<PathBuf>,

    /// Additional read-only paths granted to interactive sandbox shells.
    #[builder(default = "default_interactive_allow_paths()")]
    interactive_allow_paths: Vec<PathBuf>,

    /// Whether failed commands are recorded as FAILURE runs.
    #[builder(default = "true")]
    record_failed_runs: bool,

    /// Whether remaining tasks are skipped once one task fails.
    #[builder(default = "true")]
    skip_after_error: bool,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        Default::default()
    }

    /// Builds a config from the repository file at `root`, falling back to
    /// defaults for everything the file leaves out.
    pub fn from_repository(root: &Path) -> Result<Self, ConfigError> {
        let file = RepositoryFile::load(&root.join(REPOSITORY_FILE))?;

        let mut builder = Config::builder();
        builder.repository_root(root.to_path_buf());
        if let Some(database) = file.database {
            builder.database_path(root.join(database));
        }
        if let Some(workers) = file.runner.workers {
            builder.max_workers(workers);
        }
        if let Some(record) = file.runner.record_failed_runs {
            builder.record_failed_runs(record);
        }
        if let Some(skip) = file.runner.skip_after_error {
            builder.skip_after_error(skip);
        }
        if let Some(paths) = file.sandbox.system_paths {
            builder.sandbox_system_paths(paths);
        }
        if let Some(paths) = file.sandbox.interactive_allow_paths {
            builder.interactive_allow_paths(paths);
        }
        builder.build()
    }

    pub fn repository_root(&self) -> &Path {
        &self.repository_root
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn sandbox_system_paths(&self) -> &[PathBuf] {
        &self.sandbox_system_paths
    }

    pub fn interactive_allow_paths(&self) -> &[PathBuf] {
        &self.interactive_allow_paths
    }

    pub fn record_failed_runs(&self) -> bool {
        self.record_failed_runs
    }

    pub fn skip_after_error(&self) -> bool {
        self.skip_after_error
    }
}

impl ConfigBuilder {
    fn default_repository_root(&self) -> PathBuf {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    fn default_database_path(&self) -> PathBuf {
        self.repository_root
            .clone()
            .unwrap_or_else(|| self.default_repository_root())
            .join(".chronicle")
            .join("registry.db")
    }
}

/// Paths the dynamic linker and interpreters need; every sandboxed command
/// gets them read-only.
pub fn default_system_allow_paths() -> Vec<PathBuf> {
    ["/usr/lib", "/usr/lib64", "/lib", "/lib64", "/etc/ld.so.cache"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

/// Defaults for interactive sandbox shells: enough of the host to run a
/// shell and its usual tooling, still read-only.
pub fn default_interactive_allow_paths() -> Vec<PathBuf> {
    ["/usr", "/etc", "/dev", "/proc", "/run", "/var"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

/// Walks upwards from `start` to the directory containing the repository
/// marker file.
pub fn find_repository_root(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        if current.join(REPOSITORY_FILE).is_file() {
            return Some(current.to_path_buf());
        }
        dir = current.parent();
    }
    None
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration field {0} was not initialized")]
    UninitializedField(&'static str),

    #[error("reading {path:?} failed: {err}")]
    Io { path: PathBuf, err: std::io::Error },

    #[error("parsing {path:?} failed: {err}")]
    Parse {
        path: PathBuf,
        err: Box<toml::de::Error>,
    },

    #[error("{path:?}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error(transparent)]
    TaskSet(#[from] TaskSetError),
}

impl From<derive_builder::UninitializedFieldError> for ConfigError {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        ConfigError::UninitializedField(err.field_name())
    }
}

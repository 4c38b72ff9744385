//! The command-line surface.

mod ls;
mod release;
mod run;
mod shell;
mod status;

use chronicle::config::{discover_tasks, find_repository_root, Config, ConfigError};
use chronicle::evaluator::EvaluatorError;
use chronicle::model::{TaskSet, TaskSetError};
use chronicle::resolver::ResolveError;
use chronicle::runner::RunnerError;
use chronicle::storage::StorageError;
use chronicle::vcs::VcsError;
use std::path::PathBuf;
use structopt::StructOpt;
use thiserror::Error;

pub(crate) const EXIT_SUCCESS: i32 = 0;
pub(crate) const EXIT_FAILURE: i32 = 1;
pub(crate) const EXIT_USER_ERROR: i32 = 2;
pub(crate) const EXIT_DIRTY_WORKTREE: i32 = 3;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "chronicle",
    about = "An incremental build and artifact-tracking engine for monorepos"
)]
struct Chronicle {
    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Run pending tasks and record their runs
    Run(run::RunCommand),

    /// List the status of tasks against the registry
    Status(status::StatusCommand),

    /// List applications, task inputs, or recorded runs
    Ls(ls::LsCommand),

    /// Manage releases
    Release(release::ReleaseCommand),

    /// Open an interactive shell inside a task's sandbox
    Shell(shell::ShellCommand),
}

impl Command {
    async fn run(self) -> Result<i32, CliError> {
        match self {
            Command::Run(cmd) => cmd.run().await,
            Command::Status(cmd) => cmd.run().await,
            Command::Ls(cmd) => cmd.run().await,
            Command::Release(cmd) => cmd.run().await,
            Command::Shell(cmd) => cmd.run().await,
        }
    }
}

pub fn main() -> i32 {
    let app = Chronicle::from_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CHRONICLE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("chronicle: starting the runtime failed: {err}");
            return EXIT_FAILURE;
        }
    };

    match runtime.block_on(app.cmd.run()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("chronicle: {err}");
            err.exit_code()
        }
    }
}

/// Locates the repository and loads its configuration plus every task
/// manifest.
pub(crate) fn load_repository() -> Result<(Config, TaskSet), CliError> {
    let cwd = std::env::current_dir().map_err(|_| CliError::RepositoryNotFound {
        dir: PathBuf::from("."),
    })?;
    let root =
        find_repository_root(&cwd).ok_or(CliError::RepositoryNotFound { dir: cwd })?;
    let config = Config::from_repository(&root)?;
    let tasks = discover_tasks(&root)?;
    Ok((config, tasks))
}

#[derive(Error, Debug)]
pub(crate) enum CliError {
    #[error("no repository found: no Chronicle.toml in {dir:?} or any parent")]
    RepositoryNotFound { dir: PathBuf },

    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    TaskSet(#[from] TaskSetError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("shell exec failed: {0}")]
    Shell(String),
}

impl From<EvaluatorError> for CliError {
    fn from(err: EvaluatorError) -> Self {
        match err {
            EvaluatorError::Resolve(err) => CliError::Resolve(err),
            EvaluatorError::Storage(err) => CliError::Storage(err),
        }
    }
}

impl CliError {
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            CliError::RepositoryNotFound { .. } | CliError::Usage(_) => EXIT_USER_ERROR,
            CliError::Config(_) | CliError::TaskSet(_) => EXIT_USER_ERROR,
            CliError::Storage(StorageError::AlreadyExists)
            | CliError::Storage(StorageError::EmptyRelease) => EXIT_USER_ERROR,
            CliError::Storage(_) => EXIT_FAILURE,
            CliError::Vcs(_) => EXIT_FAILURE,
            CliError::Runner(RunnerError::UntrackedFilesExist { .. })
            | CliError::Runner(RunnerError::DirtyWorktree) => EXIT_DIRTY_WORKTREE,
            CliError::Runner(_) => EXIT_FAILURE,
            CliError::Resolve(err) => match err {
                ResolveError::NoMatch { .. }
                | ResolveError::Pattern { .. }
                | ResolveError::MissingEnvVar(_)
                | ResolveError::CyclicTaskDependency { .. }
                | ResolveError::UnknownTaskDependency { .. }
                | ResolveError::InputConflict { .. } => EXIT_USER_ERROR,
                _ => EXIT_FAILURE,
            },
            CliError::Shell(_) => EXIT_FAILURE,
        }
    }
}

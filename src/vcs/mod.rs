//! Version-control state as a capability.
//!
//! The resolver and the runner only ever talk to the [`Vcs`] trait; the git
//! adapter shells out to the `git` binary.

mod git;

pub use git::GitRepository;

use std::path::PathBuf;
use thiserror::Error;

/// What the engine needs to know about the repository's version control
/// state.
pub trait Vcs: Send + Sync {
    /// The identifier of the currently checked out commit.
    fn commit_id(&self) -> Result<String, VcsError>;

    /// Whether the working tree has modified or untracked files.
    fn is_dirty(&self) -> Result<bool, VcsError>;

    /// Untracked files in the working tree, repository-relative.
    fn untracked_files(&self) -> Result<Vec<PathBuf>, VcsError>;

    /// Tracked files matching the given repository-relative patterns. An
    /// empty pattern list returns every tracked file.
    fn tracked_files_matching(&self, globs: &[String]) -> Result<Vec<PathBuf>, VcsError>;
}

#[derive(Error, Debug)]
pub enum VcsError {
    #[error("{dir:?} is not inside a version-controlled repository")]
    RepositoryNotFound { dir: PathBuf },

    #[error("running {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("spawning {command} failed: {err}")]
    CommandUnavailable { command: String, err: std::io::Error },
}

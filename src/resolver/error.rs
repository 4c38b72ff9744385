use crate::model::{Digest, DigestError, TaskId};
use crate::vcs::VcsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no file matches the literal pattern {pattern:?}")]
    NoMatch { pattern: String },

    #[error("invalid glob pattern {pattern:?}: {err}")]
    Pattern {
        pattern: String,
        err: globset::Error,
    },

    #[error("environment variable {0} is declared as an input but is not set")]
    MissingEnvVar(String),

    #[error("task dependency cycle: {}", format_chain(chain))]
    CyclicTaskDependency { chain: Vec<TaskId> },

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownTaskDependency { task: TaskId, dependency: TaskId },

    #[error("input {input:?} resolved to conflicting digests {left} and {right}")]
    InputConflict {
        input: String,
        left: Digest,
        right: Digest,
    },

    #[error("digesting {path:?} failed: {err}")]
    DigestFailed { path: PathBuf, err: DigestError },

    #[error("reading {path:?} failed: {err}")]
    Io { path: PathBuf, err: std::io::Error },

    #[error(transparent)]
    Vcs(#[from] VcsError),
}

fn format_chain(chain: &[TaskId]) -> String {
    chain
        .iter()
        .map(TaskId::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

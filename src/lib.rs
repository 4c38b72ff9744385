//! # Chronicle
//!
//! An incremental build and artifact-tracking engine for monorepos.
//!
//! Chronicle discovers tasks declared per application, computes a
//! deterministic fingerprint of each task's inputs, decides whether a task
//! needs to run, executes the task under a filesystem sandbox, and records
//! every run in a relational registry so that later invocations can prove
//! "this exact input set already ran successfully".
//!
//! The flow begins by loading a [`config::Config`] and the repository's task
//! manifests into a [`model::TaskSet`]. A [`runner::TaskRunner`] then drives
//! each task through resolution ([`resolver::InputResolver`]), evaluation
//! ([`evaluator::TaskStatusEvaluator`] against a [`storage::RunRegistry`]),
//! sandboxed execution ([`executor::SandboxedExecutor`]), and persistence.

pub mod config;
pub mod evaluator;
pub mod events;
pub mod executor;
pub mod model;
pub mod resolver;
pub mod runner;
pub mod sandbox;
pub mod storage;
pub mod upload;
pub mod vcs;

pub use config::Config;
pub use model::{Task, TaskId, TaskSet, TaskStatus};

#[macro_use]
extern crate derive_builder;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

//! Combines the input resolver and the run registry to classify a task.

use crate::model::{Digest, InputString, Inputs, Task, TaskRunWithId, TaskSet, TaskStatus};
use crate::resolver::{InputResolver, ResolveError};
use crate::storage::{RunRegistry, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// The result of evaluating one task: its status, and (when inputs are
/// defined) the resolved inputs, fingerprint and any matching prior run.
#[derive(Debug)]
pub struct Evaluation {
    pub status: TaskStatus,
    pub inputs: Option<Inputs>,
    pub total_input_digest: Option<Digest>,
    pub existing_run: Option<TaskRunWithId>,
}

/// Decides whether a task needs to run by looking its fingerprint up in the
/// registry.
///
/// When a lookup input string is configured and the current fingerprint has
/// no recorded run, the fingerprint is recomputed with the caller-supplied
/// input-string set replaced by that string. A hit is still reported as
/// [`TaskStatus::RunExists`]; the fallback is read-only and exists for CI
/// promotion workflows.
pub struct TaskStatusEvaluator {
    resolver: Arc<InputResolver>,
    registry: Arc<dyn RunRegistry>,
    lookup_input_string: Option<String>,
}

impl TaskStatusEvaluator {
    pub fn new(
        resolver: Arc<InputResolver>,
        registry: Arc<dyn RunRegistry>,
        lookup_input_string: Option<String>,
    ) -> Self {
        Self {
            resolver,
            registry,
            lookup_input_string,
        }
    }

    #[instrument(name = "TaskStatusEvaluator::status", skip(self, tasks, task), fields(task = %task.id()))]
    pub async fn status(&self, tasks: &TaskSet, task: &Task) -> Result<Evaluation, EvaluatorError> {
        if !task.has_declared_inputs() {
            return Ok(Evaluation {
                status: TaskStatus::InputsUndefined,
                inputs: None,
                total_input_digest: None,
                existing_run: None,
            });
        }

        let inputs = self.resolver.resolve(tasks, task).await?;
        let total_input_digest = inputs.combined_digest();

        if let Some(run) = self.registry.latest_run_by_digest(
            task.app_name(),
            task.task_name(),
            &total_input_digest,
        )? {
            return Ok(Evaluation {
                status: TaskStatus::RunExists,
                inputs: Some(inputs),
                total_input_digest: Some(total_input_digest),
                existing_run: Some(run),
            });
        }

        if let Some(lookup) = &self.lookup_input_string {
            let widened = inputs.with_replaced_strings(vec![InputString::new(lookup.clone())]);
            if let Some(run) = self.registry.latest_run_by_digest(
                task.app_name(),
                task.task_name(),
                &widened.combined_digest(),
            )? {
                return Ok(Evaluation {
                    status: TaskStatus::RunExists,
                    inputs: Some(inputs),
                    total_input_digest: Some(total_input_digest),
                    existing_run: Some(run),
                });
            }
        }

        Ok(Evaluation {
            status: TaskStatus::Pending,
            inputs: Some(inputs),
            total_input_digest: Some(total_input_digest),
            existing_run: None,
        })
    }
}

#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

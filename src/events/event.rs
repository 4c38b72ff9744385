use crate::model::{RunResult, TaskStatus};

/// Everything the runner can tell the outside world about a build in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    RunnerStarted {
        task_count: usize,
    },

    TaskResolving {
        task_id: String,
    },

    TaskEvaluated {
        task_id: String,
        status: TaskStatus,
    },

    /// The task was not executed: a matching run already exists, or an
    /// earlier task failed and skip-on-error is active.
    TaskSkipped {
        task_id: String,
        existing_run_id: Option<i64>,
    },

    TaskExecuting {
        task_id: String,
    },

    TaskUploading {
        task_id: String,
        output: String,
    },

    TaskCompleted {
        task_id: String,
        result: RunResult,
        run_id: Option<i64>,
    },

    TaskErrored {
        task_id: String,
        error: String,
    },

    RunnerFinished,
}

//! The run registry: durable, transactional records of task runs and their
//! interned inputs.

mod error;
mod sqlite;

pub use error::StorageError;
pub use sqlite::SqliteRegistry;

use crate::model::{Digest, Inputs, TaskRunFull, TaskRunWithId};
use chrono::{DateTime, Utc};

/// What the evaluator and the runner need from persistent storage. Interned
/// rows are immutable once written; a task run becomes visible atomically
/// with all of its inputs and outputs.
pub trait RunRegistry: Send + Sync {
    /// Persists a complete run in one transaction and returns its id.
    fn save_task_run(&self, run: &TaskRunFull) -> Result<i64, StorageError>;

    /// The most recent successful run of `app.task` with the given total
    /// input digest.
    fn latest_run_by_digest(
        &self,
        app_name: &str,
        task_name: &str,
        total_input_digest: &Digest,
    ) -> Result<Option<TaskRunWithId>, StorageError>;

    /// A recorded run by id.
    fn task_run(&self, run_id: i64) -> Result<Option<TaskRunWithId>, StorageError>;

    /// All recorded runs of `app.task`, newest first.
    fn runs_for_task(
        &self,
        app_name: &str,
        task_name: &str,
    ) -> Result<Vec<TaskRunWithId>, StorageError>;

    /// The interned inputs a recorded run was fingerprinted from.
    fn inputs_for_run(&self, run_id: i64) -> Result<Inputs, StorageError>;

    /// Creates a named release grouping the given run ids.
    fn create_release(
        &self,
        name: &str,
        created_at: DateTime<Utc>,
        run_ids: &[i64],
        metadata: Option<&[u8]>,
    ) -> Result<i64, StorageError>;
}

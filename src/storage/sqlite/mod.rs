mod insert;
mod migrations;
mod query;

use super::{RunRegistry, StorageError};
use crate::model::{Digest, Inputs, TaskRunFull, TaskRunWithId};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::instrument;

/// Backoff schedule for transient lock contention. Only busy/locked errors
/// are retried; constraint and logic errors surface immediately.
const RETRY_BACKOFF: &[Duration] = &[
    Duration::from_millis(50),
    Duration::from_millis(250),
    Duration::from_millis(1000),
];

/// The SQLite-backed run registry.
///
/// The connection is serialized behind a mutex and acquired for the duration
/// of one transaction, never across task boundaries. Multiple chronicle
/// processes may share the database file; sorted interning inserts keep
/// concurrent commits deadlock-free.
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRegistry {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|_| {
                StorageError::Unavailable(rusqlite::Error::InvalidPath(path.to_path_buf()))
            })?;
        }
        let conn = Connection::open(path).map_err(StorageError::Unavailable)?;
        Self::bootstrap(conn)
    }

    /// An in-memory registry, private to this process.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(StorageError::Unavailable)?;
        Self::bootstrap(conn)
    }

    fn bootstrap(mut conn: Connection) -> Result<Self, StorageError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::apply(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_retry<T>(
        &self,
        mut op: impl FnMut(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut attempt = 0;
        loop {
            let mut conn = self.conn.lock().unwrap();
            match op(&mut conn) {
                Err(StorageError::Sqlite(err)) if is_busy(&err) && attempt < RETRY_BACKOFF.len() =>
                {
                    drop(conn);
                    std::thread::sleep(RETRY_BACKOFF[attempt]);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::DatabaseBusy
                || failure.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

impl RunRegistry for SqliteRegistry {
    #[instrument(name = "SqliteRegistry::save_task_run", skip(self, run), fields(task = %format!("{}.{}", run.run.app_name, run.run.task_name)))]
    fn save_task_run(&self, run: &TaskRunFull) -> Result<i64, StorageError> {
        self.with_retry(|conn| {
            let tx = conn.transaction()?;
            let run_id = insert::save_task_run(&tx, run)?;
            tx.commit()?;
            Ok(run_id)
        })
    }

    #[instrument(name = "SqliteRegistry::latest_run_by_digest", skip(self, total_input_digest))]
    fn latest_run_by_digest(
        &self,
        app_name: &str,
        task_name: &str,
        total_input_digest: &Digest,
    ) -> Result<Option<TaskRunWithId>, StorageError> {
        self.with_retry(|conn| {
            query::latest_run_by_digest(conn, app_name, task_name, total_input_digest)
        })
    }

    fn task_run(&self, run_id: i64) -> Result<Option<TaskRunWithId>, StorageError> {
        self.with_retry(|conn| query::task_run(conn, run_id))
    }

    fn runs_for_task(
        &self,
        app_name: &str,
        task_name: &str,
    ) -> Result<Vec<TaskRunWithId>, StorageError> {
        self.with_retry(|conn| query::runs_for_task(conn, app_name, task_name))
    }

    fn inputs_for_run(&self, run_id: i64) -> Result<Inputs, StorageError> {
        self.with_retry(|conn| query::inputs_for_run(conn, run_id))
    }

    #[instrument(name = "SqliteRegistry::create_release", skip(self, created_at, run_ids, metadata))]
    fn create_release(
        &self,
        name: &str,
        created_at: DateTime<Utc>,
        run_ids: &[i64],
        metadata: Option<&[u8]>,
    ) -> Result<i64, StorageError> {
        if run_ids.is_empty() {
            return Err(StorageError::EmptyRelease);
        }

        self.with_retry(|conn| {
            let tx = conn.transaction()?;
            let release_id = insert::create_release(&tx, name, created_at, run_ids, metadata)?;
            tx.commit()?;
            Ok(release_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        digest_string, Input, InputEnvVar, InputFile, InputString, InputTaskInfo, Output,
        OutputKind, RunResult, TaskRun, Upload, UploadMethod,
    };

    fn sample_run(digest_seed: &str, result: RunResult) -> TaskRunFull {
        let mut inputs = Inputs::default();
        inputs.push(Input::File(InputFile::new(
            "demo/src/a.c".into(),
            digest_string(digest_seed),
        )));
        inputs.push(Input::File(InputFile::new(
            "demo/src/b.c".into(),
            digest_string("b"),
        )));
        inputs.push(Input::String(InputString::new("x")));
        inputs.push(Input::EnvVar(InputEnvVar::new("HOME", digest_string("/h"))));
        inputs.push(Input::TaskInfo(InputTaskInfo::new(
            "demo.compile",
            digest_string("up"),
        )));

        TaskRunFull {
            run: TaskRun {
                app_name: "demo".to_string(),
                task_name: "build".to_string(),
                vcs_revision: "abc123".to_string(),
                vcs_dirty: false,
                total_input_digest: inputs.combined_digest(),
                start: Utc::now(),
                stop: Utc::now(),
                result,
            },
            inputs,
            outputs: vec![Output {
                name: "demo.bin".to_string(),
                kind: OutputKind::File,
                digest: digest_string("bin"),
                size_bytes: 1024,
                uploads: vec![Upload {
                    uri: "file:///artifacts/demo.bin".to_string(),
                    method: UploadMethod::FileCopy,
                    start: Utc::now(),
                    stop: Utc::now(),
                }],
            }],
        }
    }

    fn count(registry: &SqliteRegistry, table: &str) -> i64 {
        let conn = registry.conn.lock().unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn saved_runs_can_be_found_by_digest() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let run = sample_run("a", RunResult::Success);

        let id = registry.save_task_run(&run).unwrap();
        let found = registry
            .latest_run_by_digest("demo", "build", &run.run.total_input_digest)
            .unwrap()
            .unwrap();

        assert_eq!(found.id, id);
        assert_eq!(found.run.app_name, "demo");
        assert_eq!(found.run.task_name, "build");
        assert_eq!(found.run.vcs_revision, "abc123");
        assert_eq!(found.run.result, RunResult::Success);
        assert_eq!(
            found.run.total_input_digest,
            run.run.total_input_digest
        );
    }

    #[test]
    fn failed_runs_do_not_satisfy_the_digest_lookup() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let run = sample_run("a", RunResult::Failure);
        registry.save_task_run(&run).unwrap();

        assert!(registry
            .latest_run_by_digest("demo", "build", &run.run.total_input_digest)
            .unwrap()
            .is_none());
    }

    #[test]
    fn interned_inputs_are_stored_once() {
        let registry = SqliteRegistry::open_in_memory().unwrap();

        for _ in 0..5 {
            registry.save_task_run(&sample_run("a", RunResult::Success)).unwrap();
        }

        assert_eq!(count(&registry, "input_file"), 2);
        assert_eq!(count(&registry, "input_env_var"), 1);
        assert_eq!(count(&registry, "input_task"), 1);
        assert_eq!(count(&registry, "task_run"), 5);
        assert_eq!(count(&registry, "task_run_file_input"), 10);
        // One output row despite five runs referencing it.
        assert_eq!(count(&registry, "output"), 1);
        assert_eq!(count(&registry, "upload"), 5);
    }

    #[test]
    fn reversed_input_order_commits_cleanly() {
        let registry = SqliteRegistry::open_in_memory().unwrap();

        let forward = sample_run("a", RunResult::Success);
        let mut reversed_inputs = Inputs::default();
        let mut members: Vec<Input> = forward.inputs.iter().collect();
        members.reverse();
        for member in members {
            reversed_inputs.push(member);
        }
        let reversed = TaskRunFull {
            inputs: reversed_inputs,
            ..forward.clone()
        };

        registry.save_task_run(&forward).unwrap();
        registry.save_task_run(&reversed).unwrap();

        assert_eq!(count(&registry, "input_file"), 2);
        assert_eq!(count(&registry, "task_run"), 2);
    }

    #[test]
    fn stored_inputs_round_trip() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let run = sample_run("a", RunResult::Success);
        let id = registry.save_task_run(&run).unwrap();

        let loaded = registry.inputs_for_run(id).unwrap();
        assert_eq!(loaded.combined_digest(), run.inputs.combined_digest());

        assert_matches!(
            registry.inputs_for_run(9999),
            Err(StorageError::RunNotFound(9999))
        );
    }

    #[test]
    fn runs_for_task_lists_newest_first() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let first = registry
            .save_task_run(&sample_run("a", RunResult::Success))
            .unwrap();
        let second = registry
            .save_task_run(&sample_run("changed", RunResult::Success))
            .unwrap();

        let runs = registry.runs_for_task("demo", "build").unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[1].id, first);
    }

    #[test]
    fn release_names_are_unique() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let id = registry
            .save_task_run(&sample_run("a", RunResult::Success))
            .unwrap();

        registry
            .create_release("v1", Utc::now(), &[id], Some(b"meta"))
            .unwrap();
        assert_matches!(
            registry.create_release("v1", Utc::now(), &[id], None),
            Err(StorageError::AlreadyExists)
        );
    }

    #[test]
    fn empty_releases_are_rejected() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        assert_matches!(
            registry.create_release("v1", Utc::now(), &[], None),
            Err(StorageError::EmptyRelease)
        );
    }

    #[test]
    fn concurrent_interleaved_commits_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");

        let mut handles = vec![];
        for worker in 0..8 {
            let path = path.clone();
            handles.push(std::thread::spawn(move || {
                let registry = SqliteRegistry::open(&path).unwrap();
                let mut run = sample_run("shared", RunResult::Success);
                // Unique vcs revision per worker, shared input rows.
                run.run.vcs_revision = format!("rev-{worker}");
                registry.save_task_run(&run).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let registry = SqliteRegistry::open(&path).unwrap();
        assert_eq!(count(&registry, "task_run"), 8);
        assert_eq!(count(&registry, "input_file"), 2);
    }
}

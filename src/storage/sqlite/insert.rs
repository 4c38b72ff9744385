use crate::model::{InputEnvVar, InputFile, InputString, InputTaskInfo, Output, TaskRun, TaskRunFull};
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};

// Interned batches are sorted by their full natural-key tuple with the
// digest as tie-break before insertion. Concurrent writers inserting
// overlapping inputs in differing orders would otherwise reach a cyclic
// wait on the unique-constraint row locks.

pub(super) fn save_task_run(
    tx: &Transaction,
    task_run: &TaskRunFull,
) -> Result<i64, StorageError> {
    let vcs_id = intern_vcs(tx, &task_run.run.vcs_revision, task_run.run.vcs_dirty)?;
    let task_id = intern_task(tx, &task_run.run.app_name, &task_run.run.task_name)?;
    let run_id = insert_run_row(tx, vcs_id, task_id, &task_run.run)?;

    insert_file_inputs(tx, run_id, task_run.inputs.files())?;
    insert_string_inputs(tx, run_id, task_run.inputs.strings())?;
    insert_env_var_inputs(tx, run_id, task_run.inputs.env_vars())?;
    insert_task_inputs(tx, run_id, task_run.inputs.task_infos())?;
    insert_outputs(tx, run_id, &task_run.outputs)?;

    Ok(run_id)
}

fn intern_application(tx: &Transaction, name: &str) -> Result<i64, StorageError> {
    let id = tx.query_row(
        "INSERT INTO application (name)
         VALUES (?1)
             ON CONFLICT (name)
             DO UPDATE SET id = id
         RETURNING id",
        params![name],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn intern_task(tx: &Transaction, app_name: &str, task_name: &str) -> Result<i64, StorageError> {
    let application_id = intern_application(tx, app_name)?;
    let id = tx.query_row(
        "INSERT INTO task (name, application_id)
         VALUES (?1, ?2)
             ON CONFLICT (name, application_id)
             DO UPDATE SET id = id
         RETURNING id",
        params![task_name, application_id],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn intern_vcs(tx: &Transaction, revision: &str, dirty: bool) -> Result<i64, StorageError> {
    let id = tx.query_row(
        "INSERT INTO vcs (revision, dirty)
         VALUES (?1, ?2)
             ON CONFLICT (revision, dirty)
             DO UPDATE SET id = id
         RETURNING id",
        params![revision, dirty],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn insert_run_row(
    tx: &Transaction,
    vcs_id: i64,
    task_id: i64,
    run: &TaskRun,
) -> Result<i64, StorageError> {
    let id = tx.query_row(
        "INSERT INTO task_run
             (vcs_id, task_id, total_input_digest, start_timestamp, stop_timestamp, result)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         RETURNING id",
        params![
            vcs_id,
            task_id,
            run.total_input_digest.to_string(),
            run.start.to_rfc3339(),
            run.stop.to_rfc3339(),
            run.result.as_str(),
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn insert_file_inputs(
    tx: &Transaction,
    run_id: i64,
    inputs: &[InputFile],
) -> Result<(), StorageError> {
    if inputs.is_empty() {
        return Ok(());
    }

    let mut inputs: Vec<&InputFile> = inputs.iter().collect();
    inputs.sort_by(|a, b| {
        a.path()
            .cmp(b.path())
            .then_with(|| a.digest().cmp(b.digest()))
    });

    let mut intern = tx.prepare(
        "INSERT INTO input_file (path, digest)
         VALUES (?1, ?2)
             ON CONFLICT (path, digest)
             DO UPDATE SET id = id
         RETURNING id",
    )?;
    let mut junction = tx.prepare(
        "INSERT INTO task_run_file_input (task_run_id, input_file_id) VALUES (?1, ?2)",
    )?;

    for input in inputs {
        let input_id: i64 = intern.query_row(
            params![
                input.path().to_string_lossy().to_string(),
                input.digest().to_string()
            ],
            |row| row.get(0),
        )?;
        junction.execute(params![run_id, input_id])?;
    }
    Ok(())
}

fn insert_string_inputs(
    tx: &Transaction,
    run_id: i64,
    inputs: &[InputString],
) -> Result<(), StorageError> {
    if inputs.is_empty() {
        return Ok(());
    }

    let mut inputs: Vec<&InputString> = inputs.iter().collect();
    inputs.sort_by(|a, b| {
        a.value()
            .cmp(b.value())
            .then_with(|| a.digest().cmp(b.digest()))
    });

    let mut intern = tx.prepare(
        "INSERT INTO input_string (string, digest)
         VALUES (?1, ?2)
             ON CONFLICT (digest)
             DO UPDATE SET id = id
         RETURNING id",
    )?;
    let mut junction = tx.prepare(
        "INSERT INTO task_run_string_input (task_run_id, input_string_id) VALUES (?1, ?2)",
    )?;

    for input in inputs {
        let input_id: i64 = intern.query_row(
            params![input.value(), input.digest().to_string()],
            |row| row.get(0),
        )?;
        junction.execute(params![run_id, input_id])?;
    }
    Ok(())
}

fn insert_env_var_inputs(
    tx: &Transaction,
    run_id: i64,
    inputs: &[InputEnvVar],
) -> Result<(), StorageError> {
    if inputs.is_empty() {
        return Ok(());
    }

    let mut inputs: Vec<&InputEnvVar> = inputs.iter().collect();
    inputs.sort_by(|a, b| {
        a.name()
            .cmp(b.name())
            .then_with(|| a.digest().cmp(b.digest()))
    });

    let mut intern = tx.prepare(
        "INSERT INTO input_env_var (name, digest)
         VALUES (?1, ?2)
             ON CONFLICT (name, digest)
             DO UPDATE SET id = id
         RETURNING id",
    )?;
    let mut junction = tx.prepare(
        "INSERT INTO task_run_env_var_input (task_run_id, input_env_var_id) VALUES (?1, ?2)",
    )?;

    for input in inputs {
        let input_id: i64 = intern.query_row(
            params![input.name(), input.digest().to_string()],
            |row| row.get(0),
        )?;
        junction.execute(params![run_id, input_id])?;
    }
    Ok(())
}

fn insert_task_inputs(
    tx: &Transaction,
    run_id: i64,
    inputs: &[InputTaskInfo],
) -> Result<(), StorageError> {
    if inputs.is_empty() {
        return Ok(());
    }

    let mut inputs: Vec<&InputTaskInfo> = inputs.iter().collect();
    inputs.sort_by(|a, b| {
        a.task_name()
            .cmp(b.task_name())
            .then_with(|| a.digest().cmp(b.digest()))
    });

    let mut intern = tx.prepare(
        "INSERT INTO input_task (name, digest)
         VALUES (?1, ?2)
             ON CONFLICT (name, digest)
             DO UPDATE SET id = id
         RETURNING id",
    )?;
    let mut junction = tx.prepare(
        "INSERT INTO task_run_task_input (task_run_id, input_task_id) VALUES (?1, ?2)",
    )?;

    for input in inputs {
        let input_id: i64 = intern.query_row(
            params![input.task_name(), input.digest().to_string()],
            |row| row.get(0),
        )?;
        junction.execute(params![run_id, input_id])?;
    }
    Ok(())
}

fn insert_outputs(tx: &Transaction, run_id: i64, outputs: &[Output]) -> Result<(), StorageError> {
    if outputs.is_empty() {
        return Ok(());
    }

    let mut intern_output = tx.prepare(
        "INSERT INTO output (name, type, digest, size_bytes)
         VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (name, type, digest, size_bytes)
             DO UPDATE SET id = id
         RETURNING id",
    )?;
    let mut insert_upload = tx.prepare(
        "INSERT INTO upload (uri, method, start_timestamp, stop_timestamp)
         VALUES (?1, ?2, ?3, ?4)
         RETURNING id",
    )?;
    let mut triple = tx.prepare(
        "INSERT INTO task_run_output (task_run_id, output_id, upload_id) VALUES (?1, ?2, ?3)",
    )?;

    for output in outputs {
        let output_id: i64 = intern_output.query_row(
            params![
                output.name,
                output.kind.as_str(),
                output.digest.to_string(),
                output.size_bytes,
            ],
            |row| row.get(0),
        )?;

        for upload in &output.uploads {
            let upload_id: i64 = insert_upload.query_row(
                params![
                    upload.uri,
                    upload.method.as_str(),
                    upload.start.to_rfc3339(),
                    upload.stop.to_rfc3339(),
                ],
                |row| row.get(0),
            )?;
            triple.execute(params![run_id, output_id, upload_id])?;
        }
    }
    Ok(())
}

pub(super) fn create_release(
    tx: &Transaction,
    name: &str,
    created_at: DateTime<Utc>,
    run_ids: &[i64],
    metadata: Option<&[u8]>,
) -> Result<i64, StorageError> {
    let release_id: i64 = tx
        .query_row(
            "INSERT INTO \"release\" (name, created_at, metadata)
             VALUES (?1, ?2, ?3)
             RETURNING id",
            params![name, created_at.to_rfc3339(), metadata],
            |row| row.get(0),
        )
        .map_err(|err| {
            if is_unique_violation(&err, "release.name") {
                StorageError::AlreadyExists
            } else {
                StorageError::Sqlite(err)
            }
        })?;

    let mut pair = tx.prepare(
        "INSERT INTO release_task_run (release_id, task_run_id) VALUES (?1, ?2)",
    )?;
    for run_id in run_ids {
        pair.execute(params![release_id, run_id])?;
    }

    Ok(release_id)
}

fn is_unique_violation(err: &rusqlite::Error, column: &str) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, Some(message)) => {
            failure.code == rusqlite::ErrorCode::ConstraintViolation && message.contains(column)
        }
        _ => false,
    }
}

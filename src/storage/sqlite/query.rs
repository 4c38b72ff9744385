use crate::model::{
    Digest, Input, InputEnvVar, InputFile, InputString, InputTaskInfo, Inputs, RunResult, TaskRun,
    TaskRunWithId,
};
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const RUN_COLUMNS: &str = "task_run.id, application.name, task.name, vcs.revision, vcs.dirty, \
     task_run.total_input_digest, task_run.start_timestamp, task_run.stop_timestamp, \
     task_run.result";

const RUN_JOINS: &str = "FROM task_run \
     JOIN task ON task.id = task_run.task_id \
     JOIN application ON application.id = task.application_id \
     JOIN vcs ON vcs.id = task_run.vcs_id";

pub(super) fn latest_run_by_digest(
    conn: &Connection,
    app_name: &str,
    task_name: &str,
    total_input_digest: &Digest,
) -> Result<Option<TaskRunWithId>, StorageError> {
    let query = format!(
        "SELECT {RUN_COLUMNS} {RUN_JOINS}
         WHERE application.name = ?1
           AND task.name = ?2
           AND task_run.total_input_digest = ?3
           AND task_run.result = 'success'
         ORDER BY task_run.id DESC
         LIMIT 1"
    );

    let row = conn
        .query_row(
            &query,
            params![app_name, task_name, total_input_digest.to_string()],
            decode_run_row,
        )
        .optional()?;

    row.map(finish_run_row).transpose()
}

pub(super) fn task_run(
    conn: &Connection,
    run_id: i64,
) -> Result<Option<TaskRunWithId>, StorageError> {
    let query = format!("SELECT {RUN_COLUMNS} {RUN_JOINS} WHERE task_run.id = ?1");

    let row = conn
        .query_row(&query, params![run_id], decode_run_row)
        .optional()?;

    row.map(finish_run_row).transpose()
}

pub(super) fn runs_for_task(
    conn: &Connection,
    app_name: &str,
    task_name: &str,
) -> Result<Vec<TaskRunWithId>, StorageError> {
    let query = format!(
        "SELECT {RUN_COLUMNS} {RUN_JOINS}
         WHERE application.name = ?1 AND task.name = ?2
         ORDER BY task_run.id DESC"
    );

    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params![app_name, task_name], decode_run_row)?;

    let mut runs = vec![];
    for row in rows {
        runs.push(finish_run_row(row?)?);
    }
    Ok(runs)
}

pub(super) fn inputs_for_run(conn: &Connection, run_id: i64) -> Result<Inputs, StorageError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT id FROM task_run WHERE id = ?1",
            params![run_id],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(StorageError::RunNotFound(run_id));
    }

    let mut inputs = Inputs::default();

    let mut stmt = conn.prepare(
        "SELECT input_file.path, input_file.digest
         FROM input_file
         JOIN task_run_file_input ON task_run_file_input.input_file_id = input_file.id
         WHERE task_run_file_input.task_run_id = ?1",
    )?;
    for row in stmt.query_map(params![run_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })? {
        let (path, digest) = row?;
        inputs.push(Input::File(InputFile::new(path.into(), digest.parse()?)));
    }

    let mut stmt = conn.prepare(
        "SELECT input_string.string
         FROM input_string
         JOIN task_run_string_input ON task_run_string_input.input_string_id = input_string.id
         WHERE task_run_string_input.task_run_id = ?1",
    )?;
    for row in stmt.query_map(params![run_id], |row| row.get::<_, String>(0))? {
        inputs.push(Input::String(InputString::new(row?)));
    }

    let mut stmt = conn.prepare(
        "SELECT input_env_var.name, input_env_var.digest
         FROM input_env_var
         JOIN task_run_env_var_input
           ON task_run_env_var_input.input_env_var_id = input_env_var.id
         WHERE task_run_env_var_input.task_run_id = ?1",
    )?;
    for row in stmt.query_map(params![run_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })? {
        let (name, digest) = row?;
        inputs.push(Input::EnvVar(InputEnvVar::new(name, digest.parse()?)));
    }

    let mut stmt = conn.prepare(
        "SELECT input_task.name, input_task.digest
         FROM input_task
         JOIN task_run_task_input ON task_run_task_input.input_task_id = input_task.id
         WHERE task_run_task_input.task_run_id = ?1",
    )?;
    for row in stmt.query_map(params![run_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })? {
        let (name, digest) = row?;
        inputs.push(Input::TaskInfo(InputTaskInfo::new(name, digest.parse()?)));
    }

    Ok(inputs)
}

/// The raw column values of one task_run row; decoding that can fail outside
/// rusqlite happens in [`finish_run_row`].
struct RawRun {
    id: i64,
    app_name: String,
    task_name: String,
    vcs_revision: String,
    vcs_dirty: bool,
    total_input_digest: String,
    start: String,
    stop: String,
    result: String,
}

fn decode_run_row(row: &Row) -> rusqlite::Result<RawRun> {
    Ok(RawRun {
        id: row.get(0)?,
        app_name: row.get(1)?,
        task_name: row.get(2)?,
        vcs_revision: row.get(3)?,
        vcs_dirty: row.get(4)?,
        total_input_digest: row.get(5)?,
        start: row.get(6)?,
        stop: row.get(7)?,
        result: row.get(8)?,
    })
}

fn finish_run_row(raw: RawRun) -> Result<TaskRunWithId, StorageError> {
    let result: RunResult = raw.result.parse().map_err(|_| StorageError::Decode {
        column: "task_run.result",
        value: raw.result.clone(),
    })?;

    Ok(TaskRunWithId {
        id: raw.id,
        run: TaskRun {
            app_name: raw.app_name,
            task_name: raw.task_name,
            vcs_revision: raw.vcs_revision,
            vcs_dirty: raw.vcs_dirty,
            total_input_digest: raw.total_input_digest.parse()?,
            start: parse_timestamp(&raw.start)?,
            stop: parse_timestamp(&raw.stop)?,
            result,
        },
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

use crate::storage::StorageError;
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::debug;

/// Numbered schema migrations. Never edit a shipped entry; append a new one.
const MIGRATIONS: &[&str] = &[
    // 1: initial schema
    r#"
    CREATE TABLE application (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        CONSTRAINT application_name_uniq UNIQUE (name)
    );

    CREATE TABLE task (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        application_id INTEGER NOT NULL REFERENCES application (id),
        CONSTRAINT task_name_application_id_uniq UNIQUE (name, application_id)
    );

    CREATE TABLE vcs (
        id INTEGER PRIMARY KEY,
        revision TEXT NOT NULL,
        dirty INTEGER NOT NULL,
        CONSTRAINT vcs_revision_dirty_uniq UNIQUE (revision, dirty)
    );

    CREATE TABLE input_file (
        id INTEGER PRIMARY KEY,
        path TEXT NOT NULL,
        digest TEXT NOT NULL,
        CONSTRAINT input_file_path_digest_uniq UNIQUE (path, digest)
    );

    CREATE TABLE input_string (
        id INTEGER PRIMARY KEY,
        string TEXT NOT NULL,
        digest TEXT NOT NULL,
        CONSTRAINT input_string_digest_uniq UNIQUE (digest)
    );

    CREATE TABLE input_env_var (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        digest TEXT NOT NULL,
        CONSTRAINT input_env_var_name_digest_uniq UNIQUE (name, digest)
    );

    CREATE TABLE input_task (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        digest TEXT NOT NULL,
        CONSTRAINT input_task_name_digest_uniq UNIQUE (name, digest)
    );

    CREATE TABLE task_run (
        id INTEGER PRIMARY KEY,
        vcs_id INTEGER NOT NULL REFERENCES vcs (id),
        task_id INTEGER NOT NULL REFERENCES task (id),
        total_input_digest TEXT NOT NULL,
        start_timestamp TEXT NOT NULL,
        stop_timestamp TEXT NOT NULL,
        result TEXT NOT NULL
    );

    CREATE INDEX task_run_task_id_digest_idx
        ON task_run (task_id, total_input_digest);

    CREATE TABLE task_run_file_input (
        task_run_id INTEGER NOT NULL REFERENCES task_run (id),
        input_file_id INTEGER NOT NULL REFERENCES input_file (id)
    );

    CREATE TABLE task_run_string_input (
        task_run_id INTEGER NOT NULL REFERENCES task_run (id),
        input_string_id INTEGER NOT NULL REFERENCES input_string (id)
    );

    CREATE TABLE task_run_env_var_input (
        task_run_id INTEGER NOT NULL REFERENCES task_run (id),
        input_env_var_id INTEGER NOT NULL REFERENCES input_env_var (id)
    );

    CREATE TABLE task_run_task_input (
        task_run_id INTEGER NOT NULL REFERENCES task_run (id),
        input_task_id INTEGER NOT NULL REFERENCES input_task (id)
    );

    CREATE TABLE output (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        digest TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        CONSTRAINT output_name_type_digest_size_bytes_uniq
            UNIQUE (name, type, digest, size_bytes)
    );

    CREATE TABLE upload (
        id INTEGER PRIMARY KEY,
        uri TEXT NOT NULL,
        method TEXT NOT NULL,
        start_timestamp TEXT NOT NULL,
        stop_timestamp TEXT NOT NULL
    );

    CREATE TABLE task_run_output (
        task_run_id INTEGER NOT NULL REFERENCES task_run (id),
        output_id INTEGER NOT NULL REFERENCES output (id),
        upload_id INTEGER NOT NULL REFERENCES upload (id)
    );

    CREATE TABLE "release" (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        metadata BLOB,
        CONSTRAINT release_name_uniq UNIQUE (name)
    );

    CREATE TABLE release_task_run (
        release_id INTEGER NOT NULL REFERENCES "release" (id),
        task_run_id INTEGER NOT NULL REFERENCES task_run (id)
    );
    "#,
];

/// Brings the database up to the current schema version.
pub(super) fn apply(conn: &mut Connection) -> Result<(), StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let tx = conn.transaction()?;

    let current: i64 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for (index, sql) in MIGRATIONS.iter().enumerate() {
        let version = index as i64 + 1;
        if version <= current {
            continue;
        }

        debug!(version, "applying registry schema migration");
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().to_rfc3339()],
        )?;
    }

    tx.commit()?;
    Ok(())
}

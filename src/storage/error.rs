use crate::model::DigestError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("a release with this name already exists")]
    AlreadyExists,

    #[error("a release must reference at least one task run")]
    EmptyRelease,

    #[error("task run {0} does not exist")]
    RunNotFound(i64),

    #[error("the registry database is unavailable: {0}")]
    Unavailable(rusqlite::Error),

    #[error(transparent)]
    Sqlite(rusqlite::Error),

    #[error("decoding a stored digest failed: {0}")]
    Digest(#[from] DigestError),

    #[error("decoding a stored timestamp failed: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("decoding stored column {column} value {value:?} failed")]
    Decode { column: &'static str, value: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        StorageError::Sqlite(value)
    }
}

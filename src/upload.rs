//! The artifact uploader seam.
//!
//! Upload back-ends are collaborators; the engine only requires
//! at-least-once semantics and idempotence by content digest. The in-tree
//! implementation copies files to a local destination; S3 and docker
//! registry back-ends plug in through the same trait.

use crate::model::{digest_reader, Digest, OutputKind, OutputSpec, Upload, UploadMethod};
use async_trait::async_trait;
use chrono::Utc;
use std::io;
use std::io::BufReader;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, instrument};

/// An output found on disk after a successful run, ready for upload.
#[derive(Clone, Debug)]
pub struct CollectedOutput {
    pub spec: OutputSpec,
    pub absolute_path: PathBuf,
    pub digest: Digest,
    pub size_bytes: u64,
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, output: &CollectedOutput) -> Result<Upload, UploadError>;
}

/// Copies outputs to a local directory. Re-uploads of identical content are
/// skipped, which is what makes retries safe.
#[derive(Clone, Debug, Default)]
pub struct FileCopyUploader;

impl FileCopyUploader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Uploader for FileCopyUploader {
    #[instrument(name = "FileCopyUploader::upload", skip(self, output), fields(output = %output.spec.name))]
    async fn upload(&self, output: &CollectedOutput) -> Result<Upload, UploadError> {
        if output.spec.kind != OutputKind::File {
            return Err(UploadError::UnsupportedKind {
                output: output.spec.name.clone(),
                kind: output.spec.kind,
            });
        }

        let dest_dir = output
            .spec
            .copy_to
            .as_ref()
            .ok_or_else(|| UploadError::NoDestination {
                output: output.spec.name.clone(),
            })?;

        let file_name =
            output
                .absolute_path
                .file_name()
                .ok_or_else(|| UploadError::NoDestination {
                    output: output.spec.name.clone(),
                })?;
        let dest = dest_dir.join(file_name);

        let start = Utc::now();

        let already_uploaded = match std::fs::File::open(&dest) {
            Ok(existing) => digest_reader(BufReader::new(existing))
                .map(|d| d == output.digest)
                .unwrap_or(false),
            Err(_) => false,
        };

        if already_uploaded {
            debug!(?dest, "destination already holds this digest, skipping copy");
        } else {
            tokio::fs::create_dir_all(dest_dir)
                .await
                .map_err(|err| UploadError::Io {
                    path: dest_dir.clone(),
                    err,
                })?;
            tokio::fs::copy(&output.absolute_path, &dest)
                .await
                .map_err(|err| UploadError::Io {
                    path: dest.clone(),
                    err,
                })?;
        }

        Ok(Upload {
            uri: format!("file://{}", dest.display()),
            method: UploadMethod::FileCopy,
            start,
            stop: Utc::now(),
        })
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("output {output} declares no upload destination")]
    NoDestination { output: String },

    #[error("output {output} has kind {kind}, which this uploader cannot handle")]
    UnsupportedKind { output: String, kind: OutputKind },

    #[error("uploading to {path:?} failed: {err}")]
    Io { path: PathBuf, err: io::Error },
}

use super::{Digest, Inputs, OutputKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RunResult {
    Success,
    Failure,
}

impl RunResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunResult::Success => "success",
            RunResult::Failure => "failure",
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunResult::Success),
            "failure" => Ok(RunResult::Failure),
            other => Err(format!("unknown run result {other:?}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum UploadMethod {
    FileCopy,
    S3,
    DockerRegistry,
}

impl UploadMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadMethod::FileCopy => "filecopy",
            UploadMethod::S3 => "s3",
            UploadMethod::DockerRegistry => "docker",
        }
    }
}

impl fmt::Display for UploadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filecopy" => Ok(UploadMethod::FileCopy),
            "s3" => Ok(UploadMethod::S3),
            "docker" => Ok(UploadMethod::DockerRegistry),
            other => Err(format!("unknown upload method {other:?}")),
        }
    }
}

/// One completed transfer of an output to a destination.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub uri: String,
    pub method: UploadMethod,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

/// An artifact a finished task produced. Only metadata is tracked; the bytes
/// themselves live wherever the uploads put them.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub kind: OutputKind,
    pub digest: Digest,
    pub size_bytes: u64,
    pub uploads: Vec<Upload>,
}

/// The registry read model of a recorded task run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub app_name: String,
    pub task_name: String,
    pub vcs_revision: String,
    pub vcs_dirty: bool,
    pub total_input_digest: Digest,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub result: RunResult,
}

/// A recorded run together with its registry id.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskRunWithId {
    pub id: i64,
    pub run: TaskRun,
}

/// Everything the registry persists for a single run, in one transaction.
/// Built only after the command exits, never mutated afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskRunFull {
    pub run: TaskRun,
    pub inputs: Inputs,
    pub outputs: Vec<Output>,
}

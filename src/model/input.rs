use super::{digest_composite, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Reserved input-string key under which a task's own declaration digest is
/// recorded. Entries carrying this prefix survive input-string substitution
/// because they are part of the task's identity.
pub const TASK_CFG_INPUT_KEY: &str = "__taskdef__";

/// A file that was resolved as a task input. The path is relative to the
/// repository root; the digest covers the file contents.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct InputFile {
    path: PathBuf,
    digest: Digest,
}

impl InputFile {
    pub fn new(path: PathBuf, digest: Digest) -> Self {
        Self { path, digest }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn string_form(&self) -> String {
        self.path.display().to_string()
    }
}

/// An arbitrary string that participates in a task's fingerprint.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct InputString {
    value: String,
    digest: Digest,
}

impl InputString {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let digest = super::digest_string(&value);
        Self { value, digest }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn string_form(&self) -> String {
        format!("string:{}", self.value)
    }

    /// Whether this entry is the reserved task-declaration digest.
    pub fn is_task_cfg(&self) -> bool {
        self.value
            .strip_prefix(TASK_CFG_INPUT_KEY)
            .is_some_and(|rest| rest.starts_with(':'))
    }
}

/// An environment variable input. Only the name and the digest of the value
/// are recorded; the value itself never reaches the registry.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct InputEnvVar {
    name: String,
    digest: Digest,
}

impl InputEnvVar {
    pub fn new(name: impl Into<String>, digest: Digest) -> Self {
        Self {
            name: name.into(),
            digest,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn string_form(&self) -> String {
        format!("env:{}", self.name)
    }
}

/// A synthetic input fingerprinting another task's resolved declaration,
/// which is how cross-task dependencies enter a fingerprint.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct InputTaskInfo {
    task_name: String,
    digest: Digest,
}

impl InputTaskInfo {
    pub fn new(task_name: impl Into<String>, digest: Digest) -> Self {
        Self {
            task_name: task_name.into(),
            digest,
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn string_form(&self) -> String {
        format!("task:{}", self.task_name)
    }
}

/// A resolved task input. Every variant carries a stable string form used
/// both for sorting and for display.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Input {
    File(InputFile),
    String(InputString),
    EnvVar(InputEnvVar),
    TaskInfo(InputTaskInfo),
}

impl Input {
    pub fn string_form(&self) -> String {
        match self {
            Input::File(f) => f.string_form(),
            Input::String(s) => s.string_form(),
            Input::EnvVar(e) => e.string_form(),
            Input::TaskInfo(t) => t.string_form(),
        }
    }

    pub fn digest(&self) -> &Digest {
        match self {
            Input::File(f) => f.digest(),
            Input::String(s) => s.digest(),
            Input::EnvVar(e) => e.digest(),
            Input::TaskInfo(t) => t.digest(),
        }
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_form())
    }
}

/// The complete resolved input set of a task, held as four typed lists.
///
/// Two `Inputs` values holding the same members in any insertion order yield
/// a byte-equal [`Inputs::combined_digest`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Inputs {
    files: Vec<InputFile>,
    strings: Vec<InputString>,
    env_vars: Vec<InputEnvVar>,
    task_infos: Vec<InputTaskInfo>,
}

impl Inputs {
    pub fn new(inputs: Vec<Input>) -> Self {
        let mut result = Self::default();
        for input in inputs {
            result.push(input);
        }
        result
    }

    pub fn push(&mut self, input: Input) {
        match input {
            Input::File(f) => self.files.push(f),
            Input::String(s) => self.strings.push(s),
            Input::EnvVar(e) => self.env_vars.push(e),
            Input::TaskInfo(t) => self.task_infos.push(t),
        }
    }

    pub fn files(&self) -> &[InputFile] {
        &self.files
    }

    pub fn strings(&self) -> &[InputString] {
        &self.strings
    }

    pub fn env_vars(&self) -> &[InputEnvVar] {
        &self.env_vars
    }

    pub fn task_infos(&self) -> &[InputTaskInfo] {
        &self.task_infos
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.strings.is_empty()
            && self.env_vars.is_empty()
            && self.task_infos.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.strings.len() + self.env_vars.len() + self.task_infos.len()
    }

    /// All members as [`Input`] values, in container order.
    pub fn iter(&self) -> impl Iterator<Item = Input> + '_ {
        self.files
            .iter()
            .cloned()
            .map(Input::File)
            .chain(self.strings.iter().cloned().map(Input::String))
            .chain(self.env_vars.iter().cloned().map(Input::EnvVar))
            .chain(self.task_infos.iter().cloned().map(Input::TaskInfo))
    }

    /// The task fingerprint: a composite digest over every member digest.
    /// Member digests are sorted by raw byte value before hashing, so the
    /// result does not depend on insertion order.
    pub fn combined_digest(&self) -> Digest {
        digest_composite(self.iter().map(|input| input.digest().clone()))
    }

    /// A copy with the caller-supplied input strings replaced by `strings`.
    /// The reserved task-declaration entry is retained; it is part of the
    /// task's identity, not of the caller-supplied set.
    pub fn with_replaced_strings(&self, strings: Vec<InputString>) -> Self {
        let mut result = self.clone();
        result.strings.retain(InputString::is_task_cfg);
        result.strings.extend(strings);
        result
    }
}

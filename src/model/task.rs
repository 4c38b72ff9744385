use super::Digest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// A task identifier of the form `app_name.task_name`.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(app_name: &str, task_name: &str) -> Self {
        Self(format!("{app_name}.{task_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = TaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((app, task)) if !app.is_empty() && !task.is_empty() => {
                Ok(TaskId::new(app, task))
            }
            _ => Err(TaskIdError::Malformed(s.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum TaskIdError {
    #[error("malformed task id {0:?}, expected `app_name.task_name`")]
    Malformed(String),
}

/// An environment variable a task declares as input. Optional variables that
/// are unset at resolution time fingerprint as the digest of the empty
/// string instead of failing the resolve.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EnvVarSpec {
    pub name: String,
    pub optional: bool,
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    File,
    DockerImage,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::File => "file",
            OutputKind::DockerImage => "docker-image",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(OutputKind::File),
            "docker-image" => Ok(OutputKind::DockerImage),
            other => Err(format!("unknown output kind {other:?}")),
        }
    }
}

/// An output a task declares it will produce. `path` is relative to the task
/// directory. `copy_to` is the destination for the file-copy uploader; other
/// upload back-ends are wired in by the embedding application.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub path: PathBuf,
    pub kind: OutputKind,
    pub copy_to: Option<PathBuf>,
}

/// A declared unit of work: a command run in a directory, with declared
/// inputs (file globs, environment variables, upstream tasks) and declared
/// outputs. The declaration digest pins the configuration itself into the
/// task's fingerprint.
#[derive(Builder, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct Task {
    app_name: String,

    task_name: String,

    /// Absolute path of the directory the command runs in, under the
    /// repository root.
    directory: PathBuf,

    command: Vec<String>,

    #[builder(default)]
    input_globs: Vec<String>,

    #[builder(default)]
    input_env_vars: Vec<EnvVarSpec>,

    /// Upstream tasks whose resolved fingerprints become inputs of this one.
    #[builder(default)]
    input_tasks: Vec<TaskId>,

    #[builder(default)]
    output_specs: Vec<OutputSpec>,

    /// Digest of the task's declaration bytes.
    cfg_digest: Digest,
}

impl Task {
    pub fn builder() -> TaskBuilder {
        Default::default()
    }

    pub fn id(&self) -> TaskId {
        TaskId::new(&self.app_name, &self.task_name)
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn input_globs(&self) -> &[String] {
        &self.input_globs
    }

    pub fn input_env_vars(&self) -> &[EnvVarSpec] {
        &self.input_env_vars
    }

    pub fn input_tasks(&self) -> &[TaskId] {
        &self.input_tasks
    }

    pub fn output_specs(&self) -> &[OutputSpec] {
        &self.output_specs
    }

    pub fn cfg_digest(&self) -> &Digest {
        &self.cfg_digest
    }

    /// Whether the task declares any inputs at all.
    pub fn has_declared_inputs(&self) -> bool {
        !self.input_globs.is_empty()
            || !self.input_env_vars.is_empty()
            || !self.input_tasks.is_empty()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id().fmt(f)
    }
}

/// All tasks discovered in a repository, keyed and iterated in `id` order so
/// schedules are deterministic.
#[derive(Clone, Debug, Default)]
pub struct TaskSet {
    tasks: BTreeMap<TaskId, Task>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task) -> Result<(), TaskSetError> {
        let id = task.id();
        if self.tasks.contains_key(&id) {
            return Err(TaskSetError::DuplicateTask(id));
        }
        self.tasks.insert(id, task);
        Ok(())
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Select tasks by target strings: an exact task id (`app.task`), an app
    /// name (all of its tasks), or a glob over task ids (`*.check`). No
    /// targets selects everything.
    pub fn select(&self, targets: &[String]) -> Result<Vec<&Task>, TaskSetError> {
        if targets.is_empty() {
            return Ok(self.iter().collect());
        }

        let mut selected: BTreeMap<TaskId, &Task> = BTreeMap::new();
        for target in targets {
            let mut matched = false;

            if target.contains('*') || target.contains('?') {
                let glob = globset::Glob::new(target)
                    .map_err(|_| TaskSetError::UnknownTarget(target.clone()))?
                    .compile_matcher();
                for task in self.iter() {
                    if glob.is_match(task.id().as_str()) {
                        selected.insert(task.id(), task);
                        matched = true;
                    }
                }
            } else if let Ok(id) = target.parse::<TaskId>() {
                if let Some(task) = self.get(&id) {
                    selected.insert(id, task);
                    matched = true;
                }
            }

            if !matched {
                for task in self.iter() {
                    if task.app_name() == target {
                        selected.insert(task.id(), task);
                        matched = true;
                    }
                }
            }

            if !matched {
                return Err(TaskSetError::UnknownTarget(target.clone()));
            }
        }

        Ok(selected.into_values().collect())
    }
}

#[derive(Error, Debug)]
pub enum TaskSetError {
    #[error("task {0} is declared more than once")]
    DuplicateTask(TaskId),

    #[error("target {0:?} does not match any application or task")]
    UnknownTarget(String),
}

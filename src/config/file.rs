use super::{ConfigError, APP_FILE};
use crate::model::{digest_bytes, EnvVarSpec, OutputKind, OutputSpec, Task, TaskId, TaskSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The repository-level `Chronicle.toml`. Every section is optional; the
/// file's presence is what marks the repository root.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryFile {
    pub database: Option<PathBuf>,

    #[serde(default)]
    pub runner: RunnerSection,

    #[serde(default)]
    pub sandbox: SandboxSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSection {
    pub workers: Option<usize>,
    pub record_failed_runs: Option<bool>,
    pub skip_after_error: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxSection {
    pub system_paths: Option<Vec<PathBuf>>,
    pub interactive_allow_paths: Option<Vec<PathBuf>>,
}

impl RepositoryFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            err,
        })?;
        toml::from_str(&contents).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            err: Box::new(err),
        })
    }
}

/// A per-application `App.toml` manifest.
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppFile {
    pub name: String,

    #[serde(default)]
    pub tasks: Vec<TaskDecl>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDecl {
    pub name: String,
    pub command: Vec<String>,

    #[serde(default)]
    pub inputs: InputsDecl,

    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InputsDecl {
    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub environment_variables: Vec<EnvVarDecl>,

    /// Ids of upstream tasks whose fingerprints feed into this task.
    #[serde(default)]
    pub task_infos: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnvVarDecl {
    pub name: String,

    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputDecl {
    pub name: String,
    pub path: PathBuf,

    #[serde(default = "default_output_kind")]
    pub kind: OutputKind,

    pub copy_to: Option<PathBuf>,
}

fn default_output_kind() -> OutputKind {
    OutputKind::File
}

impl AppFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            err,
        })?;
        let app: AppFile = toml::from_str(&contents).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            err: Box::new(err),
        })?;
        app.validate(path)?;
        Ok(app)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: "application name must not be empty".to_string(),
            });
        }
        for task in &self.tasks {
            if task.name.is_empty() {
                return Err(ConfigError::Invalid {
                    path: path.to_path_buf(),
                    reason: "task name must not be empty".to_string(),
                });
            }
            if task.command.is_empty() {
                return Err(ConfigError::Invalid {
                    path: path.to_path_buf(),
                    reason: format!("task {:?} declares no command", task.name),
                });
            }
            for id in &task.inputs.task_infos {
                if id.parse::<TaskId>().is_err() {
                    return Err(ConfigError::Invalid {
                        path: path.to_path_buf(),
                        reason: format!(
                            "task {:?} references malformed task id {id:?}",
                            task.name
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Materializes the manifest into [`Task`] values rooted at `app_dir`.
    /// Each task's declaration digest covers its canonical serialized form,
    /// so editing a declaration changes the task's fingerprint.
    pub fn into_tasks(self, app_dir: &Path) -> Result<Vec<Task>, ConfigError> {
        let mut tasks = vec![];
        for decl in self.tasks {
            let declaration_bytes =
                serde_json::to_vec(&decl).expect("task declarations serialize");

            let input_tasks = decl
                .inputs
                .task_infos
                .iter()
                .map(|id| id.parse::<TaskId>().expect("validated task id"))
                .collect::<Vec<_>>();

            let task = Task::builder()
                .app_name(self.name.clone())
                .task_name(decl.name)
                .directory(app_dir.to_path_buf())
                .command(decl.command)
                .input_globs(decl.inputs.files)
                .input_env_vars(
                    decl.inputs
                        .environment_variables
                        .into_iter()
                        .map(|v| EnvVarSpec {
                            name: v.name,
                            optional: v.optional,
                        })
                        .collect::<Vec<_>>(),
                )
                .input_tasks(input_tasks)
                .output_specs(
                    decl.outputs
                        .into_iter()
                        .map(|o| OutputSpec {
                            name: o.name,
                            path: o.path,
                            kind: o.kind,
                            copy_to: o.copy_to,
                        })
                        .collect::<Vec<_>>(),
                )
                .cfg_digest(digest_bytes(&declaration_bytes))
                .build()
                .expect("all task fields are set");

            tasks.push(task);
        }
        Ok(tasks)
    }
}

/// Walks the repository and loads every `App.toml` into one task set.
pub fn discover_tasks(repository_root: &Path) -> Result<TaskSet, ConfigError> {
    let mut set = TaskSet::new();
    let mut stack = vec![repository_root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let manifest = dir.join(APP_FILE);
        if manifest.is_file() {
            debug!(?manifest, "loading application manifest");
            let app = AppFile::load(&manifest)?;
            for task in app.into_tasks(&dir)? {
                set.insert(task)?;
            }
        }

        let entries = fs::read_dir(&dir).map_err(|err| ConfigError::Io {
            path: dir.clone(),
            err,
        })?;
        for entry in entries {
            let entry = entry.map_err(|err| ConfigError::Io {
                path: dir.clone(),
                err,
            })?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if path.is_dir() && !name.starts_with('.') {
                stack.push(path);
            }
        }
    }

    Ok(set)
}

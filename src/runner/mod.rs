//! Orchestrates runs for a set of tasks: resolve, evaluate, execute inside
//! the sandbox, upload, persist. Tasks are distributed over a bounded worker
//! pool; the task list is pre-sorted by id so scheduling is deterministic.

mod coordinator;

pub use coordinator::Coordinator;

use crate::config::Config;
use crate::evaluator::{Evaluation, EvaluatorError, TaskStatusEvaluator};
use crate::events::{Event, EventBus};
use crate::executor::{Executor, ExecutorError};
use crate::model::{
    digest_reader, DigestError, Output, RunResult, Task, TaskId, TaskRun, TaskRunFull,
    TaskRunWithId, TaskSet, TaskStatus,
};
use crate::resolver::InputResolver;
use crate::sandbox::SandboxedCommand;
use crate::storage::{RunRegistry, StorageError};
use crate::upload::{CollectedOutput, UploadError, Uploader};
use crate::vcs::{Vcs, VcsError};
use crossbeam::deque::{Injector, Steal};
use std::io;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{instrument, warn};

/// Everything the runner shares across workers. Explicit so embedders can
/// swap out any collaborator.
pub struct RunnerContext {
    pub config: Config,
    pub registry: Arc<dyn RunRegistry>,
    pub vcs: Arc<dyn Vcs>,
    pub events: Arc<EventBus>,
    pub coordinator: Arc<Coordinator>,
}

/// Per-invocation knobs. Worker count, failure recording and skip-on-error
/// come from [`Config`].
#[derive(Clone, Debug, Default)]
pub struct RunnerOptions {
    /// Execute tasks even when a matching run exists.
    pub force: bool,

    /// Refuse to run anything while the working tree has untracked or
    /// modified files.
    pub require_clean_worktree: bool,

    /// Extra strings mixed into every task's fingerprint.
    pub extra_input_strings: Vec<String>,
}

/// The terminal state one task reached.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The task declares no inputs, so it cannot be fingerprinted.
    InputsUndefined,

    /// A run with the same fingerprint already exists.
    SkippedRunExists { run: TaskRunWithId },

    /// An earlier task failed and skip-on-error is active.
    SkippedAfterError,

    /// The command succeeded and the run was committed.
    Done { run_id: i64 },

    /// The command exited non-zero. `run_id` is set when failure recording
    /// is enabled.
    Failed { run_id: Option<i64>, exit_code: i32 },

    /// The task could not be driven to completion at all.
    Errored { error: TaskError },
}

#[derive(Debug)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub outcome: TaskOutcome,
}

/// Drives tasks through `RESOLVING -> EVALUATING -> (SKIPPED | EXECUTING ->
/// UPLOADING -> PERSISTING -> DONE | FAILED)`.
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    ctx: RunnerContext,
    options: RunnerOptions,
    evaluator: TaskStatusEvaluator,
    executor: Arc<dyn Executor>,
    uploader: Arc<dyn Uploader>,
    errored: AtomicBool,
}

impl TaskRunner {
    pub fn new(
        ctx: RunnerContext,
        options: RunnerOptions,
        executor: Arc<dyn Executor>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        let resolver = Arc::new(InputResolver::new(
            ctx.config.repository_root().to_path_buf(),
            ctx.vcs.clone(),
            options.extra_input_strings.clone(),
            !options.require_clean_worktree,
        ));
        let evaluator = TaskStatusEvaluator::new(resolver, ctx.registry.clone(), None);

        Self {
            inner: Arc::new(RunnerInner {
                ctx,
                options,
                evaluator,
                executor,
                uploader,
                errored: AtomicBool::new(false),
            }),
        }
    }

    /// Runs `selected` (a subset of `tasks`) and reports every task's
    /// terminal state. Aborts before any side effect when the strict
    /// worktree gate trips.
    #[instrument(name = "TaskRunner::run", skip(self, tasks, selected))]
    pub async fn run(
        &self,
        tasks: Arc<TaskSet>,
        mut selected: Vec<Task>,
    ) -> Result<Vec<TaskReport>, RunnerError> {
        if self.inner.options.require_clean_worktree {
            let untracked = self.inner.ctx.vcs.untracked_files()?;
            if !untracked.is_empty() {
                return Err(RunnerError::UntrackedFilesExist { files: untracked });
            }
            if self.inner.ctx.vcs.is_dirty()? {
                return Err(RunnerError::DirtyWorktree);
            }
        }

        selected.sort_by_key(|task| task.id());
        self.inner.ctx.events.send(Event::RunnerStarted {
            task_count: selected.len(),
        });

        let queue: Arc<Injector<Task>> = Arc::new(Injector::new());
        let task_count = selected.len();
        for task in selected {
            queue.push(task);
        }

        let worker_count = self.inner.ctx.config.max_workers().min(task_count).max(1);
        let reports = Arc::new(Mutex::new(Vec::with_capacity(task_count)));

        let mut handles = vec![];
        for _ in 0..worker_count {
            let inner = self.inner.clone();
            let tasks = tasks.clone();
            let queue = queue.clone();
            let reports = reports.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if inner.ctx.coordinator.should_shutdown() {
                        break;
                    }
                    let task = match queue.steal() {
                        Steal::Success(task) => task,
                        Steal::Empty => break,
                        Steal::Retry => continue,
                    };
                    let report = inner.run_task(&tasks, task).await;
                    reports.lock().unwrap().push(report);
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        self.inner.ctx.events.send(Event::RunnerFinished);

        let mut reports = std::mem::take(&mut *reports.lock().unwrap());
        reports.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(reports)
    }
}

impl RunnerInner {
    async fn run_task(&self, tasks: &TaskSet, task: Task) -> TaskReport {
        let task_id = task.id();

        if self.errored.load(Ordering::SeqCst) && self.ctx.config.skip_after_error() {
            self.ctx.events.send(Event::TaskSkipped {
                task_id: task_id.to_string(),
                existing_run_id: None,
            });
            return TaskReport {
                task_id,
                outcome: TaskOutcome::SkippedAfterError,
            };
        }

        match self.try_run_task(tasks, &task).await {
            Ok(outcome) => {
                if matches!(outcome, TaskOutcome::Failed { .. }) {
                    self.errored.store(true, Ordering::SeqCst);
                }
                TaskReport { task_id, outcome }
            }
            Err(error) => {
                self.errored.store(true, Ordering::SeqCst);
                self.ctx.events.send(Event::TaskErrored {
                    task_id: task_id.to_string(),
                    error: error.to_string(),
                });
                TaskReport {
                    task_id,
                    outcome: TaskOutcome::Errored { error },
                }
            }
        }
    }

    async fn try_run_task(&self, tasks: &TaskSet, task: &Task) -> Result<TaskOutcome, TaskError> {
        self.ctx.events.send(Event::TaskResolving {
            task_id: task.id().to_string(),
        });

        let evaluation = self.evaluator.status(tasks, task).await?;
        self.ctx.events.send(Event::TaskEvaluated {
            task_id: task.id().to_string(),
            status: evaluation.status,
        });

        match evaluation.status {
            TaskStatus::InputsUndefined => Ok(TaskOutcome::InputsUndefined),
            TaskStatus::RunExists if !self.options.force => {
                let run = evaluation
                    .existing_run
                    .expect("a RunExists evaluation carries the matching run");
                self.ctx.events.send(Event::TaskSkipped {
                    task_id: task.id().to_string(),
                    existing_run_id: Some(run.id),
                });
                Ok(TaskOutcome::SkippedRunExists { run })
            }
            _ => self.execute_task(task, evaluation).await,
        }
    }

    async fn execute_task(
        &self,
        task: &Task,
        evaluation: Evaluation,
    ) -> Result<TaskOutcome, TaskError> {
        let inputs = evaluation
            .inputs
            .expect("executable tasks have resolved inputs");
        let total_input_digest = evaluation
            .total_input_digest
            .expect("executable tasks have a fingerprint");

        // Scratch space for task-info files; dropped (and deleted) on every
        // exit path of this function.
        let scratch = tempfile::tempdir().map_err(TaskError::TaskInfoEnv)?;
        let mut env: Vec<(String, String)> = std::env::vars().collect();
        for dep in task.input_tasks() {
            let info = inputs
                .task_infos()
                .iter()
                .find(|info| info.task_name() == dep.as_str());
            let Some(info) = info else { continue };

            let (app, name) = dep
                .as_str()
                .split_once('.')
                .expect("task ids contain a dot");
            if let Some(run) = self.ctx.registry.latest_run_by_digest(app, name, info.digest())? {
                let path = scratch.path().join(format!("{dep}.json"));
                let payload = serde_json::to_vec_pretty(&run)
                    .map_err(|err| TaskError::TaskInfoEnv(err.into()))?;
                std::fs::write(&path, payload).map_err(TaskError::TaskInfoEnv)?;
                env.push((task_info_env_var(dep), path.display().to_string()));
            }
        }

        let command = self.build_command(task, &inputs, env)?;
        self.ctx.events.send(Event::TaskExecuting {
            task_id: task.id().to_string(),
        });
        let exec = self.executor.execute(command, &self.ctx.coordinator).await?;

        let vcs_revision = self.ctx.vcs.commit_id()?;
        let vcs_dirty = self.ctx.vcs.is_dirty()?;

        if exec.success() {
            let outputs = self.collect_and_upload(task).await?;
            let run = TaskRunFull {
                run: TaskRun {
                    app_name: task.app_name().to_string(),
                    task_name: task.task_name().to_string(),
                    vcs_revision,
                    vcs_dirty,
                    total_input_digest,
                    start: exec.start,
                    stop: exec.stop,
                    result: RunResult::Success,
                },
                inputs,
                outputs,
            };
            let run_id = self.ctx.registry.save_task_run(&run)?;
            self.ctx.events.send(Event::TaskCompleted {
                task_id: task.id().to_string(),
                result: RunResult::Success,
                run_id: Some(run_id),
            });
            Ok(TaskOutcome::Done { run_id })
        } else {
            warn!(
                task = %task.id(),
                exit_code = exec.exit_code,
                stderr = %String::from_utf8_lossy(&exec.stderr),
                "task command failed"
            );

            let run_id = if self.ctx.config.record_failed_runs() {
                let run = TaskRunFull {
                    run: TaskRun {
                        app_name: task.app_name().to_string(),
                        task_name: task.task_name().to_string(),
                        vcs_revision,
                        vcs_dirty,
                        total_input_digest,
                        start: exec.start,
                        stop: exec.stop,
                        result: RunResult::Failure,
                    },
                    inputs,
                    outputs: vec![],
                };
                Some(self.ctx.registry.save_task_run(&run)?)
            } else {
                None
            };

            self.ctx.events.send(Event::TaskCompleted {
                task_id: task.id().to_string(),
                result: RunResult::Failure,
                run_id,
            });
            Ok(TaskOutcome::Failed {
                run_id,
                exit_code: exec.exit_code,
            })
        }
    }

    fn build_command(
        &self,
        task: &Task,
        inputs: &crate::model::Inputs,
        env: Vec<(String, String)>,
    ) -> Result<SandboxedCommand, TaskError> {
        let repo_root = self.ctx.config.repository_root();

        let mut allow_paths = vec![task.directory().to_path_buf()];
        for file in inputs.files() {
            allow_paths.push(absolute_input_path(repo_root, file.path()));
        }
        for path in self.ctx.config.sandbox_system_paths() {
            // Hosts differ in which linker paths exist; a rule for a
            // missing path would fail ruleset construction in the child.
            if path.exists() {
                allow_paths.push(path.clone());
            }
        }
        allow_paths.sort();
        allow_paths.dedup();

        let mut allow_write_paths = vec![];
        for spec in task.output_specs() {
            let output_path = task.directory().join(&spec.path);
            if let Some(parent) = output_path.parent() {
                std::fs::create_dir_all(parent).map_err(|err| TaskError::PrepareOutputDir {
                    path: parent.to_path_buf(),
                    err,
                })?;
                allow_write_paths.push(parent.to_path_buf());
            }
        }
        allow_write_paths.sort();
        allow_write_paths.dedup();

        Ok(SandboxedCommand {
            name: task.command()[0].clone(),
            args: task.command()[1..].to_vec(),
            dir: task.directory().to_path_buf(),
            env,
            allow_paths,
            allow_write_paths,
        })
    }

    async fn collect_and_upload(&self, task: &Task) -> Result<Vec<Output>, TaskError> {
        let mut outputs = vec![];
        for spec in task.output_specs() {
            let absolute = task.directory().join(&spec.path);
            let metadata =
                std::fs::metadata(&absolute).map_err(|_| TaskError::MissingOutput {
                    output: spec.name.clone(),
                    path: absolute.clone(),
                })?;

            let file = std::fs::File::open(&absolute).map_err(|err| TaskError::CollectOutput {
                output: spec.name.clone(),
                err,
            })?;
            let digest =
                digest_reader(BufReader::new(file)).map_err(|err| TaskError::DigestOutput {
                    output: spec.name.clone(),
                    err,
                })?;

            let collected = CollectedOutput {
                spec: spec.clone(),
                absolute_path: absolute,
                digest: digest.clone(),
                size_bytes: metadata.len(),
            };

            let uploads = if spec.copy_to.is_some() {
                self.ctx.events.send(Event::TaskUploading {
                    task_id: task.id().to_string(),
                    output: spec.name.clone(),
                });
                vec![self.uploader.upload(&collected).await?]
            } else {
                vec![]
            };

            outputs.push(Output {
                name: spec.name.clone(),
                kind: spec.kind,
                digest,
                size_bytes: metadata.len(),
                uploads,
            });
        }
        Ok(outputs)
    }
}

fn absolute_input_path(repo_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        repo_root.join(path)
    }
}

fn task_info_env_var(id: &TaskId) -> String {
    format!(
        "CHRONICLE_TASK_INFO_{}",
        id.as_str().to_uppercase().replace(['.', '-'], "_")
    )
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("the working tree contains untracked files: {}", format_files(files))]
    UntrackedFilesExist { files: Vec<PathBuf> },

    #[error("the working tree contains modified tracked files")]
    DirtyWorktree,

    #[error(transparent)]
    Vcs(#[from] VcsError),
}

fn format_files(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A failure that stopped one task from reaching a terminal run state. The
/// runner reports these annotated with the task id.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Evaluate(#[from] EvaluatorError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error("preparing task-info environment failed: {0}")]
    TaskInfoEnv(io::Error),

    #[error("creating output directory {path:?} failed: {err}")]
    PrepareOutputDir { path: PathBuf, err: io::Error },

    #[error("output {output} was not produced at {path:?}")]
    MissingOutput { output: String, path: PathBuf },

    #[error("collecting output {output} failed: {err}")]
    CollectOutput { output: String, err: io::Error },

    #[error("digesting output {output} failed: {err}")]
    DigestOutput { output: String, err: DigestError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecResult;
    use crate::model::digest_string;
    use crate::storage::SqliteRegistry;
    use crate::upload::FileCopyUploader;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::fs;

    struct StubVcs {
        root: PathBuf,
        untracked: Vec<PathBuf>,
        dirty: bool,
    }

    impl StubVcs {
        fn clean(root: &Path) -> Self {
            Self {
                root: root.to_path_buf(),
                untracked: vec![],
                dirty: false,
            }
        }
    }

    impl Vcs for StubVcs {
        fn commit_id(&self) -> Result<String, VcsError> {
            Ok("f00dfeed".to_string())
        }

        fn is_dirty(&self) -> Result<bool, VcsError> {
            Ok(self.dirty)
        }

        fn untracked_files(&self) -> Result<Vec<PathBuf>, VcsError> {
            Ok(self.untracked.clone())
        }

        fn tracked_files_matching(&self, _globs: &[String]) -> Result<Vec<PathBuf>, VcsError> {
            // Everything under the fixture is tracked; resolver tests cover
            // the intersection logic itself.
            fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
                for entry in fs::read_dir(dir).unwrap() {
                    let path = entry.unwrap().path();
                    if path.is_dir() {
                        walk(root, &path, out);
                    } else {
                        out.push(path.strip_prefix(root).unwrap().to_path_buf());
                    }
                }
            }

            let mut files = vec![];
            walk(&self.root, &self.root, &mut files);
            Ok(files)
        }
    }

    /// Executor stub: no sandbox, optionally creates declared outputs.
    struct FakeExecutor {
        exit_code: i32,
        create_files: Vec<(PathBuf, &'static [u8])>,
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn execute(
            &self,
            command: SandboxedCommand,
            _coordinator: &Coordinator,
        ) -> Result<ExecResult, ExecutorError> {
            for (rel, contents) in &self.create_files {
                let path = command.dir.join(rel);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, contents).unwrap();
            }
            Ok(ExecResult {
                exit_code: self.exit_code,
                stdout: vec![],
                stderr: b"boom".to_vec(),
                start: Utc::now(),
                stop: Utc::now(),
            })
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        tasks: Arc<TaskSet>,
        registry: Arc<SqliteRegistry>,
    }

    fn fixture(task_names: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("demo/src")).unwrap();
        fs::write(dir.path().join("demo/src/a.c"), "int main(){}").unwrap();

        let mut tasks = TaskSet::new();
        for name in task_names {
            tasks
                .insert(
                    Task::builder()
                        .app_name("demo")
                        .task_name(*name)
                        .directory(dir.path().join("demo"))
                        .command(vec!["true".to_string()])
                        .input_globs(vec!["src/*.c".to_string()])
                        .cfg_digest(digest_string(name))
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }

        Fixture {
            dir,
            tasks: Arc::new(tasks),
            registry: Arc::new(SqliteRegistry::open_in_memory().unwrap()),
        }
    }

    fn runner(
        fix: &Fixture,
        vcs: StubVcs,
        options: RunnerOptions,
        executor: FakeExecutor,
    ) -> TaskRunner {
        let config = Config::builder()
            .repository_root(fix.dir.path().to_path_buf())
            .max_workers(1usize)
            .build()
            .unwrap();

        TaskRunner::new(
            RunnerContext {
                config,
                registry: fix.registry.clone(),
                vcs: Arc::new(vcs),
                events: Arc::new(EventBus::new()),
                coordinator: Arc::new(Coordinator::new()),
            },
            options,
            Arc::new(executor),
            Arc::new(FileCopyUploader::new()),
        )
    }

    fn selected(fix: &Fixture) -> Vec<Task> {
        fix.tasks.iter().cloned().collect()
    }

    #[tokio::test]
    async fn first_run_commits_and_second_is_skipped() {
        let fix = fixture(&["build"]);

        let first = runner(
            &fix,
            StubVcs::clean(fix.dir.path()),
            RunnerOptions::default(),
            FakeExecutor {
                exit_code: 0,
                create_files: vec![],
            },
        );
        let reports = first.run(fix.tasks.clone(), selected(&fix)).await.unwrap();
        let first_run_id = match &reports[0].outcome {
            TaskOutcome::Done { run_id } => *run_id,
            other => panic!("expected Done, got {other:?}"),
        };

        let second = runner(
            &fix,
            StubVcs::clean(fix.dir.path()),
            RunnerOptions::default(),
            FakeExecutor {
                exit_code: 0,
                create_files: vec![],
            },
        );
        let reports = second.run(fix.tasks.clone(), selected(&fix)).await.unwrap();
        match &reports[0].outcome {
            TaskOutcome::SkippedRunExists { run } => assert_eq!(run.id, first_run_id),
            other => panic!("expected SkippedRunExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn input_string_order_does_not_force_reruns() {
        let fix = fixture(&["build"]);

        let xy = RunnerOptions {
            extra_input_strings: vec!["x".into(), "y".into()],
            ..Default::default()
        };
        let yx = RunnerOptions {
            extra_input_strings: vec!["y".into(), "x".into()],
            ..Default::default()
        };

        let first = runner(
            &fix,
            StubVcs::clean(fix.dir.path()),
            xy,
            FakeExecutor {
                exit_code: 0,
                create_files: vec![],
            },
        );
        first.run(fix.tasks.clone(), selected(&fix)).await.unwrap();

        let second = runner(
            &fix,
            StubVcs::clean(fix.dir.path()),
            yx,
            FakeExecutor {
                exit_code: 0,
                create_files: vec![],
            },
        );
        let reports = second.run(fix.tasks.clone(), selected(&fix)).await.unwrap();
        assert_matches!(reports[0].outcome, TaskOutcome::SkippedRunExists { .. });
    }

    #[tokio::test]
    async fn forced_runs_execute_despite_existing_runs() {
        let fix = fixture(&["build"]);

        let plain = runner(
            &fix,
            StubVcs::clean(fix.dir.path()),
            RunnerOptions::default(),
            FakeExecutor {
                exit_code: 0,
                create_files: vec![],
            },
        );
        plain.run(fix.tasks.clone(), selected(&fix)).await.unwrap();

        let forced = runner(
            &fix,
            StubVcs::clean(fix.dir.path()),
            RunnerOptions {
                force: true,
                ..Default::default()
            },
            FakeExecutor {
                exit_code: 0,
                create_files: vec![],
            },
        );
        let reports = forced.run(fix.tasks.clone(), selected(&fix)).await.unwrap();
        assert_matches!(reports[0].outcome, TaskOutcome::Done { .. });
    }

    #[tokio::test]
    async fn failures_are_recorded_and_later_tasks_skipped() {
        let fix = fixture(&["aaa", "zzz"]);

        let runner = runner(
            &fix,
            StubVcs::clean(fix.dir.path()),
            RunnerOptions::default(),
            FakeExecutor {
                exit_code: 2,
                create_files: vec![],
            },
        );
        let reports = runner.run(fix.tasks.clone(), selected(&fix)).await.unwrap();
        assert_matches!(
            reports[0].outcome,
            TaskOutcome::Failed {
                run_id: Some(_),
                exit_code: 2
            }
        );
        assert_matches!(reports[1].outcome, TaskOutcome::SkippedAfterError);

        // The failure row exists but does not satisfy future lookups.
        let runs = fix.registry.runs_for_task("demo", "aaa").unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run.result, RunResult::Failure);
    }

    #[tokio::test]
    async fn outputs_are_collected_and_uploaded() {
        let fix = fixture(&[]);
        let dest = fix.dir.path().join("artifacts");

        let mut tasks = TaskSet::new();
        tasks
            .insert(
                Task::builder()
                    .app_name("demo")
                    .task_name("package")
                    .directory(fix.dir.path().join("demo"))
                    .command(vec!["true".to_string()])
                    .input_globs(vec!["src/*.c".to_string()])
                    .output_specs(vec![crate::model::OutputSpec {
                        name: "demo.bin".to_string(),
                        path: "out/demo.bin".into(),
                        kind: crate::model::OutputKind::File,
                        copy_to: Some(dest.clone()),
                    }])
                    .cfg_digest(digest_string("package"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let tasks = Arc::new(tasks);
        let fix = Fixture {
            tasks: tasks.clone(),
            ..fix
        };

        let runner = runner(
            &fix,
            StubVcs::clean(fix.dir.path()),
            RunnerOptions::default(),
            FakeExecutor {
                exit_code: 0,
                create_files: vec![("out/demo.bin".into(), b"artifact")],
            },
        );
        let reports = runner.run(tasks.clone(), selected(&fix)).await.unwrap();
        assert_matches!(reports[0].outcome, TaskOutcome::Done { .. });
        assert_eq!(fs::read(dest.join("demo.bin")).unwrap(), b"artifact");
    }

    #[tokio::test]
    async fn untracked_files_trip_the_strict_gate() {
        let fix = fixture(&["build"]);

        let strict = runner(
            &fix,
            StubVcs {
                root: fix.dir.path().to_path_buf(),
                untracked: vec!["demo/loose.txt".into()],
                dirty: true,
            },
            RunnerOptions {
                require_clean_worktree: true,
                ..Default::default()
            },
            FakeExecutor {
                exit_code: 0,
                create_files: vec![],
            },
        );

        let err = strict
            .run(fix.tasks.clone(), selected(&fix))
            .await
            .unwrap_err();
        assert_matches!(err, RunnerError::UntrackedFilesExist { ref files } if files.len() == 1);

        // No run was committed.
        assert!(fix.registry.runs_for_task("demo", "build").unwrap().is_empty());
    }

    #[tokio::test]
    async fn evaluations_are_idempotent_without_new_commits() {
        let fix = fixture(&["build"]);
        let resolver = Arc::new(InputResolver::new(
            fix.dir.path().to_path_buf(),
            Arc::new(StubVcs::clean(fix.dir.path())),
            vec![],
            true,
        ));
        let evaluator = TaskStatusEvaluator::new(resolver, fix.registry.clone(), None);

        let task = fix.tasks.iter().next().unwrap();
        let first = evaluator.status(&fix.tasks, task).await.unwrap();
        let second = evaluator.status(&fix.tasks, task).await.unwrap();

        assert_eq!(first.status, TaskStatus::Pending);
        assert_eq!(second.status, first.status);
        assert_eq!(second.total_input_digest, first.total_input_digest);
    }
}

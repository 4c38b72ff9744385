use super::{load_repository, CliError, EXIT_FAILURE, EXIT_SUCCESS};
use chronicle::events::{Event, EventBus};
use chronicle::executor::SandboxedExecutor;
use chronicle::runner::{
    Coordinator, RunnerContext, RunnerOptions, TaskOutcome, TaskRunner,
};
use chronicle::storage::SqliteRegistry;
use chronicle::upload::FileCopyUploader;
use chronicle::vcs::GitRepository;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub struct RunCommand {
    /// Task ids (`app.task`), application names, or globs; all tasks when
    /// empty
    targets: Vec<String>,

    /// Run tasks even when a matching run is already recorded
    #[structopt(short = "f", long)]
    force: bool,

    /// Fail if the git repository contains modified or untracked files
    #[structopt(short = "c", long)]
    require_clean_worktree: bool,

    /// Include a string as input, can be given multiple times
    #[structopt(long = "input-str")]
    input_strings: Vec<String>,
}

impl RunCommand {
    pub async fn run(self) -> Result<i32, CliError> {
        let (config, tasks) = load_repository()?;
        let vcs = Arc::new(GitRepository::discover(config.repository_root())?);
        let registry = Arc::new(SqliteRegistry::open(config.database_path())?);

        if !SandboxedExecutor::sandbox_supported() {
            eprintln!(
                "chronicle: warning: filesystem sandboxing is unavailable on this host, \
                 commands run unrestricted"
            );
        }

        let events = Arc::new(EventBus::new());
        let coordinator = Arc::new(Coordinator::new());

        {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("chronicle: interrupt received, stopping");
                    coordinator.signal_shutdown();
                }
            });
        }

        let stream = events.subscribe();
        let printer = tokio::spawn(async move {
            loop {
                for event in stream.drain() {
                    if print_event(&event) {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        let selected = tasks
            .select(&self.targets)?
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();

        let runner = TaskRunner::new(
            RunnerContext {
                config,
                registry,
                vcs,
                events,
                coordinator,
            },
            RunnerOptions {
                force: self.force,
                require_clean_worktree: self.require_clean_worktree,
                extra_input_strings: self.input_strings,
            },
            Arc::new(SandboxedExecutor::new()),
            Arc::new(FileCopyUploader::new()),
        );

        let reports = runner.run(Arc::new(tasks), selected).await?;
        let _ = printer.await;

        let mut failed = false;
        for report in &reports {
            match &report.outcome {
                TaskOutcome::Failed { .. } | TaskOutcome::Errored { .. } => failed = true,
                _ => {}
            }
        }

        Ok(if failed { EXIT_FAILURE } else { EXIT_SUCCESS })
    }
}

/// Prints one event; returns true once the runner is finished.
fn print_event(event: &Event) -> bool {
    match event {
        Event::RunnerStarted { task_count } => {
            println!("running {task_count} task(s)");
        }
        Event::TaskSkipped {
            task_id,
            existing_run_id: Some(run_id),
        } => {
            println!("{task_id}: run {run_id} exists, skipping");
        }
        Event::TaskSkipped {
            task_id,
            existing_run_id: None,
        } => {
            println!("{task_id}: skipped");
        }
        Event::TaskExecuting { task_id } => {
            println!("{task_id}: executing");
        }
        Event::TaskUploading { task_id, output } => {
            println!("{task_id}: uploading {output}");
        }
        Event::TaskCompleted {
            task_id,
            result,
            run_id,
        } => match run_id {
            Some(run_id) => println!("{task_id}: {result}, recorded as run {run_id}"),
            None => println!("{task_id}: {result}"),
        },
        Event::TaskErrored { task_id, error } => {
            eprintln!("{task_id}: {error}");
        }
        Event::RunnerFinished => return true,
        _ => {}
    }
    false
}

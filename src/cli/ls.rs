use super::{load_repository, CliError, EXIT_SUCCESS};
use chronicle::model::{Input, Inputs, TaskId};
use chronicle::resolver::InputResolver;
use chronicle::storage::{RunRegistry, SqliteRegistry};
use chronicle::vcs::GitRepository;
use std::collections::BTreeSet;
use std::sync::Arc;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub struct LsCommand {
    #[structopt(subcommand)]
    cmd: LsSubcommand,
}

#[derive(StructOpt, Debug)]
enum LsSubcommand {
    /// List the applications declared in the repository
    Apps,

    /// List the inputs of a task (`app.task`) or of a recorded run (run id)
    Inputs(LsInputsCommand),

    /// List the recorded runs of a task
    Runs(LsRunsCommand),
}

#[derive(StructOpt, Debug)]
pub struct LsInputsCommand {
    /// `app.task` or a numeric run id
    target: String,

    /// Include a string as input, can be given multiple times
    #[structopt(long = "input-str")]
    input_strings: Vec<String>,

    /// Show per-input digests and the total input digest
    #[structopt(long)]
    digests: bool,
}

#[derive(StructOpt, Debug)]
pub struct LsRunsCommand {
    /// `app.task`
    task_id: TaskId,
}

impl LsCommand {
    pub async fn run(self) -> Result<i32, CliError> {
        match self.cmd {
            LsSubcommand::Apps => ls_apps(),
            LsSubcommand::Inputs(cmd) => cmd.run().await,
            LsSubcommand::Runs(cmd) => cmd.run().await,
        }
    }
}

fn ls_apps() -> Result<i32, CliError> {
    let (_config, tasks) = load_repository()?;

    let apps: BTreeSet<&str> = tasks.iter().map(|task| task.app_name()).collect();
    for app in apps {
        println!("{app}");
    }
    Ok(EXIT_SUCCESS)
}

impl LsInputsCommand {
    pub async fn run(self) -> Result<i32, CliError> {
        let (config, tasks) = load_repository()?;

        let inputs: Inputs = if let Ok(run_id) = self.target.parse::<i64>() {
            if !self.input_strings.is_empty() {
                return Err(CliError::Usage(
                    "--input-str only applies to task ids, not recorded runs".to_string(),
                ));
            }
            let registry = SqliteRegistry::open(config.database_path())?;
            registry.inputs_for_run(run_id)?
        } else {
            let task_id: TaskId = self
                .target
                .parse()
                .map_err(|_| CliError::Usage(format!("{:?} is neither a task id nor a run id", self.target)))?;
            let task = tasks.get(&task_id).ok_or_else(|| {
                CliError::Usage(format!("task {task_id} does not exist"))
            })?;

            let vcs = Arc::new(GitRepository::discover(config.repository_root())?);
            let resolver = InputResolver::new(
                config.repository_root().to_path_buf(),
                vcs,
                self.input_strings.clone(),
                true,
            );
            resolver.resolve(&tasks, task).await?
        };

        let mut members: Vec<Input> = inputs.iter().collect();
        members.sort_by_key(Input::string_form);

        for input in &members {
            if self.digests {
                println!("{:<60} {}", input.string_form(), input.digest());
            } else {
                println!("{}", input.string_form());
            }
        }

        if self.digests {
            println!("\nTotal Input Digest: {}", inputs.combined_digest());
        }
        Ok(EXIT_SUCCESS)
    }
}

impl LsRunsCommand {
    pub async fn run(self) -> Result<i32, CliError> {
        let (config, _tasks) = load_repository()?;
        let registry = SqliteRegistry::open(config.database_path())?;

        let (app, task) = self
            .task_id
            .as_str()
            .split_once('.')
            .expect("task ids contain a dot");

        println!(
            "{:<8} {:<9} {:<25} {:<12} {}",
            "Run ID", "Result", "Started", "Dirty", "Git Commit"
        );
        for run in registry.runs_for_task(app, task)? {
            println!(
                "{:<8} {:<9} {:<25} {:<12} {}",
                run.id,
                run.run.result.to_string(),
                run.run.start.to_rfc3339(),
                run.run.vcs_dirty,
                run.run.vcs_revision
            );
        }
        Ok(EXIT_SUCCESS)
    }
}

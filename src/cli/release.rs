use super::{load_repository, CliError, EXIT_SUCCESS};
use chronicle::evaluator::TaskStatusEvaluator;
use chronicle::model::TaskStatus;
use chronicle::resolver::InputResolver;
use chronicle::storage::{RunRegistry, SqliteRegistry};
use chronicle::vcs::GitRepository;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub struct ReleaseCommand {
    #[structopt(subcommand)]
    cmd: ReleaseSubcommand,
}

#[derive(StructOpt, Debug)]
enum ReleaseSubcommand {
    /// Group the current runs of the selected tasks under a unique name
    Create(ReleaseCreateCommand),
}

#[derive(StructOpt, Debug)]
pub struct ReleaseCreateCommand {
    /// Unique release name
    name: String,

    /// Task ids, application names, or globs; all tasks when empty
    targets: Vec<String>,

    /// Include a string as input, can be given multiple times
    #[structopt(long = "input-str")]
    input_strings: Vec<String>,

    /// File whose contents are stored as release metadata
    #[structopt(long)]
    metadata: Option<PathBuf>,
}

impl ReleaseCommand {
    pub async fn run(self) -> Result<i32, CliError> {
        match self.cmd {
            ReleaseSubcommand::Create(cmd) => cmd.run().await,
        }
    }
}

impl ReleaseCreateCommand {
    pub async fn run(self) -> Result<i32, CliError> {
        let (config, tasks) = load_repository()?;
        let vcs = Arc::new(GitRepository::discover(config.repository_root())?);
        let registry = Arc::new(SqliteRegistry::open(config.database_path())?);

        let resolver = Arc::new(InputResolver::new(
            config.repository_root().to_path_buf(),
            vcs,
            self.input_strings.clone(),
            true,
        ));
        let evaluator = TaskStatusEvaluator::new(resolver, registry.clone(), None);

        let mut run_ids = vec![];
        for task in tasks.select(&self.targets)? {
            let evaluation = evaluator.status(&tasks, task).await?;
            match (evaluation.status, evaluation.existing_run) {
                (TaskStatus::RunExists, Some(run)) => run_ids.push(run.id),
                (TaskStatus::InputsUndefined, _) => continue,
                _ => {
                    return Err(CliError::Usage(format!(
                        "task {} has no recorded run for its current inputs, run it first",
                        task.id()
                    )))
                }
            }
        }

        let metadata = match &self.metadata {
            Some(path) => {
                Some(std::fs::read(path).map_err(|err| {
                    CliError::Usage(format!("reading metadata file {path:?} failed: {err}"))
                })?)
            }
            None => None,
        };

        let release_id = registry.create_release(
            &self.name,
            Utc::now(),
            &run_ids,
            metadata.as_deref(),
        )?;

        println!(
            "release {} created with {} task run(s) (id {release_id})",
            self.name,
            run_ids.len()
        );
        Ok(EXIT_SUCCESS)
    }
}

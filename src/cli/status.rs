use super::{load_repository, CliError, EXIT_SUCCESS};
use chronicle::evaluator::TaskStatusEvaluator;
use chronicle::model::TaskStatus;
use chronicle::resolver::InputResolver;
use chronicle::runner::RunnerError;
use chronicle::storage::SqliteRegistry;
use chronicle::vcs::{GitRepository, Vcs};
use std::sync::Arc;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub struct StatusCommand {
    /// Task ids, application names, or globs; all tasks when empty
    targets: Vec<String>,

    /// Include a string as input, can be given multiple times
    #[structopt(long = "input-str")]
    input_strings: Vec<String>,

    /// If no run matches the current fingerprint, retry with this value
    /// substituted for the input strings
    #[structopt(long = "lookup-input-str")]
    lookup_input_string: Option<String>,

    /// Fail if the git repository contains modified or untracked files
    #[structopt(short = "c", long)]
    require_clean_worktree: bool,

    /// Only show tasks with this status (pending, run-exists,
    /// inputs-undefined)
    #[structopt(short = "s", long = "status")]
    filter: Option<TaskStatus>,

    /// Only print task ids
    #[structopt(short = "q", long)]
    quiet: bool,
}

impl StatusCommand {
    pub async fn run(self) -> Result<i32, CliError> {
        let (config, tasks) = load_repository()?;
        let vcs: Arc<dyn Vcs> = Arc::new(GitRepository::discover(config.repository_root())?);

        if self.require_clean_worktree {
            let untracked = vcs.untracked_files()?;
            if !untracked.is_empty() {
                return Err(RunnerError::UntrackedFilesExist { files: untracked }.into());
            }
            if vcs.is_dirty()? {
                return Err(RunnerError::DirtyWorktree.into());
            }
        }

        let registry = Arc::new(SqliteRegistry::open(config.database_path())?);
        let resolver = Arc::new(InputResolver::new(
            config.repository_root().to_path_buf(),
            vcs,
            self.input_strings.clone(),
            !self.require_clean_worktree,
        ));
        let evaluator =
            TaskStatusEvaluator::new(resolver, registry, self.lookup_input_string.clone());

        if !self.quiet {
            println!("{:<30} {:<17} {:<8} {}", "Task ID", "Status", "Run ID", "Git Commit");
        }

        for task in tasks.select(&self.targets)? {
            let evaluation = evaluator.status(&tasks, task).await?;

            if let Some(filter) = self.filter {
                if evaluation.status != filter {
                    continue;
                }
            }

            if self.quiet {
                println!("{}", task.id());
                continue;
            }

            let (run_id, commit) = match &evaluation.existing_run {
                Some(run) => (run.id.to_string(), run.run.vcs_revision.clone()),
                None => ("-".to_string(), "-".to_string()),
            };
            println!(
                "{:<30} {:<17} {:<8} {}",
                task.id().to_string(),
                evaluation.status.to_string(),
                run_id,
                commit
            );
        }

        Ok(EXIT_SUCCESS)
    }
}

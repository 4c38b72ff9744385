use super::{load_repository, CliError};
use chronicle::model::TaskId;
use chronicle::resolver::InputResolver;
use chronicle::sandbox::SandboxedCommand;
use chronicle::vcs::GitRepository;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub struct ShellCommand {
    /// The task (`app.task`) whose sandbox to enter
    task_id: TaskId,

    /// Shell command to execute
    #[structopt(short = "s", long, default_value = "/bin/bash")]
    shell: String,
}

impl ShellCommand {
    /// Resolves the task's inputs, restricts the current process to them
    /// plus the configured interactive allow-list, and replaces this
    /// process with the shell. Does not return on success.
    pub async fn run(self) -> Result<i32, CliError> {
        let (config, tasks) = load_repository()?;
        let task = tasks
            .get(&self.task_id)
            .ok_or_else(|| CliError::Usage(format!("task {} does not exist", self.task_id)))?;

        let vcs = Arc::new(GitRepository::discover(config.repository_root())?);
        let resolver = InputResolver::new(
            config.repository_root().to_path_buf(),
            vcs,
            vec![],
            true,
        );
        let inputs = resolver.resolve(&tasks, task).await?;

        let repo_root = config.repository_root();
        let mut allow_paths: Vec<PathBuf> = vec![task.directory().to_path_buf()];
        for file in inputs.files() {
            let path = file.path();
            allow_paths.push(if path.is_absolute() {
                path.to_path_buf()
            } else {
                repo_root.join(path)
            });
        }
        for path in config
            .sandbox_system_paths()
            .iter()
            .chain(config.interactive_allow_paths())
        {
            if path.exists() {
                allow_paths.push(path.clone());
            }
        }
        allow_paths.sort();
        allow_paths.dedup();

        let command = SandboxedCommand {
            name: self.shell.clone(),
            args: vec![],
            dir: task.directory().to_path_buf(),
            env: std::env::vars().collect(),
            allow_paths,
            allow_write_paths: vec![],
        };

        // In-place exec: the CLI process itself becomes the sandboxed
        // shell, keeping the terminal attached.
        let err = command.exec();
        Err(CliError::Shell(err.to_string()))
    }
}

use super::{Vcs, VcsError};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Repository state backed by the `git` command-line tool.
#[derive(Clone, Debug)]
pub struct GitRepository {
    root: PathBuf,
}

impl GitRepository {
    /// Opens the repository containing `dir`.
    pub fn discover(dir: impl AsRef<Path>) -> Result<Self, VcsError> {
        let dir = dir.as_ref();
        let top = run_git(dir, &["rev-parse", "--show-toplevel"]).map_err(|err| match err {
            VcsError::CommandFailed { .. } => VcsError::RepositoryNotFound {
                dir: dir.to_path_buf(),
            },
            other => other,
        })?;

        Ok(Self {
            root: PathBuf::from(top.trim_end()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ls_files(&self, extra_args: &[&str], globs: &[String]) -> Result<Vec<PathBuf>, VcsError> {
        let mut args: Vec<&str> = vec!["ls-files", "-z"];
        args.extend_from_slice(extra_args);
        if !globs.is_empty() {
            args.push("--");
            for glob in globs {
                args.push(glob);
            }
        }

        let out = run_git(&self.root, &args)?;
        Ok(out
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

impl Vcs for GitRepository {
    fn commit_id(&self) -> Result<String, VcsError> {
        Ok(run_git(&self.root, &["rev-parse", "HEAD"])?
            .trim_end()
            .to_string())
    }

    fn is_dirty(&self) -> Result<bool, VcsError> {
        let out = run_git(&self.root, &["status", "--porcelain"])?;
        Ok(!out.is_empty())
    }

    fn untracked_files(&self) -> Result<Vec<PathBuf>, VcsError> {
        self.ls_files(&["--others", "--exclude-standard"], &[])
    }

    fn tracked_files_matching(&self, globs: &[String]) -> Result<Vec<PathBuf>, VcsError> {
        self.ls_files(&[], globs)
    }
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String, VcsError> {
    debug!(?dir, ?args, "running git");

    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|err| VcsError::CommandUnavailable {
            command: format!("git {}", args.join(" ")),
            err,
        })?;

    if !out.status.success() {
        return Err(VcsError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&out.stderr).trim_end().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "test@example.invalid"],
            vec!["config", "user.name", "test"],
        ] {
            run_git(dir, &args).unwrap();
        }
    }

    #[test]
    fn discover_tracked_and_untracked() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        fs::write(dir.path().join("tracked.txt"), "a").unwrap();
        fs::write(dir.path().join("loose.txt"), "b").unwrap();
        run_git(dir.path(), &["add", "tracked.txt"]).unwrap();
        run_git(dir.path(), &["commit", "-q", "-m", "initial"]).unwrap();

        let repo = GitRepository::discover(dir.path()).unwrap();
        assert_eq!(repo.commit_id().unwrap().len(), 40);
        assert!(repo.is_dirty().unwrap());

        let tracked = repo.tracked_files_matching(&[]).unwrap();
        assert_eq!(tracked, vec![PathBuf::from("tracked.txt")]);

        let untracked = repo.untracked_files().unwrap();
        assert_eq!(untracked, vec![PathBuf::from("loose.txt")]);
    }

    #[test]
    fn discover_fails_outside_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            GitRepository::discover(dir.path()),
            Err(VcsError::RepositoryNotFound { .. })
        );
    }
}

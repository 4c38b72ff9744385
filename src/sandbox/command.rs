use super::landlock::{AccessMode, FsRuleset, LandlockError};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

/// The argv[1] marker under which the binary re-executes itself as a sandbox
/// child.
pub const SANDBOX_EXEC_SUBCOMMAND: &str = "__sandbox-exec";

/// Everything the sandbox child needs to run one task command. Serialized by
/// the parent onto the child's stdin as a length-prefixed record; parent and
/// child are always the same executable, so no cross-version stability is
/// promised.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxedCommand {
    pub name: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
    pub env: Vec<(String, String)>,

    /// Paths the command may read.
    pub allow_paths: Vec<PathBuf>,

    /// Paths the command may also write and create files under, typically
    /// its declared output directories.
    pub allow_write_paths: Vec<PathBuf>,
}

impl SandboxedCommand {
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let payload = serde_json::to_vec(self)?;
        writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.flush()
    }

    pub fn read_from<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;

        let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
        reader.read_exact(&mut payload)?;

        serde_json::from_slice(&payload)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Child side: installs the ruleset, then replaces the current process
    /// image with the target command so the restriction is inherited.
    /// Returns only on failure.
    pub fn exec(self) -> SandboxExecError {
        let ruleset = match FsRuleset::new() {
            Ok(ruleset) => ruleset,
            Err(err) => return SandboxExecError::Ruleset(err),
        };

        for path in &self.allow_paths {
            if let Err(err) = ruleset.allow(path, AccessMode::ReadOnly) {
                return SandboxExecError::Allow {
                    path: path.clone(),
                    err,
                };
            }
        }
        for path in &self.allow_write_paths {
            if let Err(err) = ruleset.allow(path, AccessMode::ReadWrite) {
                return SandboxExecError::Allow {
                    path: path.clone(),
                    err,
                };
            }
        }

        if let Err(err) = ruleset.restrict() {
            return SandboxExecError::Restrict(err);
        }

        if let Err(err) = std::env::set_current_dir(&self.dir) {
            return SandboxExecError::Chdir {
                dir: self.dir.clone(),
                err,
            };
        }

        let mut command = Command::new(&self.name);
        command.args(&self.args).env_clear().envs(self.env.iter().cloned());

        #[cfg(unix)]
        let err = {
            use std::os::unix::process::CommandExt;
            command.exec()
        };

        #[cfg(not(unix))]
        let err = match command.status() {
            Ok(status) => std::process::exit(status.code().unwrap_or(1)),
            Err(err) => err,
        };

        SandboxExecError::Exec {
            command: self.name,
            err,
        }
    }
}

/// Entry point for the `__sandbox-exec` subcommand. Reads the record from
/// stdin and execs it; on success this function never returns.
pub fn run_sandbox_child() -> SandboxExecError {
    let command = match SandboxedCommand::read_from(io::stdin().lock()) {
        Ok(command) => command,
        Err(err) => return SandboxExecError::ReadCommand(err),
    };
    command.exec()
}

#[derive(Error, Debug)]
pub enum SandboxExecError {
    #[error("reading the sandboxed command record failed: {0}")]
    ReadCommand(io::Error),

    #[error("creating the filesystem ruleset failed: {0}")]
    Ruleset(LandlockError),

    #[error("allowing filesystem access to {path:?} failed: {err}")]
    Allow { path: PathBuf, err: LandlockError },

    #[error("restricting filesystem access failed: {0}")]
    Restrict(LandlockError),

    #[error("changing directory to {dir:?} failed: {err}")]
    Chdir { dir: PathBuf, err: io::Error },

    #[error("exec of {command:?} failed: {err}")]
    Exec { command: String, err: io::Error },
}

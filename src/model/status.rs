use std::fmt;
use std::str::FromStr;

/// The outcome of evaluating a task against the run registry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskStatus {
    /// The task resolves to an empty input set, so no meaningful fingerprint
    /// exists.
    InputsUndefined,

    /// A successful run with the same total input digest is already
    /// recorded.
    RunExists,

    /// No recorded run matches the current fingerprint.
    Pending,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::InputsUndefined => "Inputs Undefined",
            TaskStatus::RunExists => "Run Exists",
            TaskStatus::Pending => "Pending",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inputs-undefined" => Ok(TaskStatus::InputsUndefined),
            "run-exists" => Ok(TaskStatus::RunExists),
            "pending" => Ok(TaskStatus::Pending),
            other => Err(format!(
                "unknown status {other:?}, expected one of: inputs-undefined, run-exists, pending"
            )),
        }
    }
}

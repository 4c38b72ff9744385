//! Filesystem sandboxing for task commands.
//!
//! [`landlock`] wraps the kernel's Landlock API; [`SandboxedCommand`] is the
//! record the parent process hands to a re-exec'd copy of itself, which
//! installs the ruleset and then replaces its image with the task command.

mod command;
pub mod landlock;

pub use command::*;
pub use landlock::{AccessMode, FsRuleset, LandlockError};

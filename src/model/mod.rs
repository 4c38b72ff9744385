//! The data model shared by the resolver, the executor, and the registry.

mod digest;
mod input;
mod run;
mod status;
mod task;

pub use digest::*;
pub use input::*;
pub use run::*;
pub use status::*;
pub use task::*;

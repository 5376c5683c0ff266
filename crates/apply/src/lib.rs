//! Hoist apply: effects against the outside world. Command execution and the
//! legacy-to-current migration executor.

#![forbid(unsafe_code)]

pub mod command;
pub mod migrate;
#[cfg(any(test, feature = "testing"))]
mod scripted;

pub use command::{CommandRunner, HelmCommand, ProcessRunner};
pub use migrate::{select_revisions, HelmMigrator, MigrationExecutor, MigrationReport};
#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedRunner;

//! Per-device command execution.
//!
//! A [`CommandRunner`] owns one session's detector and runs a
//! [`Workflow`] on it: settle on the login prompt, learn the device's
//! identity, then execute each [`CommandSpec`] in order.

mod command;
mod identity;
mod output;
#[allow(clippy::module_inception)]
mod runner;

pub use command::{CommandClass, CommandSpec, IdentityStep, MAC_TABLE_COMMAND, Workflow};
pub use identity::{HOSTNAME_COMMAND, HOSTNAME_MARKER, IdentityProbe, parse_marked_identity};
pub use output::{CapturedOutput, CompletionStatus};
pub use runner::{CommandRunner, RunnerOutput, RunnerSettings};

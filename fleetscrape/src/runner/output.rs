//! Captured output of one command execution.

use std::time::Duration;

use super::command::CommandSpec;
use crate::device::Device;
use crate::error::ErrorKind;

/// How a command's read ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The prompt grammar matched the end of the output.
    Complete,
    /// The budget ran out; the text is partial.
    TimedOut,
    /// The session failed while this command was in flight.
    Error(ErrorKind),
}

/// Output from a command execution. Immutable once built.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    /// Device the output came from.
    pub device: Device,

    /// The command that was executed.
    pub spec: CommandSpec,

    /// Everything received, ANSI-stripped but otherwise untouched.
    pub raw: String,

    /// Output with the command echo and trailing prompt removed.
    pub result: String,

    /// The prompt that ended the output (empty unless complete).
    pub prompt: String,

    /// How the read ended.
    pub status: CompletionStatus,

    /// Time taken to execute the command.
    pub elapsed: Duration,

    /// Failure pattern found in the output, if any.
    pub failure_message: Option<String>,
}

impl CapturedOutput {
    /// Whether the read completed and no failure pattern matched.
    pub fn is_success(&self) -> bool {
        self.status == CompletionStatus::Complete && self.failure_message.is_none()
    }

    /// Whether the read ran out of budget.
    pub fn timed_out(&self) -> bool {
        self.status == CompletionStatus::TimedOut
    }

    /// Output recorded for a command that never produced a read.
    pub(crate) fn errored(device: Device, spec: CommandSpec, kind: ErrorKind, elapsed: Duration) -> Self {
        Self {
            device,
            spec,
            raw: String::new(),
            result: String::new(),
            prompt: String::new(),
            status: CompletionStatus::Error(kind),
            elapsed,
            failure_message: None,
        }
    }

    /// Get the result lines as an iterator.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.result.lines()
    }
}

impl std::fmt::Display for CapturedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.result)
    }
}

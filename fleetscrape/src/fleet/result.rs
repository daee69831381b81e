//! Per-device results and the fleet report.

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;

use crate::device::Device;
use crate::error::{Error, ErrorKind};
use crate::runner::CapturedOutput;

/// An error reduced to what a report needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for Failure {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// How a device's workflow ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every command was attempted. Individual outputs may still be
    /// timed out or carry a failure message.
    Completed,

    /// The workflow stopped on an error.
    Failed(Failure),

    /// The run was cancelled or hit its deadline.
    Cancelled,
}

impl RunOutcome {
    pub(crate) fn from_error(err: &Error) -> Self {
        match err.kind() {
            ErrorKind::Cancelled => RunOutcome::Cancelled,
            _ => RunOutcome::Failed(Failure::from(err)),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }

    /// Error kind of a failed or cancelled outcome.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            RunOutcome::Completed => None,
            RunOutcome::Failed(failure) => Some(failure.kind),
            RunOutcome::Cancelled => Some(ErrorKind::Cancelled),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Failed(failure) => write!(f, "failed ({})", failure),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything one device's worker produced.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The device this result belongs to.
    pub device: Device,

    /// Name reported by the identity probe.
    pub identity: Option<String>,

    /// Outputs in submission order.
    pub outputs: Vec<CapturedOutput>,

    /// Terminal outcome.
    pub outcome: RunOutcome,

    /// Non-fatal problems: missing identity, timed-out commands.
    pub warnings: Vec<Failure>,

    /// Wall-clock time from dispatch to session close.
    pub elapsed: Duration,
}

impl RunResult {
    pub(crate) fn new(device: Device) -> Self {
        Self {
            device,
            identity: None,
            outputs: Vec::new(),
            outcome: RunOutcome::Completed,
            warnings: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn with_outcome(device: Device, outcome: RunOutcome, elapsed: Duration) -> Self {
        Self {
            outcome,
            elapsed,
            ..Self::new(device)
        }
    }

    /// Name used for artifacts: the identity, else the address.
    pub fn label(&self) -> &str {
        self.identity.as_deref().unwrap_or(self.device.address())
    }

    /// First output captured for `command`.
    pub fn output(&self, command: &str) -> Option<&CapturedOutput> {
        self.outputs.iter().find(|o| o.spec.command == command)
    }
}

/// Counts of outcomes across a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} failed, {} cancelled",
            self.completed, self.failed, self.cancelled
        )
    }
}

/// One [`RunResult`] per device, in the order workers finished.
#[derive(Debug, Clone, Default)]
pub struct FleetReport {
    results: IndexMap<Device, RunResult>,
}

impl FleetReport {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            results: IndexMap::with_capacity(capacity),
        }
    }

    /// Record a device's result. Each device is written exactly once.
    pub(crate) fn insert(&mut self, result: RunResult) {
        let previous = self.results.insert(result.device.clone(), result);
        debug_assert!(previous.is_none(), "device reported twice");
    }

    pub fn get(&self, device: &Device) -> Option<&RunResult> {
        self.results.get(device)
    }

    /// Look a result up by address.
    pub fn find(&self, address: &str) -> Option<&RunResult> {
        self.results.values().find(|r| r.device.address() == address)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunResult> {
        self.results.values()
    }

    pub fn summary(&self) -> ReportSummary {
        self.iter()
            .fold(ReportSummary::default(), |mut summary, r| {
                match r.outcome {
                    RunOutcome::Completed => summary.completed += 1,
                    RunOutcome::Failed(_) => summary.failed += 1,
                    RunOutcome::Cancelled => summary.cancelled += 1,
                }
                summary
            })
    }
}

impl IntoIterator for FleetReport {
    type Item = RunResult;
    type IntoIter = indexmap::map::IntoValues<Device, RunResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_values()
    }
}

//! Commands and workflows.

use std::time::Duration;

use super::identity::IdentityProbe;
use crate::platform::DeviceProfile;

/// Command behind [`Workflow::mac_table`].
pub const MAC_TABLE_COMMAND: &str = "show mac address-table dynamic | include Gi";

/// How a command's output is expected to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    /// Short query whose answer is parsed (e.g. the identity probe).
    Lookup,
    /// Bounded output ending in a prompt.
    OneShot,
    /// Large or unbounded output such as logs.
    Streaming,
}

/// One command to run, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Literal command text, without the trailing newline.
    pub command: String,

    /// Completion class.
    pub class: CommandClass,

    /// Per-command budget overriding the class default.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, class: CommandClass) -> Self {
        Self {
            command: command.into(),
            class,
            timeout: None,
        }
    }

    pub fn one_shot(command: impl Into<String>) -> Self {
        Self::new(command, CommandClass::OneShot)
    }

    pub fn streaming(command: impl Into<String>) -> Self {
        Self::new(command, CommandClass::Streaming)
    }

    pub fn lookup(command: impl Into<String>) -> Self {
        Self::new(command, CommandClass::Lookup)
    }

    /// Override this command's budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Where a workflow's identity probe comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdentityStep {
    /// No probe; artifacts are labelled by address.
    #[default]
    Skip,
    /// The probe of the device profile in use.
    FromProfile,
    /// This probe, whatever the platform.
    Probe(IdentityProbe),
}

/// The per-device sequence: an optional identity probe, then commands.
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    /// Probe run first.
    pub identity: IdentityStep,

    /// Commands, executed strictly in order.
    pub commands: Vec<CommandSpec>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `probe` regardless of the device profile.
    pub fn with_identity(mut self, probe: IdentityProbe) -> Self {
        self.identity = IdentityStep::Probe(probe);
        self
    }

    /// Use the device profile's own probe.
    pub fn with_profile_identity(mut self) -> Self {
        self.identity = IdentityStep::FromProfile;
        self
    }

    /// The probe to run on a device using `profile`, if any.
    pub fn identity_probe<'a>(&'a self, profile: &'a DeviceProfile) -> Option<&'a IdentityProbe> {
        match &self.identity {
            IdentityStep::Skip => None,
            IdentityStep::FromProfile => Some(&profile.identity),
            IdentityStep::Probe(probe) => Some(probe),
        }
    }

    /// Append a command.
    pub fn then(mut self, spec: CommandSpec) -> Self {
        self.commands.push(spec);
        self
    }

    /// Configuration backup: version, inventory, interfaces, running-config.
    pub fn config_backup() -> Self {
        Self::new()
            .with_profile_identity()
            .then(CommandSpec::one_shot("terminal length 0"))
            .then(CommandSpec::one_shot("show version"))
            .then(CommandSpec::one_shot("show inventory"))
            .then(CommandSpec::one_shot("show ip interface brief"))
            .then(CommandSpec::one_shot("show running-config"))
    }

    /// Device log capture for summarization.
    pub fn log_capture() -> Self {
        Self::new()
            .with_profile_identity()
            .then(CommandSpec::one_shot("terminal length 0"))
            .then(CommandSpec::streaming("show log"))
    }

    /// Dynamic MAC address table on gigabit ports.
    pub fn mac_table() -> Self {
        Self::new()
            .with_identity(IdentityProbe::Prompt)
            .then(CommandSpec::one_shot("terminal length 0"))
            .then(CommandSpec::one_shot(MAC_TABLE_COMMAND))
    }
}

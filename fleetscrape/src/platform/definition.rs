//! Device profile: everything vendor-specific the runner needs.

use std::fmt;
use std::sync::Arc;

use crate::channel::{PromptGrammar, RegexGrammar};
use crate::runner::IdentityProbe;

/// Vendor-specific prompt grammar, failure strings and identity probe.
#[derive(Clone)]
pub struct DeviceProfile {
    /// Platform name (e.g., "cisco_ios", "arista_eos").
    pub name: String,

    /// Grammar used to detect the end of each command's output.
    pub grammar: Arc<dyn PromptGrammar>,

    /// Output substrings that mark a failed command.
    pub failed_when_contains: Vec<String>,

    /// How this platform reveals its hostname.
    pub identity: IdentityProbe,
}

impl DeviceProfile {
    /// Create a profile with the default `#`/`>` grammar.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            grammar: Arc::new(RegexGrammar::default()),
            failed_when_contains: vec![],
            identity: IdentityProbe::default(),
        }
    }

    /// Replace the prompt grammar.
    pub fn with_grammar(mut self, grammar: Arc<dyn PromptGrammar>) -> Self {
        self.grammar = grammar;
        self
    }

    /// Add a failure pattern.
    pub fn with_failure_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.failed_when_contains.push(pattern.into());
        self
    }

    /// Set the identity probe.
    pub fn with_identity(mut self, identity: IdentityProbe) -> Self {
        self.identity = identity;
        self
    }

    /// First failure pattern contained in `output`, if any.
    pub fn detect_failure(&self, output: &str) -> Option<&str> {
        self.failed_when_contains
            .iter()
            .find(|pattern| output.contains(pattern.as_str()))
            .map(String::as_str)
    }

    /// Strip the command echo and the trailing prompt line from raw output.
    pub fn normalize_output(&self, raw: &str, command: &str) -> String {
        let output = raw.trim_start_matches(['\r', '\n']);
        let output = output
            .strip_prefix(command)
            .unwrap_or(output)
            .trim_start_matches([' ', '\r', '\n']);

        let output = output.trim_end();
        let (body, last_line) = match output.rfind('\n') {
            Some(pos) => (&output[..pos], &output[pos + 1..]),
            None => ("", output),
        };

        if self.grammar.is_terminated(last_line.trim().as_bytes()) {
            body.trim_end_matches('\r').to_string()
        } else {
            output.to_string()
        }
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::new("generic")
    }
}

impl fmt::Debug for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceProfile")
            .field("name", &self.name)
            .field("grammar", &"<PromptGrammar>")
            .field("failed_when_contains", &self.failed_when_contains)
            .field("identity", &self.identity)
            .finish()
    }
}

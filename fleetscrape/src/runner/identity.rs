//! Identity discovery: what does the device call itself?

/// Default probe command for IOS-like devices.
pub const HOSTNAME_COMMAND: &str = "show running-config | include hostname";

/// Default marker token in the probe output.
pub const HOSTNAME_MARKER: &str = "hostname";

/// How to learn a device's self-reported name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityProbe {
    /// Run `command`; the identity is the word after `marker` on the first
    /// line that has one.
    Command { command: String, marker: String },

    /// Send an empty line; the identity is the prompt minus its terminator.
    Prompt,
}

impl IdentityProbe {
    pub fn command(command: impl Into<String>, marker: impl Into<String>) -> Self {
        IdentityProbe::Command {
            command: command.into(),
            marker: marker.into(),
        }
    }

    /// The text sent to the device for this probe.
    pub fn command_text(&self) -> &str {
        match self {
            IdentityProbe::Command { command, .. } => command,
            IdentityProbe::Prompt => "",
        }
    }
}

impl Default for IdentityProbe {
    fn default() -> Self {
        Self::command(HOSTNAME_COMMAND, HOSTNAME_MARKER)
    }
}

/// Word following the first whitespace-delimited `marker` token.
///
/// The command echo (`... | include hostname`) has the marker as its last
/// word and is skipped.
pub fn parse_marked_identity(output: &str, marker: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        words.by_ref().find(|w| *w == marker)?;
        words.next().map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hostname() {
        let output = "show running-config | include hostname\r\nhostname Lab-SW1\r\nLab-SW1#";
        assert_eq!(
            parse_marked_identity(output, HOSTNAME_MARKER),
            Some("Lab-SW1".to_string())
        );
    }

    #[test]
    fn test_parse_missing() {
        let output = "show running-config | include hostname\r\nLab-SW1#";
        assert_eq!(parse_marked_identity(output, HOSTNAME_MARKER), None);
    }

    #[test]
    fn test_first_matching_line_wins() {
        let output = "hostname Core-A\r\nhostname Core-B\r\n";
        assert_eq!(
            parse_marked_identity(output, HOSTNAME_MARKER),
            Some("Core-A".to_string())
        );
    }
}

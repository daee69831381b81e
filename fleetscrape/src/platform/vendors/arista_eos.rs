//! Arista EOS switch profile.
//!
//! Prompt shape is adapted from scrapli's EOS driver, minus the
//! configuration-mode variants: only show commands are run.

use std::sync::Arc;

use crate::channel::RegexGrammar;
use crate::error::{ChannelError, Result};
use crate::platform::DeviceProfile;
use crate::runner::IdentityProbe;

/// Create the Arista EOS profile.
pub fn profile() -> Result<DeviceProfile> {
    let grammar = RegexGrammar::with_not_contains(r"[#>]", vec!["(config".to_string()])
        .and_then(|g| g.with_prompt_line(r"[\w.\-@()/: ]{1,63}[#>]"))
        .map_err(ChannelError::InvalidPattern)?;

    Ok(DeviceProfile::new("arista_eos")
        .with_grammar(Arc::new(grammar))
        .with_identity(IdentityProbe::command("show hostname", "Hostname:"))
        .with_failure_pattern("% Ambiguous command")
        .with_failure_pattern("% Error")
        .with_failure_pattern("% Incomplete command")
        .with_failure_pattern("% Invalid input")
        .with_failure_pattern("% Unavailable command"))
}

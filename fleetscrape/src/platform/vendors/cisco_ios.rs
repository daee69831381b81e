//! Cisco IOS / IOS-XE switch profile.
//!
//! # Prompt Examples
//!
//! ```text
//! Lab-SW1>                  # user EXEC
//! Lab-SW1#                  # privileged EXEC
//! ```
//!
//! The final line must look like a hostname followed by the terminator,
//! so a config line such as `banner motd #` does not end a read.

use std::sync::Arc;

use crate::channel::RegexGrammar;
use crate::error::{ChannelError, Result};
use crate::platform::DeviceProfile;
use crate::runner::IdentityProbe;

/// Prompt line shape: up to 63 hostname characters, then `#` or `>`.
pub const PROMPT_LINE: &str = r"[\w.\-@/:()]{1,63}[#>]";

/// Create the Cisco IOS profile.
pub fn profile() -> Result<DeviceProfile> {
    let grammar = RegexGrammar::new(r"[#>]")
        .and_then(|g| g.with_prompt_line(PROMPT_LINE))
        .map_err(ChannelError::InvalidPattern)?;

    Ok(DeviceProfile::new("cisco_ios")
        .with_grammar(Arc::new(grammar))
        .with_identity(IdentityProbe::command(
            "show running-config | include hostname",
            "hostname",
        ))
        .with_failure_pattern("% Invalid input")
        .with_failure_pattern("% Incomplete command")
        .with_failure_pattern("% Ambiguous command")
        .with_failure_pattern("% Unknown command")
        .with_failure_pattern("% Bad IP address"))
}

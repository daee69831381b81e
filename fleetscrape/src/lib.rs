//! # Fleetscrape
//!
//! Async SSH state collection for fleets of network switches.
//!
//! Fleetscrape opens an interactive shell on every switch in an inventory,
//! runs a fixed sequence of commands on each, and decides from the text
//! alone when each command has finished. Results come back per device,
//! with failures isolated to the device they happened on.
//!
//! ## Features
//!
//! - Async SSH sessions via russh, with password auth and known_hosts checking
//! - Strict and bounded-heuristic completion detection over ANSI-stripped output
//! - Pluggable prompt grammars per platform (Cisco IOS, Arista EOS, generic)
//! - Bounded concurrency, overall deadline and cancellation across the fleet
//! - Config dumps, MAC location tables and summarized device logs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fleetscrape::{
//!     Credentials, Device, FleetDispatcher, ProfileRegistry, RunnerSettings, SshConnector,
//!     SshOptions, Workflow,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fleetscrape::Error> {
//!     let creds = Arc::new(Credentials::new("admin", "secret"));
//!     let devices = vec![
//!         Device::new("192.168.1.1", creds.clone()),
//!         Device::new("192.168.1.2", creds),
//!     ];
//!
//!     let profile = ProfileRegistry::builtin()?.resolve("cisco_ios", None)?;
//!     let dispatcher = FleetDispatcher::new(
//!         SshConnector::new(SshOptions::default()),
//!         Arc::new(profile),
//!         Arc::new(RunnerSettings::default()),
//!     );
//!
//!     let report = dispatcher
//!         .run_all(&devices, &Workflow::config_backup(), Some(4))
//!         .await;
//!     for result in report.iter() {
//!         println!("{} ({}): {}", result.label(), result.device, result.outcome);
//!     }
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod channel;
pub mod device;
pub mod error;
pub mod fleet;
pub mod inventory;
pub mod mac_table;
pub mod platform;
pub mod runner;
pub mod settings;
pub mod summarize;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use channel::{CompletionPolicy, Connector, PromptGrammar, RegexGrammar, SessionChannel};
pub use device::{Credentials, Device};
pub use error::{Error, ErrorKind, Result};
pub use fleet::{EventSink, FleetDispatcher, FleetEvent, FleetReport, RunOutcome, RunResult};
pub use platform::{DeviceProfile, ProfileRegistry};
pub use runner::{
    CapturedOutput, CommandClass, CommandRunner, CommandSpec, CompletionStatus, IdentityProbe,
    IdentityStep, RunnerSettings, Workflow,
};
pub use settings::Settings;
pub use transport::{SshConnector, SshOptions};

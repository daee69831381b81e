//! Run configuration loaded from TOML.
//!
//! Every field has a default, so an empty (or absent) file is a valid
//! configuration:
//!
//! ```toml
//! [ssh]
//! port = 22
//! host_key_verification = "accept-new"
//!
//! [detector]
//! command_timeout_secs = 30
//! streaming_timeout_secs = 10
//! streaming_min_bytes = 100
//!
//! [fleet]
//! concurrency = 8
//!
//! [profile]
//! platform = "cisco_ios"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::channel::{PollBackoff, StreamingHeuristic};
use crate::error::{InventoryError, Result};
use crate::runner::RunnerSettings;
use crate::transport::{HostKeyVerification, SshOptions};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub ssh: SshSection,
    pub detector: DetectorSection,
    pub fleet: FleetSection,
    pub profile: ProfileSection,
    pub paths: PathsSection,
    pub summarizer: SummarizerSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshSection {
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub terminal_width: u32,
    pub terminal_height: u32,
    pub host_key_verification: HostKeyVerification,
    pub known_hosts_path: Option<PathBuf>,
}

impl Default for SshSection {
    fn default() -> Self {
        let defaults = SshOptions::default();
        Self {
            port: defaults.port,
            connect_timeout_secs: defaults.timeout.as_secs(),
            terminal_width: defaults.terminal_width,
            terminal_height: defaults.terminal_height,
            host_key_verification: defaults.host_key_verification,
            known_hosts_path: defaults.known_hosts_path,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorSection {
    pub command_timeout_secs: u64,
    pub login_timeout_secs: u64,
    pub streaming_timeout_secs: u64,
    pub streaming_min_bytes: usize,
    pub search_depth: usize,
    pub initial_poll_ms: u64,
    pub max_poll_ms: u64,
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            command_timeout_secs: 30,
            login_timeout_secs: 10,
            streaming_timeout_secs: 10,
            streaming_min_bytes: 100,
            search_depth: 1000,
            initial_poll_ms: 25,
            max_poll_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetSection {
    /// Maximum concurrent sessions; unset means one per device.
    pub concurrency: Option<usize>,

    /// Overall run deadline.
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileSection {
    pub platform: String,

    /// Custom terminator pattern replacing the platform's grammar.
    pub prompt_pattern: Option<String>,
}

impl Default for ProfileSection {
    fn default() -> Self {
        Self {
            platform: "cisco_ios".to_string(),
            prompt_pattern: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsSection {
    pub inventory: PathBuf,
    pub credentials: PathBuf,
    pub interface_locations: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            inventory: PathBuf::from("iplist.txt"),
            credentials: PathBuf::from("credentials.txt"),
            interface_locations: PathBuf::from("interface_location.csv"),
            output_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SummarizerSection {
    /// Root of an OpenAI-compatible API, without `/chat/completions`.
    pub base_url: String,
    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
}

impl Default for SummarizerSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "FLEETSCRAPE_API_KEY".to_string(),
            max_tokens: 1024,
        }
    }
}

impl Settings {
    /// Parse settings from TOML text. `path` is only used in errors.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|source| {
            InventoryError::Settings {
                path: path.to_path_buf(),
                source,
            }
            .into()
        })
    }

    /// Load settings from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| InventoryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Load `path` if it exists, else use the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("no settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            port: self.ssh.port,
            timeout: Duration::from_secs(self.ssh.connect_timeout_secs),
            terminal_width: self.ssh.terminal_width,
            terminal_height: self.ssh.terminal_height,
            host_key_verification: self.ssh.host_key_verification.clone(),
            known_hosts_path: self.ssh.known_hosts_path.clone(),
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        let d = &self.detector;
        let initial = Duration::from_millis(d.initial_poll_ms.max(1));
        RunnerSettings {
            command_timeout: Duration::from_secs(d.command_timeout_secs),
            login_timeout: Duration::from_secs(d.login_timeout_secs),
            streaming: StreamingHeuristic {
                timeout: Duration::from_secs(d.streaming_timeout_secs),
                min_bytes: d.streaming_min_bytes,
            },
            search_depth: d.search_depth,
            backoff: PollBackoff {
                initial,
                max: Duration::from_millis(d.max_poll_ms).max(initial),
            },
        }
    }

    /// Overall deadline for a fleet run, if configured.
    pub fn deadline(&self) -> Option<Duration> {
        self.fleet.deadline_secs.map(Duration::from_secs)
    }
}

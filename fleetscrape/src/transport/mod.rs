//! SSH transport layer wrapping russh.
//!
//! This module provides connection setup, authentication, host key
//! checking and the interactive shell that backs [`SessionChannel`](crate::channel::SessionChannel).

pub mod config;
mod ssh;

pub use config::{AuthMethod, HostKeyVerification, SshConfig, SshOptions};
pub use ssh::{SshConnector, SshSession, SshTransport};

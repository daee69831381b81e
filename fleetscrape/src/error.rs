//! Error types for fleetscrape.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for fleetscrape operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Command runner errors
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    /// Inventory and credential loading errors
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Device profile errors
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Artifact-writing and summarization errors
    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

/// Coarse classification of an [`Error`], used in per-device reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Host unreachable or connection refused.
    Connect,
    /// Credentials rejected.
    Auth,
    /// Host key unknown (strict mode) or changed.
    HostKey,
    /// Unexpected or malformed session behavior.
    Protocol,
    /// A connect or command budget was exhausted.
    Timeout,
    /// The identity probe found no matching line.
    IdentityNotFound,
    /// Malformed collaborator input.
    Parse,
    /// The run was cancelled or hit its overall deadline.
    Cancelled,
    /// Local I/O failure.
    Io,
}

impl ErrorKind {
    /// Short stable label for reports.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connect => "ConnectError",
            ErrorKind::Auth => "AuthError",
            ErrorKind::HostKey => "HostKeyError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::IdentityNotFound => "IdentityNotFound",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Io => "IOError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(e) => e.kind(),
            Error::Channel(e) => e.kind(),
            Error::Runner(e) => e.kind(),
            Error::Inventory(e) => e.kind(),
            Error::Platform(_) => ErrorKind::Parse,
            Error::Artifact(e) => e.kind(),
        }
    }
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// Host key is not in known_hosts and strict checking is on
    #[error("Host key for {host}:{port} is not known")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the recorded one
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Failed to open PTY shell on the session
    #[error("Failed to open interactive shell: {0}")]
    ShellRequestFailed(String),

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::ConnectionFailed { .. } => ErrorKind::Connect,
            TransportError::AuthenticationFailed { .. } => ErrorKind::Auth,
            TransportError::HostKeyUnknown { .. }
            | TransportError::HostKeyChanged { .. }
            | TransportError::KnownHosts(_) => ErrorKind::HostKey,
            TransportError::Timeout(_) => ErrorKind::Timeout,
            TransportError::Ssh(russh::Error::IO(_)) => ErrorKind::Connect,
            TransportError::Ssh(_)
            | TransportError::ShellRequestFailed(_)
            | TransportError::Disconnected => ErrorKind::Protocol,
        }
    }
}

/// Session channel errors (send/receive on an open shell).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Writing to the shell failed
    #[error("Broken pipe while sending to {address}: {message}")]
    BrokenPipe { address: String, message: String },

    /// The remote side closed the shell
    #[error("Channel closed by remote")]
    Closed,

    /// Operation on a session that was already closed locally
    #[error("Session already closed")]
    NotOpen,

    /// Invalid prompt pattern
    #[error("Invalid prompt pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl ChannelError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::BrokenPipe { .. } => ErrorKind::Io,
            ChannelError::Closed | ChannelError::NotOpen => ErrorKind::Protocol,
            ChannelError::InvalidPattern(_) => ErrorKind::Parse,
        }
    }
}

/// Command runner errors.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// No line in the identity probe output carried the marker token
    #[error("No line containing '{marker}' in output of '{command}'")]
    IdentityNotFound { command: String, marker: String },

    /// A command's response never completed within budget
    #[error("Command '{command}' did not complete within {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    /// The run was cancelled
    #[error("Run cancelled")]
    Cancelled,
}

impl RunnerError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunnerError::IdentityNotFound { .. } => ErrorKind::IdentityNotFound,
            RunnerError::CommandTimeout { .. } => ErrorKind::Timeout,
            RunnerError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Inventory and credential loading errors. Always fatal to a run.
#[derive(Error, Debug)]
pub enum InventoryError {
    /// File could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File contents were malformed
    #[error("Malformed {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    /// Settings file could not be parsed
    #[error("Invalid settings in {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Inventory contained no addresses
    #[error("Inventory {0} lists no devices")]
    Empty(PathBuf),
}

impl InventoryError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::Read { .. } => ErrorKind::Io,
            InventoryError::Malformed { .. }
            | InventoryError::Settings { .. }
            | InventoryError::Empty(_) => ErrorKind::Parse,
        }
    }
}

/// Device profile errors.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Unknown platform name
    #[error("Unknown platform: {name}")]
    UnknownPlatform { name: String },

    /// Platform already registered
    #[error("Platform '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// Invalid profile definition
    #[error("Invalid platform definition: {message}")]
    InvalidDefinition { message: String },
}

/// Artifact writer and summarizer errors.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Writing an artifact file failed
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The summarization service call failed
    #[error("Summarizer request failed: {0}")]
    Summarizer(#[from] reqwest::Error),

    /// The summarization service answered without usable content
    #[error("Summarizer returned no content")]
    EmptySummary,

    /// Summarizer API key variable is unset
    #[error("Environment variable {0} is not set")]
    MissingApiKey(String),
}

impl ArtifactError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArtifactError::Write { .. } => ErrorKind::Io,
            ArtifactError::Summarizer(_) | ArtifactError::EmptySummary => ErrorKind::Protocol,
            ArtifactError::MissingApiKey(_) => ErrorKind::Parse,
        }
    }
}

/// Result type alias using fleetscrape's Error.
pub type Result<T> = std::result::Result<T, Error>;

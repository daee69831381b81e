//! SSH transport implementation using russh.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::PublicKey;
use russh::{Channel, ChannelMsg};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;

use super::config::{AuthMethod, HostKeyVerification, SshConfig, SshOptions};
use crate::channel::{Connector, SessionChannel};
use crate::device::Device;
use crate::error::{ChannelError, Result, TransportError};

/// Upper bound on bytes gathered by one `receive_available` call.
const MAX_READ: usize = 65535;

/// Authenticated SSH connection wrapping a russh client handle.
pub struct SshTransport {
    session: Handle<SshHandler>,
    config: SshConfig,
}

impl SshTransport {
    /// Connect to the SSH server and authenticate.
    ///
    /// TCP connect, handshake and authentication share one
    /// `config.options.timeout` budget.
    pub async fn connect(config: SshConfig) -> Result<Self> {
        let timeout = config.options.timeout;
        tokio::time::timeout(timeout, Self::connect_inner(config))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }

    async fn connect_inner(config: SshConfig) -> Result<Self> {
        let port = config.options.port;
        let stream = TcpStream::connect((config.host.as_str(), port))
            .await
            .map_err(|source| TransportError::ConnectionFailed {
                host: config.host.clone(),
                port,
                source,
            })?;

        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(300)),
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));
        let handler = SshHandler {
            host: config.host.clone(),
            port,
            host_key_verification: config.options.host_key_verification.clone(),
            known_hosts_path: config.options.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        let mut session = client::connect_stream(ssh_config, stream, handler)
            .await
            .map_err(|e| {
                // Prefer the detailed host-key error over russh's generic one.
                let stored = host_key_error.lock().ok().and_then(|mut slot| slot.take());
                stored.unwrap_or(TransportError::Ssh(e))
            })?;

        Self::authenticate(&mut session, &config).await?;

        Ok(Self { session, config })
    }

    /// Open a PTY with an interactive shell on this connection.
    pub async fn open_shell(&self) -> Result<Channel<Msg>> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_pty(
                true,
                "xterm",
                self.config.options.terminal_width,
                self.config.options.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| TransportError::ShellRequestFailed(e.to_string()))?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| TransportError::ShellRequestFailed(e.to_string()))?;

        Ok(channel)
    }

    async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
        let success = match &config.auth {
            AuthMethod::None => session
                .authenticate_none(&config.username)
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::Password(password) => session
                .authenticate_password(&config.username, password.expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success(),
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
            }
            .into());
        }

        Ok(())
    }

    /// Whether the underlying russh session has shut down.
    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Close the connection.
    pub async fn close(self) -> Result<()> {
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

/// An interactive shell session on one device.
pub struct SshSession {
    address: String,
    transport: Option<SshTransport>,
    channel: Option<Channel<Msg>>,
    remote_closed: bool,
}

impl SshSession {
    /// Connect, authenticate and start a shell.
    pub async fn open(config: SshConfig) -> Result<Self> {
        let address = config.socket_addr();
        let transport = SshTransport::connect(config).await?;

        let channel = match transport.open_shell().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    debug!("{}: disconnect after shell failure: {}", address, close_err);
                }
                return Err(e);
            }
        };

        Ok(Self {
            address,
            transport: Some(transport),
            channel: Some(channel),
            remote_closed: false,
        })
    }
}

/// What one channel message contributes to a read.
enum Received {
    Data,
    Ignored,
    Closed,
}

fn absorb(msg: Option<ChannelMsg>, out: &mut BytesMut) -> Received {
    match msg {
        Some(ChannelMsg::Data { data }) => {
            out.extend_from_slice(&data);
            Received::Data
        }
        Some(ChannelMsg::ExtendedData { data, .. }) => {
            out.extend_from_slice(&data);
            Received::Data
        }
        Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => Received::Closed,
        Some(_) => Received::Ignored,
    }
}

impl SessionChannel for SshSession {
    async fn send(&mut self, text: &str) -> Result<()> {
        if self.transport.as_ref().is_some_and(|t| t.is_closed()) {
            return Err(TransportError::Disconnected.into());
        }
        let channel = self.channel.as_ref().ok_or(ChannelError::NotOpen)?;
        channel
            .data(text.as_bytes())
            .await
            .map_err(|e| ChannelError::BrokenPipe {
                address: self.address.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn receive_available(&mut self, max_wait: Duration) -> Result<Bytes> {
        if self.remote_closed {
            return Err(ChannelError::Closed.into());
        }
        let channel = self.channel.as_mut().ok_or(ChannelError::NotOpen)?;

        let mut out = BytesMut::new();
        let first = match tokio::time::timeout(max_wait, channel.wait()).await {
            Ok(msg) => msg,
            Err(_) => return Ok(Bytes::new()),
        };
        if let Received::Closed = absorb(first, &mut out) {
            self.remote_closed = true;
        }

        // Drain whatever is already queued, without waiting further.
        while !self.remote_closed && out.len() < MAX_READ {
            match tokio::time::timeout(Duration::ZERO, channel.wait()).await {
                Ok(msg) => {
                    if let Received::Closed = absorb(msg, &mut out) {
                        self.remote_closed = true;
                    }
                }
                Err(_) => break,
            }
        }

        if out.is_empty() && self.remote_closed {
            return Err(ChannelError::Closed.into());
        }
        Ok(out.freeze())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.eof().await {
                debug!("{}: eof on close: {}", self.address, e);
            }
            if let Err(e) = channel.close().await {
                debug!("{}: channel close: {}", self.address, e);
            }
        }
        if let Some(transport) = self.transport.take() {
            if !transport.is_closed() {
                transport.close().await?;
            }
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.remote_closed
            && self.channel.is_some()
            && self.transport.as_ref().is_some_and(|t| !t.is_closed())
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if self.transport.is_some() {
            warn!("SshSession for {} dropped without close()", self.address);
        }
    }
}

/// Opens password-authenticated shells with shared [`SshOptions`].
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }
}

impl Connector for SshConnector {
    type Session = SshSession;

    async fn open(&self, device: &Device) -> Result<SshSession> {
        SshSession::open(SshConfig::for_device(device, self.options.clone())).await
    }
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Detailed host-key error for connect() to surface.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// `Ok(true)` if matched, `Ok(false)` if the host is not recorded.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::check_known_hosts(&self.host, self.port, pubkey)
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey)
        };

        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, err: TransportError) -> bool {
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(err);
        }
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key for {}: {}", self.host, e);
                    }
                    Ok(true)
                }
                Err(e) => Ok(self.reject(e)),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => Ok(self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                })),
                Err(e) => Ok(self.reject(e)),
            },
        }
    }
}

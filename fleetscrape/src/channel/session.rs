//! Raw session primitives: the seam between the runner and the transport.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use crate::device::Device;
use crate::error::Result;

/// One interactive shell on one device.
///
/// A session is exclusively owned by one runner; nothing here is shared
/// between tasks.
pub trait SessionChannel: Send {
    /// Write text to the shell exactly as given.
    ///
    /// Fails with a broken-pipe error if the shell is gone.
    fn send(&mut self, text: &str) -> impl Future<Output = Result<()>> + Send;

    /// Wait up to `max_wait` for output and return what is available.
    ///
    /// Returns as soon as any data arrives; an empty buffer means nothing
    /// arrived within `max_wait`.
    fn receive_available(
        &mut self,
        max_wait: Duration,
    ) -> impl Future<Output = Result<Bytes>> + Send;

    /// Tear the session down. Calling it again is a no-op.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Whether the session is still usable.
    fn is_alive(&self) -> bool;
}

/// Opens sessions to devices.
pub trait Connector: Send + Sync + 'static {
    /// The session type this connector produces.
    type Session: SessionChannel + 'static;

    /// Establish and authenticate a shell session to `device`.
    fn open(&self, device: &Device) -> impl Future<Output = Result<Self::Session>> + Send;
}

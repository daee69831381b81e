//! Status events emitted while a fleet run progresses.

use std::fmt;

use log::{Level, log};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::result::{Failure, RunOutcome};

/// Something a collaborator may want to render: console, file or telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    /// A worker is opening its session.
    Connecting { address: String },

    /// The session is open and authenticated.
    Connected { address: String },

    /// Opening the session failed.
    ConnectFailed { address: String, failure: Failure },

    /// The identity probe named the device.
    IdentityDiscovered { address: String, identity: String },

    /// The identity probe found nothing; the address labels the artifacts.
    IdentityMissing { address: String },

    /// A command ran out of budget and its output is partial.
    CommandTimedOut { address: String, command: String },

    /// The worker is done and its session is closed.
    Finished { address: String, outcome: RunOutcome },
}

impl FleetEvent {
    /// Log level matching the event's severity.
    pub fn level(&self) -> Level {
        match self {
            FleetEvent::Connecting { .. } => Level::Debug,
            FleetEvent::Connected { .. } | FleetEvent::IdentityDiscovered { .. } => Level::Info,
            FleetEvent::Finished { outcome, .. } if outcome.is_completed() => Level::Info,
            _ => Level::Warn,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            FleetEvent::Connecting { address }
            | FleetEvent::Connected { address }
            | FleetEvent::ConnectFailed { address, .. }
            | FleetEvent::IdentityDiscovered { address, .. }
            | FleetEvent::IdentityMissing { address }
            | FleetEvent::CommandTimedOut { address, .. }
            | FleetEvent::Finished { address, .. } => address,
        }
    }
}

impl fmt::Display for FleetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FleetEvent::Connecting { address } => write!(f, "{}: connecting", address),
            FleetEvent::Connected { address } => write!(f, "{}: connected", address),
            FleetEvent::ConnectFailed { address, failure } => {
                write!(f, "{}: connect failed ({})", address, failure)
            }
            FleetEvent::IdentityDiscovered { address, identity } => {
                write!(f, "{}: identified as {}", address, identity)
            }
            FleetEvent::IdentityMissing { address } => {
                write!(f, "{}: no identity found, using address", address)
            }
            FleetEvent::CommandTimedOut { address, command } => {
                write!(f, "{}: '{}' timed out, output is partial", address, command)
            }
            FleetEvent::Finished { address, outcome } => write!(f, "{}: {}", address, outcome),
        }
    }
}

/// Where workers deliver their events.
///
/// Every event is logged; it is also forwarded when a receiver is attached.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<FleetEvent>>,
}

impl EventSink {
    /// A sink that only logs.
    pub fn log_only() -> Self {
        Self::default()
    }

    /// A sink forwarding to `tx`.
    pub fn new(tx: UnboundedSender<FleetEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A forwarding sink and the receiver for its events.
    pub fn channel() -> (Self, UnboundedReceiver<FleetEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: FleetEvent) {
        log!(event.level(), "{}", event);
        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is listening anymore.
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_levels() {
        let connecting = FleetEvent::Connecting {
            address: "10.0.0.1".into(),
        };
        assert_eq!(connecting.level(), Level::Debug);

        let failed = FleetEvent::Finished {
            address: "10.0.0.1".into(),
            outcome: RunOutcome::Failed(Failure {
                kind: ErrorKind::Auth,
                message: "rejected".into(),
            }),
        };
        assert_eq!(failed.level(), Level::Warn);

        let done = FleetEvent::Finished {
            address: "10.0.0.1".into(),
            outcome: RunOutcome::Completed,
        };
        assert_eq!(done.level(), Level::Info);
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(FleetEvent::Connected {
            address: "10.0.0.2".into(),
        });
        let event = rx.try_recv().unwrap();
        assert_eq!(event.address(), "10.0.0.2");
        assert_eq!(event.to_string(), "10.0.0.2: connected");
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(FleetEvent::IdentityMissing {
            address: "10.0.0.3".into(),
        });
        EventSink::log_only().emit(FleetEvent::IdentityMissing {
            address: "10.0.0.3".into(),
        });
    }
}

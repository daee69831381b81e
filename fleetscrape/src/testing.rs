//! Scripted sessions and connectors for tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use crate::channel::{Connector, SessionChannel};
use crate::device::{Credentials, Device};
use crate::error::{ChannelError, Result, TransportError};

/// One timed piece of scripted output.
#[derive(Debug, Clone)]
pub(crate) struct ScriptChunk {
    delay: Duration,
    data: Bytes,
}

/// `text` arrives `delay_ms` after the previous chunk.
pub(crate) fn chunk(delay_ms: u64, text: &str) -> ScriptChunk {
    ScriptChunk {
        delay: Duration::from_millis(delay_ms),
        data: Bytes::copy_from_slice(text.as_bytes()),
    }
}

pub(crate) fn device(address: &str) -> Device {
    Device::new(address, Arc::new(Credentials::new("admin", "secret")))
}

/// Counts sessions as they open and every `close` call made on them.
#[derive(Debug, Default)]
pub(crate) struct OpenTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    closes_by_address: Mutex<HashMap<String, usize>>,
}

impl OpenTracker {
    fn opened(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn close_called(&self, address: &str, was_open: bool) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        *self
            .closes_by_address
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default() += 1;
        if was_open {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// `close` calls made on the session opened for `address`.
    pub(crate) fn closes_for(&self, address: &str) -> usize {
        self.closes_by_address
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn currently_open(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}

/// A fake shell that answers known commands with timed chunks.
pub(crate) struct ScriptedSession {
    replies: HashMap<String, Vec<ScriptChunk>>,
    fallback_prompt: Option<String>,
    pending: VecDeque<ScriptChunk>,
    sent: Arc<Mutex<Vec<String>>>,
    close_calls: Arc<AtomicUsize>,
    tracker: Option<(String, Arc<OpenTracker>)>,
    hangup_after: Option<usize>,
    panic_on: Option<String>,
    open: bool,
}

impl ScriptedSession {
    pub(crate) fn new() -> Self {
        Self {
            replies: HashMap::new(),
            fallback_prompt: None,
            pending: VecDeque::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            close_calls: Arc::new(AtomicUsize::new(0)),
            tracker: None,
            hangup_after: None,
            panic_on: None,
            open: true,
        }
    }

    /// Output waiting before anything is sent, e.g. a login banner.
    pub(crate) fn banner(mut self, chunks: Vec<ScriptChunk>) -> Self {
        self.pending.extend(chunks);
        self
    }

    pub(crate) fn reply(mut self, command: &str, chunks: Vec<ScriptChunk>) -> Self {
        self.replies.insert(command.to_string(), chunks);
        self
    }

    /// Answer unknown commands with their echo followed by `prompt`.
    pub(crate) fn echo_with_prompt(mut self, prompt: &str) -> Self {
        self.fallback_prompt = Some(prompt.to_string());
        self
    }

    /// Pretend the remote drops the connection after `sends` writes.
    pub(crate) fn hangup_after(mut self, sends: usize) -> Self {
        self.hangup_after = Some(sends);
        self
    }

    /// Panic inside `send` when `command` is written.
    pub(crate) fn panic_on(mut self, command: &str) -> Self {
        self.panic_on = Some(command.to_string());
        self
    }

    pub(crate) fn sent_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.sent.clone()
    }

    pub(crate) fn close_calls(&self) -> Arc<AtomicUsize> {
        self.close_calls.clone()
    }

    fn tracked(mut self, address: &str, tracker: Arc<OpenTracker>) -> Self {
        tracker.opened();
        self.tracker = Some((address.to_string(), tracker));
        self
    }
}

impl SessionChannel for ScriptedSession {
    async fn send(&mut self, text: &str) -> Result<()> {
        if !self.open {
            return Err(ChannelError::NotOpen.into());
        }

        let mut sent = self.sent.lock().unwrap();
        if self.hangup_after.is_some_and(|n| sent.len() >= n) {
            return Err(ChannelError::BrokenPipe {
                address: "scripted".into(),
                message: "connection reset by peer".into(),
            }
            .into());
        }

        let command = text.trim_end_matches(['\r', '\n']).to_string();
        sent.push(command.clone());
        drop(sent);
        if self.panic_on.as_deref() == Some(command.as_str()) {
            panic!("scripted fault on {:?}", command);
        }

        if let Some(chunks) = self.replies.get(&command) {
            self.pending.extend(chunks.iter().cloned());
        } else if let Some(prompt) = &self.fallback_prompt {
            self.pending
                .push_back(chunk(10, &format!("{}\r\n{}", command, prompt)));
        }
        Ok(())
    }

    async fn receive_available(&mut self, max_wait: Duration) -> Result<Bytes> {
        if !self.open {
            return Err(ChannelError::NotOpen.into());
        }

        let Some(next) = self.pending.front_mut() else {
            tokio::time::sleep(max_wait).await;
            return Ok(Bytes::new());
        };

        if next.delay <= max_wait {
            let delay = next.delay;
            tokio::time::sleep(delay).await;
            Ok(self.pending.pop_front().map(|c| c.data).unwrap_or_default())
        } else {
            next.delay -= max_wait;
            tokio::time::sleep(max_wait).await;
            Ok(Bytes::new())
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let was_open = self.open;
        self.open = false;
        if let Some((address, tracker)) = &self.tracker {
            tracker.close_called(address, was_open);
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.open
    }
}

/// What a [`ScriptedConnector`] does for one address.
pub(crate) enum Behaviour {
    Refuse,
    RejectAuth,
    Script(Box<dyn Fn() -> ScriptedSession + Send + Sync>),
}

/// Connector that hands out scripted sessions per address.
pub(crate) struct ScriptedConnector {
    behaviours: HashMap<String, Behaviour>,
    open_delay: Duration,
    tracker: Arc<OpenTracker>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Self {
        Self {
            behaviours: HashMap::new(),
            open_delay: Duration::from_millis(20),
            tracker: Arc::new(OpenTracker::default()),
        }
    }

    pub(crate) fn with(mut self, address: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(address.to_string(), behaviour);
        self
    }

    pub(crate) fn script<F>(self, address: &str, make: F) -> Self
    where
        F: Fn() -> ScriptedSession + Send + Sync + 'static,
    {
        self.with(address, Behaviour::Script(Box::new(make)))
    }

    pub(crate) fn tracker(&self) -> Arc<OpenTracker> {
        self.tracker.clone()
    }
}

impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    async fn open(&self, device: &Device) -> Result<ScriptedSession> {
        tokio::time::sleep(self.open_delay).await;

        match self.behaviours.get(device.address()) {
            Some(Behaviour::Script(make)) => {
                Ok(make().tracked(device.address(), self.tracker.clone()))
            }
            Some(Behaviour::RejectAuth) => Err(TransportError::AuthenticationFailed {
                user: device.credentials().username.clone(),
            }
            .into()),
            Some(Behaviour::Refuse) | None => Err(TransportError::ConnectionFailed {
                host: device.address().to_string(),
                port: 22,
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }
            .into()),
        }
    }
}

/// A well-behaved IOS-like switch named `name`.
pub(crate) fn switch(name: &str) -> ScriptedSession {
    let prompt = format!("{}#", name);
    ScriptedSession::new()
        .banner(vec![chunk(10, &format!("\r\n{}", prompt))])
        .reply(
            "show running-config | include hostname",
            vec![chunk(
                20,
                &format!(
                    "show running-config | include hostname\r\nhostname {}\r\n{}",
                    name, prompt
                ),
            )],
        )
        .echo_with_prompt(&prompt)
}

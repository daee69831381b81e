//! Completion detection for prompt-delimited shell output.
//!
//! The shell protocol has no framing, so "the device has finished" is
//! inferred from the text. Two policies cover the commands we run:
//!
//! - [`CompletionPolicy::Strict`]: done once the whole accumulated output
//!   ends in the terminator. Used for bounded one-shot commands. A line
//!   inside the output that happens to end in `#` or `>` (a banner, a
//!   config comment) still stops the read early.
//! - [`CompletionPolicy::HeuristicBounded`]: done once the newest chunk
//!   brings the output to a prompt the grammar accepts and enough bytes
//!   have arrived, or when the wall-clock budget runs out. Used for
//!   streaming output such as logs.
//!
//! Either way a read never outlives its budget: running out of time yields
//! [`DetectorState::TimedOut`] with the partial text, not an error.
//!
//! When the command echo is known ([`PromptDetector::expect_echo`]) no
//! prompt counts until the echo has been seen, and whatever arrived before
//! it (the late tail of a timed-out command) is dropped from the result.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::buffer::PatternBuffer;
use super::patterns::PromptGrammar;
use super::session::SessionChannel;
use crate::error::{Result, RunnerError};

/// Tunables for the streaming heuristic.
///
/// Neither threshold is authoritative: short logs that end early never
/// reach `min_bytes`, chatty ones can run into the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingHeuristic {
    /// Hard wall-clock budget.
    pub timeout: Duration,

    /// Minimum accumulated bytes before a prompt counts as completion.
    pub min_bytes: usize,
}

impl Default for StreamingHeuristic {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            min_bytes: 100,
        }
    }
}

/// How a read decides it is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Read until the entire output ends in the terminator.
    Strict { timeout: Duration },

    /// Read until a prompt past the byte threshold, or the timeout.
    HeuristicBounded(StreamingHeuristic),
}

impl CompletionPolicy {
    /// Wall-clock budget for one read.
    pub fn timeout(&self) -> Duration {
        match self {
            CompletionPolicy::Strict { timeout } => *timeout,
            CompletionPolicy::HeuristicBounded(h) => h.timeout,
        }
    }

    /// Same policy with a different budget.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match self {
            CompletionPolicy::Strict { .. } => CompletionPolicy::Strict { timeout },
            CompletionPolicy::HeuristicBounded(h) => {
                CompletionPolicy::HeuristicBounded(StreamingHeuristic { timeout, ..h })
            }
        }
    }
}

/// Poll interval growth while the device is silent.
///
/// The interval starts at `initial`, doubles on every empty poll up to
/// `max`, and snaps back to `initial` as soon as data arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(25),
            max: Duration::from_millis(500),
        }
    }
}

/// Lifecycle of one command read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Sending,
    Accumulating,
    Complete,
    TimedOut,
}

impl DetectorState {
    /// Whether this is `Complete` or `TimedOut`.
    pub fn is_terminal(self) -> bool {
        matches!(self, DetectorState::Complete | DetectorState::TimedOut)
    }
}

/// Outcome of one completed read.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Everything accumulated, ANSI-stripped.
    pub text: String,

    /// `Complete` or `TimedOut`.
    pub state: DetectorState,

    /// Final line of the output when complete (the prompt), else empty.
    pub prompt: String,

    /// Time spent reading.
    pub elapsed: Duration,
}

impl Detection {
    pub fn is_complete(&self) -> bool {
        self.state == DetectorState::Complete
    }
}

/// Incremental prompt detector for one session.
pub struct PromptDetector {
    grammar: Arc<dyn PromptGrammar>,
    buffer: PatternBuffer,
    state: DetectorState,
    backoff: PollBackoff,
    echo: Option<Vec<u8>>,
    /// Offset just past the echo, once seen.
    echo_end: Option<usize>,
}

impl PromptDetector {
    /// Create a detector using `grammar`, searching `search_depth` tail bytes.
    pub fn new(grammar: Arc<dyn PromptGrammar>, search_depth: usize, backoff: PollBackoff) -> Self {
        Self {
            grammar,
            buffer: PatternBuffer::new(search_depth),
            state: DetectorState::Idle,
            backoff,
            echo: None,
            echo_end: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Start a new read: clears the buffer and enters `Sending`.
    pub fn begin(&mut self) {
        self.buffer.clear();
        self.echo = None;
        self.echo_end = None;
        self.state = DetectorState::Sending;
    }

    /// Require `command` to be echoed before a prompt ends this read.
    ///
    /// An empty command (a bare newline) has no echo to wait for.
    pub fn expect_echo(&mut self, command: &str) {
        let command = command.trim();
        self.echo = (!command.is_empty()).then(|| command.as_bytes().to_vec());
        self.echo_end = None;
    }

    /// Whether the echo has arrived, searching from `new_from` onwards.
    fn echo_seen(&mut self, new_from: usize) -> bool {
        let Some(echo) = &self.echo else {
            return true;
        };
        if self.echo_end.is_some() {
            return true;
        }

        let from = new_from.saturating_sub(echo.len());
        match memchr::memmem::find(&self.buffer.as_slice()[from..], echo) {
            Some(pos) => {
                self.echo_end = Some(from + pos + echo.len());
                true
            }
            None => false,
        }
    }

    /// The command has been written; enter `Accumulating`.
    pub fn mark_sent(&mut self) {
        self.state = DetectorState::Accumulating;
    }

    /// Feed one incoming chunk and report whether the read is complete.
    pub fn feed(&mut self, chunk: &[u8], policy: &CompletionPolicy) -> bool {
        if self.state != DetectorState::Accumulating {
            return self.state == DetectorState::Complete;
        }

        let range = self.buffer.extend(chunk);
        if !self.echo_seen(range.start) {
            return false;
        }

        // The prompt must come after the echo.
        let end = self.buffer.as_slice().trim_ascii_end().len();
        if end <= self.echo_end.unwrap_or(0) {
            return false;
        }

        let complete = match policy {
            CompletionPolicy::Strict { .. } => {
                self.grammar.is_terminated(self.buffer.trimmed_tail())
            }
            CompletionPolicy::HeuristicBounded(heuristic) => {
                // The prompt must end inside the chunk just received.
                self.buffer.len() >= heuristic.min_bytes
                    && end > range.start
                    && self.grammar.is_terminated(self.buffer.trimmed_tail())
            }
        };

        if complete {
            self.state = DetectorState::Complete;
        }
        complete
    }

    /// Give up on the current read.
    pub fn mark_timed_out(&mut self) {
        if !self.state.is_terminal() {
            self.state = DetectorState::TimedOut;
        }
    }

    /// Drain the buffer into a [`Detection`] and return to `Idle`.
    pub fn finish(&mut self, elapsed: Duration) -> Detection {
        let state = if self.state == DetectorState::Complete {
            DetectorState::Complete
        } else {
            DetectorState::TimedOut
        };

        let prompt = if state == DetectorState::Complete {
            String::from_utf8_lossy(self.buffer.last_line()).into_owned()
        } else {
            String::new()
        };
        let mut bytes = self.buffer.take();
        if let (Some(echo), Some(echo_end)) = (&self.echo, self.echo_end) {
            let stale = echo_end - echo.len();
            if stale > 0 {
                debug!("dropping {} bytes received before the command echo", stale);
                bytes.drain(..stale);
            }
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.buffer.clear();
        self.echo = None;
        self.echo_end = None;
        self.state = DetectorState::Idle;

        Detection {
            text,
            state,
            prompt,
            elapsed,
        }
    }

    /// Read from `session` until `policy` declares the output complete.
    ///
    /// Call [`begin`](Self::begin) and [`mark_sent`](Self::mark_sent) first;
    /// a detector still `Idle` is moved straight to `Accumulating`. Returns
    /// within the policy timeout plus one poll interval. Cancellation is
    /// the only way this returns an error besides transport failures.
    pub async fn read_until_complete<S: SessionChannel>(
        &mut self,
        session: &mut S,
        policy: &CompletionPolicy,
        cancel: &CancellationToken,
    ) -> Result<Detection> {
        if matches!(self.state, DetectorState::Idle | DetectorState::Sending) {
            if self.state == DetectorState::Idle {
                self.buffer.clear();
            }
            self.state = DetectorState::Accumulating;
        }

        let start = Instant::now();
        let deadline = start + policy.timeout();
        let mut interval = self.backoff.initial;

        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!(
                    "read timed out after {:?} with {} bytes",
                    policy.timeout(),
                    self.buffer.len()
                );
                self.mark_timed_out();
                return Ok(self.finish(start.elapsed()));
            }

            let wait = interval.min(deadline - now);
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.mark_timed_out();
                    self.finish(start.elapsed());
                    return Err(RunnerError::Cancelled.into());
                }
                chunk = session.receive_available(wait) => chunk?,
            };

            if chunk.is_empty() {
                interval = (interval * 2).min(self.backoff.max);
                continue;
            }

            interval = self.backoff.initial;
            trace!("read chunk: {} bytes, total {}", chunk.len(), self.buffer.len());

            if self.feed(&chunk, policy) {
                return Ok(self.finish(start.elapsed()));
            }
        }
    }
}

impl std::fmt::Debug for PromptDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptDetector")
            .field("buffer", &self.buffer)
            .field("state", &self.state)
            .field("backoff", &self.backoff)
            .finish()
    }
}

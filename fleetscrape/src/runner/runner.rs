//! Sequential command execution on one session.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::command::{CommandClass, CommandSpec};
use super::identity::{IdentityProbe, parse_marked_identity};
use super::output::{CapturedOutput, CompletionStatus};
use crate::channel::{
    CompletionPolicy, DetectorState, PollBackoff, PromptDetector, SessionChannel,
    StreamingHeuristic,
};
use crate::device::Device;
use crate::error::{ChannelError, Error, Result, RunnerError};
use crate::platform::DeviceProfile;

/// Timeouts and detector tunables shared by every runner in a run.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Budget for lookup and one-shot commands.
    pub command_timeout: Duration,

    /// Budget for the login banner to reach the first prompt.
    pub login_timeout: Duration,

    /// Policy for streaming commands.
    pub streaming: StreamingHeuristic,

    /// Tail bytes searched for the terminator.
    pub search_depth: usize,

    /// Poll interval growth while waiting.
    pub backoff: PollBackoff,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            login_timeout: Duration::from_secs(10),
            streaming: StreamingHeuristic::default(),
            search_depth: 1000,
            backoff: PollBackoff::default(),
        }
    }
}

impl RunnerSettings {
    /// Completion policy for `spec`, honoring its timeout override.
    pub fn policy_for(&self, spec: &CommandSpec) -> CompletionPolicy {
        let policy = match spec.class {
            CommandClass::Lookup | CommandClass::OneShot => CompletionPolicy::Strict {
                timeout: self.command_timeout,
            },
            CommandClass::Streaming => CompletionPolicy::HeuristicBounded(self.streaming),
        };
        match spec.timeout {
            Some(timeout) => policy.with_timeout(timeout),
            None => policy,
        }
    }
}

/// Outputs of a command sequence, plus the error that cut it short.
#[derive(Debug)]
pub struct RunnerOutput {
    /// One entry per command attempted, in submission order.
    pub outputs: Vec<CapturedOutput>,

    /// Set when a transport failure or cancellation stopped the sequence.
    pub error: Option<Error>,
}

/// Runs commands one at a time on a session it borrows exclusively.
///
/// The shell has no request IDs, so only one command is ever in flight.
#[derive(Debug)]
pub struct CommandRunner {
    device: Device,
    profile: Arc<DeviceProfile>,
    settings: Arc<RunnerSettings>,
    detector: PromptDetector,
}

impl CommandRunner {
    pub fn new(device: Device, profile: Arc<DeviceProfile>, settings: Arc<RunnerSettings>) -> Self {
        let detector = PromptDetector::new(
            profile.grammar.clone(),
            settings.search_depth,
            settings.backoff,
        );
        Self {
            device,
            profile,
            settings,
            detector,
        }
    }

    /// Drain the login banner until the first prompt.
    ///
    /// Running out of `login_timeout` is tolerated; late banner text lands
    /// before the next command's echo and is dropped from its output.
    pub async fn settle<S: SessionChannel>(
        &mut self,
        session: &mut S,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let policy = CompletionPolicy::Strict {
            timeout: self.settings.login_timeout,
        };
        let detection = self
            .detector
            .read_until_complete(session, &policy, cancel)
            .await?;

        if detection.is_complete() {
            debug!("{}: initial prompt {:?}", self.device, detection.prompt);
        } else {
            warn!(
                "{}: no prompt within {:?} of login, continuing",
                self.device, policy.timeout()
            );
        }
        Ok(())
    }

    /// Send one command and capture its output.
    pub async fn execute<S: SessionChannel>(
        &mut self,
        session: &mut S,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CapturedOutput> {
        let policy = self.settings.policy_for(spec);
        let start = Instant::now();

        self.detector.begin();
        self.detector.expect_echo(&spec.command);
        debug!("{}: sending {:?}", self.device, spec.command);
        if let Err(e) = session.send(&format!("{}\n", spec.command)).await {
            self.detector.finish(start.elapsed());
            return Err(e);
        }
        self.detector.mark_sent();

        let detection = self
            .detector
            .read_until_complete(session, &policy, cancel)
            .await?;

        let status = match detection.state {
            DetectorState::Complete => CompletionStatus::Complete,
            _ => CompletionStatus::TimedOut,
        };
        if status == CompletionStatus::TimedOut {
            warn!(
                "{}: '{}' did not complete within {:?} ({} bytes kept)",
                self.device,
                spec.command,
                policy.timeout(),
                detection.text.len()
            );
        }

        let result = self.profile.normalize_output(&detection.text, &spec.command);
        let failure_message = self.profile.detect_failure(&result).map(str::to_string);
        if let Some(ref pattern) = failure_message {
            debug!("{}: '{}' matched failure {:?}", self.device, spec.command, pattern);
        }

        Ok(CapturedOutput {
            device: self.device.clone(),
            spec: spec.clone(),
            raw: detection.text,
            result,
            prompt: detection.prompt.trim().to_string(),
            status,
            elapsed: start.elapsed(),
            failure_message,
        })
    }

    /// Run the identity probe and extract the device's name.
    ///
    /// Fails with [`RunnerError::IdentityNotFound`] when the output has no
    /// usable name; callers treat that as non-fatal.
    pub async fn discover_identity<S: SessionChannel>(
        &mut self,
        session: &mut S,
        probe: &IdentityProbe,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let spec = CommandSpec::lookup(probe.command_text());
        let output = self.execute(session, &spec, cancel).await?;

        let identity = match probe {
            IdentityProbe::Command { marker, .. } => parse_marked_identity(&output.raw, marker),
            IdentityProbe::Prompt if output.status == CompletionStatus::Complete => {
                let name = self.profile.grammar.prompt_name(&output.prompt);
                (!name.is_empty()).then(|| name.to_string())
            }
            IdentityProbe::Prompt => None,
        };

        identity.ok_or_else(|| {
            let (command, marker) = match probe {
                IdentityProbe::Command { command, marker } => (command.clone(), marker.clone()),
                IdentityProbe::Prompt => ("<empty line>".to_string(), "prompt".to_string()),
            };
            RunnerError::IdentityNotFound { command, marker }.into()
        })
    }

    /// Execute `commands` in order.
    ///
    /// A transport failure, a dead session or cancellation records an
    /// errored output for the command in flight and stops the sequence;
    /// timed-out commands do not stop it.
    pub async fn run<S: SessionChannel>(
        &mut self,
        session: &mut S,
        commands: &[CommandSpec],
        cancel: &CancellationToken,
    ) -> RunnerOutput {
        let mut outputs = Vec::with_capacity(commands.len());

        for spec in commands {
            if cancel.is_cancelled() {
                return RunnerOutput {
                    outputs,
                    error: Some(RunnerError::Cancelled.into()),
                };
            }

            let start = Instant::now();
            let executed = if session.is_alive() {
                self.execute(session, spec, cancel).await
            } else {
                Err(ChannelError::Closed.into())
            };
            match executed {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    warn!("{}: '{}' failed: {}", self.device, spec.command, e);
                    outputs.push(CapturedOutput::errored(
                        self.device.clone(),
                        spec.clone(),
                        e.kind(),
                        start.elapsed(),
                    ));
                    return RunnerOutput {
                        outputs,
                        error: Some(e),
                    };
                }
            }
        }

        RunnerOutput {
            outputs,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::error::ErrorKind;
    use crate::platform::vendors::cisco_ios;
    use crate::testing::{ScriptedSession, chunk, device, switch};

    fn runner() -> CommandRunner {
        CommandRunner::new(
            device("10.0.0.1"),
            Arc::new(cisco_ios::profile().unwrap()),
            Arc::new(RunnerSettings {
                command_timeout: Duration::from_secs(5),
                ..Default::default()
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovers_hostname() {
        let mut session = ScriptedSession::new().reply(
            "show running-config | include hostname",
            vec![chunk(
                30,
                "show running-config | include hostname\r\nhostname Lab-SW1\r\nLab-SW1#",
            )],
        );
        let mut runner = runner();
        let cancel = CancellationToken::new();

        let identity = runner
            .discover_identity(&mut session, &IdentityProbe::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(identity, "Lab-SW1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_from_prompt() {
        let mut session = ScriptedSession::new().reply("", vec![chunk(10, "\r\nAccess-07#")]);
        let mut runner = runner();

        let identity = runner
            .discover_identity(&mut session, &IdentityProbe::Prompt, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(identity, "Access-07");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_identity_does_not_block_commands() {
        let mut session = ScriptedSession::new()
            .reply(
                "show running-config | include hostname",
                vec![chunk(20, "show running-config | include hostname\r\nSW#")],
            )
            .echo_with_prompt("SW#");
        let mut runner = runner();
        let cancel = CancellationToken::new();

        let err = runner
            .discover_identity(&mut session, &IdentityProbe::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentityNotFound);

        let run = runner
            .run(
                &mut session,
                &[CommandSpec::one_shot("show clock")],
                &cancel,
            )
            .await;
        assert!(run.error.is_none());
        assert_eq!(run.outputs.len(), 1);
        assert!(run.outputs[0].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_run_in_order() {
        let mut session = switch("Lab-SW1");
        let sent = session.sent_log();
        let mut runner = runner();
        let cancel = CancellationToken::new();
        runner.settle(&mut session, &cancel).await.unwrap();

        let commands = [
            CommandSpec::one_shot("terminal length 0"),
            CommandSpec::one_shot("show version"),
            CommandSpec::one_shot("show inventory"),
        ];
        let run = runner.run(&mut session, &commands, &cancel).await;

        assert!(run.error.is_none());
        let order: Vec<_> = run.outputs.iter().map(|o| o.spec.command.as_str()).collect();
        assert_eq!(order, ["terminal length 0", "show version", "show inventory"]);
        assert_eq!(
            *sent.lock().unwrap(),
            ["terminal length 0", "show version", "show inventory"]
        );
        assert!(run.outputs.iter().all(|o| o.prompt == "Lab-SW1#"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_command_keeps_partial_output() {
        let mut session = ScriptedSession::new()
            .reply(
                "show running-config",
                vec![chunk(10, "show running-config\r\nBuilding configuration...\r\n")],
            )
            .echo_with_prompt("Lab-SW1#");
        let mut runner = runner();
        let cancel = CancellationToken::new();

        let commands = [
            CommandSpec::one_shot("show running-config").with_timeout(Duration::from_secs(2)),
            CommandSpec::one_shot("show clock"),
        ];
        let run = runner.run(&mut session, &commands, &cancel).await;

        assert!(run.error.is_none());
        assert_eq!(run.outputs[0].status, CompletionStatus::TimedOut);
        assert!(run.outputs[0].raw.contains("Building configuration"));
        assert_eq!(run.outputs[1].status, CompletionStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_tail_is_not_attributed_to_next_command() {
        let mut session = ScriptedSession::new()
            .reply(
                "show running-config",
                vec![
                    chunk(10, "show running-config\r\nBuilding configuration...\r\n"),
                    chunk(3000, "hostname Lab-SW1\r\nend\r\nLab-SW1#"),
                ],
            )
            .echo_with_prompt("Lab-SW1#");
        let mut runner = runner();
        let cancel = CancellationToken::new();

        let commands = [
            CommandSpec::one_shot("show running-config").with_timeout(Duration::from_secs(2)),
            CommandSpec::one_shot("show clock"),
        ];
        let run = runner.run(&mut session, &commands, &cancel).await;

        assert!(run.error.is_none());
        assert_eq!(run.outputs[0].status, CompletionStatus::TimedOut);
        let clock = &run.outputs[1];
        assert_eq!(clock.status, CompletionStatus::Complete);
        assert_eq!(clock.raw, "show clock\r\nLab-SW1#");
        assert!(!clock.raw.contains("hostname"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_session_stops_before_sending() {
        let mut session = switch("Lab-SW1");
        let sent = session.sent_log();
        session.close().await.unwrap();
        let mut runner = runner();

        let run = runner
            .run(
                &mut session,
                &[CommandSpec::one_shot("show version"), CommandSpec::one_shot("show clock")],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(run.outputs.len(), 1);
        assert_eq!(run.outputs[0].status, CompletionStatus::Error(ErrorKind::Protocol));
        assert!(run.error.is_some());
        assert!(sent.lock().unwrap().is_empty());
        // Closing belongs to the session's owner, not the runner.
        assert_eq!(session.close_calls().load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_pattern_is_flagged() {
        let mut session = ScriptedSession::new().reply(
            "show bogus",
            vec![chunk(
                10,
                "show bogus\r\n          ^\r\n% Invalid input detected at '^' marker.\r\nLab-SW1#",
            )],
        );
        let mut runner = runner();

        let output = runner
            .execute(
                &mut session,
                &CommandSpec::one_shot("show bogus"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output.status, CompletionStatus::Complete);
        assert_eq!(output.failure_message.as_deref(), Some("% Invalid input"));
        assert!(!output.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_pipe_stops_sequence() {
        let mut session = switch("Lab-SW1").hangup_after(1);
        let mut runner = runner();
        let cancel = CancellationToken::new();

        let commands = [
            CommandSpec::one_shot("show version"),
            CommandSpec::one_shot("show inventory"),
            CommandSpec::one_shot("show clock"),
        ];
        let run = runner.run(&mut session, &commands, &cancel).await;

        assert_eq!(run.outputs.len(), 2);
        assert_eq!(run.outputs[1].status, CompletionStatus::Error(ErrorKind::Io));
        assert_eq!(run.error.unwrap().kind(), ErrorKind::Io);
    }

    #[test]
    fn test_policy_for_classes() {
        let settings = RunnerSettings::default();
        assert!(matches!(
            settings.policy_for(&CommandSpec::one_shot("show version")),
            CompletionPolicy::Strict { timeout } if timeout == Duration::from_secs(30)
        ));
        assert!(matches!(
            settings.policy_for(&CommandSpec::streaming("show log")),
            CompletionPolicy::HeuristicBounded(_)
        ));
        let policy = settings
            .policy_for(&CommandSpec::streaming("show log").with_timeout(Duration::from_secs(4)));
        assert_eq!(policy.timeout(), Duration::from_secs(4));
    }
}

//! Bounded concurrent execution of a workflow across devices.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::events::{EventSink, FleetEvent};
use super::result::{Failure, FleetReport, RunOutcome, RunResult};
use crate::channel::{Connector, SessionChannel};
use crate::device::Device;
use crate::error::{Error, ErrorKind, RunnerError};
use crate::platform::DeviceProfile;
use crate::runner::{CommandRunner, RunnerSettings, Workflow};

/// Runs one isolated worker per device, at most `concurrency` at a time.
///
/// A worker's failure is recorded in its own [`RunResult`] and never
/// reaches its siblings. Every session that opens is closed before its
/// worker returns.
pub struct FleetDispatcher<C: Connector> {
    connector: Arc<C>,
    profile: Arc<DeviceProfile>,
    settings: Arc<RunnerSettings>,
    deadline: Option<Duration>,
    cancel: CancellationToken,
    events: EventSink,
}

impl<C: Connector> FleetDispatcher<C> {
    pub fn new(connector: C, profile: Arc<DeviceProfile>, settings: Arc<RunnerSettings>) -> Self {
        Self {
            connector: Arc::new(connector),
            profile,
            settings,
            deadline: None,
            cancel: CancellationToken::new(),
            events: EventSink::log_only(),
        }
    }

    /// Cancel every worker once `deadline` has passed since `run_all` began.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Use an externally controlled cancellation token (e.g. Ctrl-C).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Deliver status events to `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Token that cancels this dispatcher's runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `workflow` on every device and collect one result per device.
    ///
    /// `concurrency` defaults to the number of devices. Duplicate addresses
    /// are run once. The report is in completion order.
    pub async fn run_all(
        &self,
        devices: &[Device],
        workflow: &Workflow,
        concurrency: Option<usize>,
    ) -> FleetReport {
        let limit = concurrency.unwrap_or(devices.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let cancel = self.cancel.child_token();
        let workflow = Arc::new(workflow.clone());

        let deadline_guard = self.deadline.map(|deadline| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!("fleet deadline of {:?} reached, cancelling", deadline);
                cancel.cancel();
            })
        });

        info!(
            "dispatching {} device(s), concurrency {}",
            devices.len(),
            limit
        );

        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, Device> = HashMap::new();
        let mut seen = HashSet::new();

        for device in devices {
            if !seen.insert(device.address()) {
                warn!("{}: listed more than once, running it once", device);
                continue;
            }

            let worker = Worker {
                connector: self.connector.clone(),
                profile: self.profile.clone(),
                settings: self.settings.clone(),
                workflow: workflow.clone(),
                events: self.events.clone(),
                cancel: cancel.clone(),
                device: device.clone(),
            };
            let semaphore = semaphore.clone();

            let handle = tasks.spawn(async move {
                let queued = Instant::now();
                let permit = tokio::select! {
                    biased;
                    _ = worker.cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                match permit {
                    Some(_permit) => worker.run().await,
                    None => worker.cancelled_before_start(queued.elapsed()),
                }
            });
            in_flight.insert(handle.id(), device.clone());
        }

        let mut report = FleetReport::with_capacity(in_flight.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    in_flight.remove(&id);
                    report.insert(result);
                }
                Err(e) => {
                    let Some(device) = in_flight.remove(&e.id()) else {
                        continue;
                    };
                    warn!("{}: worker aborted: {}", device, e);
                    let failure = Failure {
                        kind: ErrorKind::Protocol,
                        message: format!("worker aborted: {}", e),
                    };
                    self.events.emit(FleetEvent::Finished {
                        address: device.address().to_string(),
                        outcome: RunOutcome::Failed(failure.clone()),
                    });
                    report.insert(RunResult::with_outcome(
                        device,
                        RunOutcome::Failed(failure),
                        Duration::ZERO,
                    ));
                }
            }
        }

        if let Some(guard) = deadline_guard {
            guard.abort();
        }

        info!("fleet run finished: {}", report.summary());
        report
    }
}

/// Everything one device's task needs, owned.
struct Worker<C: Connector> {
    connector: Arc<C>,
    profile: Arc<DeviceProfile>,
    settings: Arc<RunnerSettings>,
    workflow: Arc<Workflow>,
    events: EventSink,
    cancel: CancellationToken,
    device: Device,
}

impl<C: Connector> Worker<C> {
    fn address(&self) -> String {
        self.device.address().to_string()
    }

    fn cancelled_before_start(&self, elapsed: Duration) -> RunResult {
        debug!("{}: cancelled before a slot was free", self.device);
        self.finished(RunResult::with_outcome(
            self.device.clone(),
            RunOutcome::Cancelled,
            elapsed,
        ))
    }

    fn finished(&self, result: RunResult) -> RunResult {
        self.events.emit(FleetEvent::Finished {
            address: self.address(),
            outcome: result.outcome.clone(),
        });
        result
    }

    async fn run(self) -> RunResult {
        let start = Instant::now();
        if self.cancel.is_cancelled() {
            return self.cancelled_before_start(start.elapsed());
        }

        self.events.emit(FleetEvent::Connecting {
            address: self.address(),
        });
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            opened = self.connector.open(&self.device) => Some(opened),
        };

        let session = match opened {
            None => return self.cancelled_before_start(start.elapsed()),
            Some(Err(e)) => {
                let failure = Failure::from(&e);
                self.events.emit(FleetEvent::ConnectFailed {
                    address: self.address(),
                    failure: failure.clone(),
                });
                return self.finished(RunResult::with_outcome(
                    self.device.clone(),
                    RunOutcome::Failed(failure),
                    start.elapsed(),
                ));
            }
            Some(Ok(session)) => session,
        };
        self.events.emit(FleetEvent::Connected {
            address: self.address(),
        });

        let mut guard = SessionGuard::new(self.device.clone(), session);
        let mut result = match guard.session() {
            Some(session) => self.drive(session).await,
            None => RunResult::new(self.device.clone()),
        };
        guard.close().await;

        result.elapsed = start.elapsed();
        self.finished(result)
    }

    /// Settle, identify and run the commands. Never closes the session.
    async fn drive(&self, session: &mut C::Session) -> RunResult {
        let mut runner = CommandRunner::new(
            self.device.clone(),
            self.profile.clone(),
            self.settings.clone(),
        );
        let mut result = RunResult::new(self.device.clone());

        if let Err(e) = runner.settle(session, &self.cancel).await {
            result.outcome = RunOutcome::from_error(&e);
            return result;
        }

        if let Some(probe) = self.workflow.identity_probe(&self.profile) {
            match runner.discover_identity(session, probe, &self.cancel).await {
                Ok(identity) => {
                    self.events.emit(FleetEvent::IdentityDiscovered {
                        address: self.address(),
                        identity: identity.clone(),
                    });
                    result.identity = Some(identity);
                }
                Err(e) if e.kind() == ErrorKind::IdentityNotFound => {
                    self.events.emit(FleetEvent::IdentityMissing {
                        address: self.address(),
                    });
                    result.warnings.push(Failure::from(&e));
                }
                Err(e) => {
                    result.outcome = RunOutcome::from_error(&e);
                    return result;
                }
            }
        }

        let run = runner
            .run(session, &self.workflow.commands, &self.cancel)
            .await;

        for output in run.outputs.iter().filter(|o| o.timed_out()) {
            self.events.emit(FleetEvent::CommandTimedOut {
                address: self.address(),
                command: output.spec.command.clone(),
            });
            let timeout = self.settings.policy_for(&output.spec).timeout();
            result.warnings.push(Failure::from(&Error::from(
                RunnerError::CommandTimeout {
                    command: output.spec.command.clone(),
                    timeout,
                },
            )));
        }

        result.outputs = run.outputs;
        if let Some(e) = run.error {
            result.outcome = RunOutcome::from_error(&e);
        }
        result
    }
}

/// Owns an open session until it is closed.
///
/// If the worker unwinds first, the drop spawns the close onto the runtime.
struct SessionGuard<S: SessionChannel + 'static> {
    device: Device,
    session: Option<S>,
}

impl<S: SessionChannel + 'static> SessionGuard<S> {
    fn new(device: Device, session: S) -> Self {
        Self {
            device,
            session: Some(session),
        }
    }

    fn session(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!("{}: error closing session: {}", self.device, e);
            }
        }
    }
}

impl<S: SessionChannel + 'static> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        warn!("{}: worker ended without closing, closing now", self.device);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let device = self.device.clone();
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!("{}: error closing session: {}", device, e);
                    }
                });
            }
            Err(_) => warn!("{}: no runtime left to close the session", self.device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::vendors::cisco_ios;
    use crate::runner::CompletionStatus;
    use crate::testing::{Behaviour, ScriptedConnector, ScriptedSession, chunk, device, switch};

    fn dispatcher(connector: ScriptedConnector) -> FleetDispatcher<ScriptedConnector> {
        FleetDispatcher::new(
            connector,
            Arc::new(cisco_ios::profile().unwrap()),
            Arc::new(RunnerSettings {
                command_timeout: Duration::from_secs(5),
                login_timeout: Duration::from_secs(2),
                ..Default::default()
            }),
        )
    }

    fn devices(addresses: &[&str]) -> Vec<Device> {
        addresses.iter().map(|a| device(a)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_refused_device_among_three() {
        let connector = ScriptedConnector::new()
            .script("10.0.0.1", || switch("Lab-SW1"))
            .with("10.0.0.2", Behaviour::Refuse)
            .script("10.0.0.3", || switch("Lab-SW3"));
        let tracker = connector.tracker();
        let fleet = devices(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);

        let report = dispatcher(connector)
            .run_all(&fleet, &Workflow::config_backup(), None)
            .await;

        assert_eq!(report.len(), 3);
        assert_eq!(report.summary().completed, 2);
        let refused = report.find("10.0.0.2").unwrap();
        assert_eq!(refused.outcome.error_kind(), Some(ErrorKind::Connect));
        assert!(refused.outputs.is_empty());

        let sw1 = report.find("10.0.0.1").unwrap();
        assert_eq!(sw1.label(), "Lab-SW1");
        assert_eq!(sw1.outputs.len(), 5);
        assert!(sw1.outputs.iter().all(|o| o.status == CompletionStatus::Complete));

        assert_eq!(tracker.open_count(), 2);
        assert_eq!(tracker.close_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_bounds_open_sessions() {
        let addresses = ["10.0.1.1", "10.0.1.2", "10.0.1.3", "10.0.1.4", "10.0.1.5"];
        let mut connector = ScriptedConnector::new();
        for address in addresses {
            connector = connector.script(address, || switch("Access"));
        }
        let tracker = connector.tracker();

        let report = dispatcher(connector)
            .run_all(&devices(&addresses), &Workflow::config_backup(), Some(2))
            .await;

        assert_eq!(report.len(), 5);
        assert_eq!(report.summary().completed, 5);
        assert_eq!(tracker.peak(), 2);
        assert_eq!(tracker.open_count(), 5);
        assert_eq!(tracker.close_count(), 5);
        assert_eq!(tracker.currently_open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_isolated() {
        let connector = ScriptedConnector::new()
            .with("10.0.2.1", Behaviour::RejectAuth)
            .script("10.0.2.2", || switch("Core-SW2"));

        let report = dispatcher(connector)
            .run_all(
                &devices(&["10.0.2.1", "10.0.2.2"]),
                &Workflow::config_backup(),
                Some(1),
            )
            .await;

        assert_eq!(
            report.find("10.0.2.1").unwrap().outcome.error_kind(),
            Some(ErrorKind::Auth)
        );
        assert!(report.find("10.0.2.2").unwrap().outcome.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_identity_still_captures() {
        let connector = ScriptedConnector::new().script("10.0.3.1", || {
            ScriptedSession::new()
                .banner(vec![chunk(10, "\r\nSW#")])
                .reply(
                    "show running-config | include hostname",
                    vec![chunk(10, "show running-config | include hostname\r\nSW#")],
                )
                .echo_with_prompt("SW#")
        });

        let report = dispatcher(connector)
            .run_all(&devices(&["10.0.3.1"]), &Workflow::config_backup(), None)
            .await;

        let result = report.find("10.0.3.1").unwrap();
        assert!(result.outcome.is_completed());
        assert_eq!(result.label(), "10.0.3.1");
        assert_eq!(result.outputs.len(), 5);
        assert_eq!(result.warnings[0].kind, ErrorKind::IdentityNotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_session_closed_exactly_once() {
        let connector = ScriptedConnector::new()
            .script("10.0.8.1", || switch("Lab-SW1"))
            .script("10.0.8.2", || {
                switch("Slow")
                    .reply("show version", vec![chunk(10, "show version\r\nCisco IOS ")])
            })
            .script("10.0.8.3", || switch("Gone").hangup_after(2))
            .script("10.0.8.4", || {
                ScriptedSession::new()
                    .banner(vec![chunk(10, "\r\nSW#")])
                    .echo_with_prompt("SW#")
            });
        let tracker = connector.tracker();
        let addresses = ["10.0.8.1", "10.0.8.2", "10.0.8.3", "10.0.8.4"];

        let report = dispatcher(connector)
            .run_all(&devices(&addresses), &Workflow::config_backup(), None)
            .await;

        let slow = report.find("10.0.8.2").unwrap();
        assert!(slow.outputs.iter().any(|o| o.timed_out()));
        let gone = report.find("10.0.8.3").unwrap();
        assert_eq!(gone.outcome.error_kind(), Some(ErrorKind::Io));
        assert_eq!(report.find("10.0.8.4").unwrap().label(), "10.0.8.4");

        for address in addresses {
            assert_eq!(tracker.closes_for(address), 1, "{}", address);
        }
        assert_eq!(tracker.currently_open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_after_open_still_closes() {
        let connector = ScriptedConnector::new()
            .script("10.0.9.1", || switch("Lab-SW1").panic_on("show version"));
        let tracker = connector.tracker();

        let report = dispatcher(connector)
            .run_all(&devices(&["10.0.9.1"]), &Workflow::config_backup(), None)
            .await;
        // The close runs on its own task.
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(
            report.find("10.0.9.1").unwrap().outcome,
            RunOutcome::Failed(_)
        ));
        assert_eq!(tracker.closes_for("10.0.9.1"), 1);
        assert_eq!(tracker.currently_open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_probe_comes_from_profile() {
        let connector = ScriptedConnector::new().script("10.0.10.1", || {
            ScriptedSession::new()
                .banner(vec![chunk(10, "\r\nEdge-7>")])
                .echo_with_prompt("Edge-7>")
        });
        let fleet = FleetDispatcher::new(
            connector,
            Arc::new(crate::platform::vendors::generic::profile()),
            Arc::new(RunnerSettings::default()),
        );

        let report = fleet
            .run_all(&devices(&["10.0.10.1"]), &Workflow::config_backup(), None)
            .await;

        let result = report.find("10.0.10.1").unwrap();
        assert_eq!(result.label(), "Edge-7");
        assert!(result.warnings.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_and_closes() {
        let slow = || {
            switch("Slow")
                .reply("show version", vec![chunk(10, "show version\r\nCisco IOS ")])
        };
        let connector = ScriptedConnector::new()
            .script("10.0.4.1", slow)
            .script("10.0.4.2", slow)
            .script("10.0.4.3", slow);
        let tracker = connector.tracker();

        let start = Instant::now();
        let report = dispatcher(connector)
            .with_deadline(Duration::from_secs(1))
            .run_all(
                &devices(&["10.0.4.1", "10.0.4.2", "10.0.4.3"]),
                &Workflow::config_backup(),
                Some(2),
            )
            .await;

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(report.len(), 3);
        assert_eq!(report.summary().cancelled, 3);
        assert_eq!(tracker.open_count(), tracker.close_count());
        assert_eq!(tracker.currently_open(), 0);
        for address in ["10.0.4.1", "10.0.4.2", "10.0.4.3"] {
            assert!(tracker.closes_for(address) <= 1, "{}", address);
        }

        let first = report.iter().find(|r| !r.outputs.is_empty()).unwrap();
        let last = first.outputs.last().unwrap();
        assert_eq!(last.spec.command, "show version");
        assert_eq!(last.status, CompletionStatus::Error(ErrorKind::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_worker_is_recorded() {
        let connector = ScriptedConnector::new()
            .script("10.0.5.1", || -> ScriptedSession { panic!("scripted connector fault") })
            .script("10.0.5.2", || switch("Edge-1"));

        let report = dispatcher(connector)
            .run_all(
                &devices(&["10.0.5.1", "10.0.5.2"]),
                &Workflow::config_backup(),
                None,
            )
            .await;

        assert_eq!(report.len(), 2);
        assert!(matches!(
            report.find("10.0.5.1").unwrap().outcome,
            RunOutcome::Failed(_)
        ));
        assert!(report.find("10.0.5.2").unwrap().outcome.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_and_duplicates() {
        let connector = ScriptedConnector::new()
            .script("10.0.6.1", || switch("Lab-SW1"))
            .with("10.0.6.2", Behaviour::Refuse);
        let (sink, mut rx) = EventSink::channel();

        let report = dispatcher(connector)
            .with_events(sink)
            .run_all(
                &devices(&["10.0.6.1", "10.0.6.2", "10.0.6.1"]),
                &Workflow::config_backup(),
                None,
            )
            .await;
        assert_eq!(report.len(), 2);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let connecting = events
            .iter()
            .filter(|e| matches!(e, FleetEvent::Connecting { .. }))
            .count();
        assert_eq!(connecting, 2);
        assert!(events.iter().any(|e| matches!(
            e,
            FleetEvent::IdentityDiscovered { identity, .. } if identity == "Lab-SW1"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            FleetEvent::ConnectFailed { failure, .. } if failure.kind == ErrorKind::Connect
        )));
        let finished = events
            .iter()
            .filter(|e| matches!(e, FleetEvent::Finished { .. }))
            .count();
        assert_eq!(finished, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancellation_before_start() {
        let connector = ScriptedConnector::new().script("10.0.7.1", || switch("Lab-SW1"));
        let tracker = connector.tracker();
        let fleet = dispatcher(connector);
        fleet.cancellation_token().cancel();

        let report = fleet
            .run_all(&devices(&["10.0.7.1"]), &Workflow::config_backup(), None)
            .await;

        assert_eq!(report.summary().cancelled, 1);
        assert_eq!(tracker.open_count(), 0);
    }
}

//! Relay supervisor: owns the endpoint session and the pipeline tasks.
//!
//! [`VoiceRelay::join`] builds the per-relay queues, spawns the supervisor
//! task, and returns once the session is open. The supervisor starts the
//! sequencer first so inbound audio is validated while the session opens,
//! then the uplink and downlink. On leave it cancels every child, waits for
//! each one with a bounded timeout, aborts stragglers, and closes the
//! session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use vox_relay_core::config::RelayConfig;
use vox_relay_providers::{LiveSession, SessionConnector, SessionError, SessionOptions};

use crate::downlink::DownlinkTask;
use crate::egress::EgressAdapter;
use crate::ingress::IngressAdapter;
use crate::sequencer::Sequencer;
use crate::stats::{RelayStats, StatsSnapshot};
use crate::uplink::UplinkTask;

/// Lifecycle of one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    Idle,
    Connecting,
    Active,
    Draining,
    Closed,
}

/// How a child task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskExit {
    /// Stopped on its own after cancellation.
    Cancelled,
    /// Did not stop within the shutdown timeout and was killed.
    Aborted,
    Panicked,
    NotStarted,
}

/// What teardown observed for each child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    pub sequencer: TaskExit,
    pub uplink: TaskExit,
    pub downlink: TaskExit,
    /// The session was opened and closed without error.
    pub session_closed: bool,
    pub stats: StatsSnapshot,
}

impl RelayReport {
    /// Every started child stopped cooperatively.
    pub fn is_clean(&self) -> bool {
        [self.sequencer, self.uplink, self.downlink]
            .iter()
            .all(|exit| matches!(exit, TaskExit::Cancelled | TaskExit::NotStarted))
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    /// The endpoint session could not be opened.
    #[error("could not join voice endpoint: {source}")]
    Connect {
        source: SessionError,
        report: RelayReport,
    },

    /// The relay was cancelled before the session opened.
    #[error("relay cancelled before the session opened")]
    Cancelled { report: RelayReport },

    #[error("relay supervisor failed: {0}")]
    Supervisor(String),
}

impl RelayError {
    pub fn report(&self) -> Option<&RelayReport> {
        match self {
            Self::Connect { report, .. } | Self::Cancelled { report } => Some(report),
            Self::Supervisor(_) => None,
        }
    }
}

/// Join handles of the pipeline tasks. Only the supervisor cancels them;
/// dropping the set aborts any that are still running.
#[derive(Default)]
struct TaskSet {
    sequencer: Option<JoinHandle<()>>,
    uplink: Option<JoinHandle<()>>,
    downlink: Option<JoinHandle<()>>,
}

impl TaskSet {
    /// Wait for every child in turn. Call after cancelling their token.
    async fn shutdown(&mut self, timeout: Duration) -> (TaskExit, TaskExit, TaskExit) {
        let sequencer = await_child("sequencer", self.sequencer.take(), timeout).await;
        let uplink = await_child("uplink", self.uplink.take(), timeout).await;
        let downlink = await_child("downlink", self.downlink.take(), timeout).await;
        (sequencer, uplink, downlink)
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        for handle in [&self.sequencer, &self.uplink, &self.downlink]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

async fn await_child(
    name: &'static str,
    handle: Option<JoinHandle<()>>,
    timeout: Duration,
) -> TaskExit {
    let Some(mut handle) = handle else {
        return TaskExit::NotStarted;
    };

    let started = Instant::now();
    let exit = match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => TaskExit::Cancelled,
        Ok(Err(e)) if e.is_panic() => {
            error!(task = name, "Relay task panicked");
            TaskExit::Panicked
        }
        Ok(Err(_)) => TaskExit::Aborted,
        Err(_) => {
            warn!(task = name, ?timeout, "Relay task did not stop in time, aborting");
            handle.abort();
            let _ = handle.await;
            TaskExit::Aborted
        }
    };

    #[cfg(feature = "metrics")]
    crate::metrics::record_task_shutdown(name, started.elapsed().as_secs_f64());
    debug!(task = name, ?exit, elapsed = ?started.elapsed(), "Relay task finished");
    exit
}

/// Entry point for opening a relay.
pub struct VoiceRelay;

impl VoiceRelay {
    /// Open a session through `connector` and start relaying.
    ///
    /// Returns once the session is open and all three tasks are running.
    /// The relay runs until [`RelayHandle::leave`] is called, the handle is
    /// dropped, or `parent` is cancelled.
    pub async fn join(
        connector: Arc<dyn SessionConnector>,
        options: SessionOptions,
        config: RelayConfig,
        parent: &CancellationToken,
    ) -> Result<RelayHandle, RelayError> {
        let stats = Arc::new(RelayStats::new());
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (sequenced_tx, sequenced_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RelayState::Idle);
        let (ready_tx, ready_rx) = oneshot::channel();

        let ingress = Arc::new(IngressAdapter::new(raw_tx, stats.clone()));
        let egress = Arc::new(EgressAdapter::new(
            playback_rx,
            config.playback_frame_bytes,
            stats.clone(),
        ));

        let cancel = parent.child_token();
        let supervisor = Supervisor {
            connector,
            options,
            sequencer: Sequencer::new(config.frame_alignment, raw_rx, sequenced_tx, stats.clone()),
            sequenced_rx,
            playback_tx,
            config,
            stats: stats.clone(),
            state: state_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(supervisor.run(ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => Ok(RelayHandle {
                ingress,
                egress,
                state: state_rx,
                stats,
                supervisor: task,
                cancel: cancel.drop_guard(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let reason = match task.await {
                    Err(e) if e.is_panic() => "supervisor panicked".to_string(),
                    Err(e) => e.to_string(),
                    Ok(_) => "supervisor exited without signalling readiness".to_string(),
                };
                Err(RelayError::Supervisor(reason))
            }
        }
    }
}

struct Supervisor {
    connector: Arc<dyn SessionConnector>,
    options: SessionOptions,
    sequencer: Sequencer,
    sequenced_rx: mpsc::UnboundedReceiver<Bytes>,
    playback_tx: mpsc::UnboundedSender<Bytes>,
    config: RelayConfig,
    stats: Arc<RelayStats>,
    state: watch::Sender<RelayState>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self, ready: oneshot::Sender<Result<(), RelayError>>) -> RelayReport {
        let Self {
            connector,
            options,
            sequencer,
            sequenced_rx,
            playback_tx,
            config,
            stats,
            state,
            cancel,
        } = self;
        let timeout = config.task_shutdown_timeout();
        let mut tasks = TaskSet::default();

        state.send_replace(RelayState::Connecting);
        tasks.sequencer = Some(tokio::spawn(sequencer.run(cancel.clone())));

        info!(
            provider = connector.id(),
            model = %options.model,
            voice = %options.voice,
            "Opening endpoint session"
        );
        let connected = tokio::select! {
            _ = cancel.cancelled() => None,
            result = connector.connect(&options) => Some(result),
        };

        let session = match connected {
            Some(Ok(session)) => session,
            failed => {
                cancel.cancel();
                let (sequencer, uplink, downlink) = tasks.shutdown(timeout).await;
                state.send_replace(RelayState::Closed);
                let report = RelayReport {
                    sequencer,
                    uplink,
                    downlink,
                    session_closed: false,
                    stats: stats.snapshot(),
                };
                let err = match failed {
                    Some(Err(source)) => {
                        warn!(%source, kind = source.kind(), "Could not open endpoint session");
                        RelayError::Connect {
                            source,
                            report: report.clone(),
                        }
                    }
                    _ => {
                        debug!("Relay cancelled while connecting");
                        RelayError::Cancelled {
                            report: report.clone(),
                        }
                    }
                };
                let _ = ready.send(Err(err));
                return report;
            }
        };

        tasks.uplink = Some(tokio::spawn(
            UplinkTask::new(
                session.clone(),
                sequenced_rx,
                config.capture_format(),
                config.uplink_format(),
                stats.clone(),
            )
            .run(cancel.clone()),
        ));
        tasks.downlink = Some(tokio::spawn(
            DownlinkTask::new(
                session.clone(),
                playback_tx,
                config.endpoint_output_rate,
                config.transport_rate,
                config.playback_frame_bytes,
                config.receive_backoff(),
                stats.clone(),
            )
            .run(cancel.clone()),
        ));

        state.send_replace(RelayState::Active);
        #[cfg(feature = "metrics")]
        crate::metrics::record_session_open();
        info!(provider = connector.id(), "Relay active");

        if ready.send(Ok(())).is_err() {
            debug!("Joiner went away before the relay became active");
            cancel.cancel();
        }

        cancel.cancelled().await;

        state.send_replace(RelayState::Draining);
        info!("Relay draining");
        let (sequencer, uplink, downlink) = tasks.shutdown(timeout).await;
        let session_closed = close_session(session.as_ref(), timeout).await;

        #[cfg(feature = "metrics")]
        crate::metrics::record_session_close();
        state.send_replace(RelayState::Closed);

        let report = RelayReport {
            sequencer,
            uplink,
            downlink,
            session_closed,
            stats: stats.snapshot(),
        };
        info!(clean = report.is_clean(), "Relay closed");
        report
    }
}

async fn close_session(session: &dyn LiveSession, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, session.close()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(%e, kind = e.kind(), "Failed to close endpoint session");
            false
        }
        Err(_) => {
            warn!(?timeout, "Timed out closing endpoint session");
            false
        }
    }
}

/// Caller's view of a running relay.
///
/// Dropping the handle cancels the relay; teardown then continues in the
/// background.
pub struct RelayHandle {
    ingress: Arc<IngressAdapter>,
    egress: Arc<EgressAdapter>,
    state: watch::Receiver<RelayState>,
    stats: Arc<RelayStats>,
    supervisor: JoinHandle<RelayReport>,
    cancel: DropGuard,
}

impl RelayHandle {
    /// The transport's inbound sink.
    pub fn ingress(&self) -> Arc<IngressAdapter> {
        self.ingress.clone()
    }

    /// The transport's outbound source.
    pub fn egress(&self) -> Arc<EgressAdapter> {
        self.egress.clone()
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Watch for state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RelayState> {
        self.state.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the relay and wait for teardown to finish.
    pub async fn leave(self) -> Result<RelayReport, RelayError> {
        let Self {
            supervisor, cancel, ..
        } = self;
        cancel.disarm().cancel();
        supervisor.await.map_err(|e| {
            if e.is_panic() {
                RelayError::Supervisor("supervisor panicked during teardown".into())
            } else {
                RelayError::Supervisor(e.to_string())
            }
        })
    }
}

//! Session runtime: the single event loop that owns all client state.
//!
//! Every state transition happens on the thread that calls [`Session::run`].
//! Other threads only enqueue inputs: transport readers post channel
//! events, [`SessionHandle`] clones post consumer commands, and short-lived
//! worker threads post REST results. The retry timer is a deadline on the
//! queue's `recv_timeout`, so cancelling it is just forgetting the deadline.
//!
//! Once the loop exits, the queue is dropped with it and late worker results
//! are discarded at send time.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::decode::{DecodeFailure, Decoded, decode};
use crate::gateway::{CommandGateway, GatewayError, IssueQuery, SnapshotSource};
use crate::model::{Issue, IssueId};
use crate::reconnect::{
    ConnectionStatus, Directive, LinkState, ReconnectController, RetryState, StatusWatch,
    StopReason,
};
use crate::store::{Applied, CommandError, EditField, Reconciler};
use crate::transport::{ChannelEvent, ChannelHandle, ChannelId, ChannelSink, Transport};

// ---------------------------------------------------------------------------
// Commands and callbacks
// ---------------------------------------------------------------------------

/// A consumer intent, applied in queue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    TriggerClassification(IssueId),
    BeginEdit(IssueId),
    UpdateEdit(EditField),
    CancelEdit,
    CommitEdit,
    /// Reload the REST snapshot.
    Refresh,
    /// Manual reconnect after the controller gave up.
    Reconnect,
    Shutdown,
}

/// Which consumer action a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Classify,
    BeginEdit,
    UpdateEdit,
    CommitEdit,
    Refresh,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Classify => "classify",
            Self::BeginEdit => "begin-edit",
            Self::UpdateEdit => "update-edit",
            Self::CommitEdit => "commit-edit",
            Self::Refresh => "refresh",
        };
        f.write_str(name)
    }
}

/// Read access to the session, called on the loop thread after each change.
///
/// All methods default to no-ops.
pub trait SessionObserver {
    fn on_status(&mut self, _status: ConnectionStatus) {}

    /// The controller stopped reconnecting.
    fn on_stopped(&mut self, _reason: StopReason) {}

    fn on_snapshot(&mut self, _store: &Reconciler) {}

    /// An issue changed through a realtime event or a saved correction.
    fn on_issue_updated(&mut self, _store: &Reconciler, _issue_id: IssueId) {}

    /// The pending edit was created, changed, submitted, or cleared.
    fn on_edit_changed(&mut self, _store: &Reconciler) {}

    /// The backend accepted a classification request.
    fn on_classification_requested(&mut self, _issue_id: IssueId) {}

    fn on_decode_failure(&mut self, _raw: &str, _failure: &DecodeFailure) {}

    fn on_command_failed(&mut self, _command: CommandKind, _error: &CommandError) {}
}

/// An observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

enum Input {
    Channel(ChannelId, ChannelEvent),
    Command(Command),
    SnapshotSettled(Result<Vec<Issue>, GatewayError>),
    ClassificationSettled(IssueId, Result<(), GatewayError>),
    CorrectionSettled(IssueId, Result<Issue, GatewayError>),
}

/// Cloneable sender of consumer commands plus a status watch.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: Sender<Input>,
    status: StatusWatch,
}

impl SessionHandle {
    /// Enqueue a command. Returns `false` once the session has exited.
    pub fn send(&self, command: Command) -> bool {
        self.tx.send(Input::Command(command)).is_ok()
    }

    pub fn trigger_classification(&self, issue_id: IssueId) -> bool {
        self.send(Command::TriggerClassification(issue_id))
    }

    pub fn begin_edit(&self, issue_id: IssueId) -> bool {
        self.send(Command::BeginEdit(issue_id))
    }

    pub fn update_edit(&self, field: EditField) -> bool {
        self.send(Command::UpdateEdit(field))
    }

    pub fn cancel_edit(&self) -> bool {
        self.send(Command::CancelEdit)
    }

    pub fn commit_edit(&self) -> bool {
        self.send(Command::CommitEdit)
    }

    pub fn refresh(&self) -> bool {
        self.send(Command::Refresh)
    }

    pub fn reconnect(&self) -> bool {
        self.send(Command::Reconnect)
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    #[must_use]
    pub const fn status_watch(&self) -> &StatusWatch {
        &self.status
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Endpoints and retry policy for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ws_url: String,
    pub query: IssueQuery,
    pub retry: RetryState,
}

/// What remains once [`Session::run`] returns.
#[derive(Debug)]
pub struct SessionSummary {
    pub store: Reconciler,
    pub decode_failures: u64,
    pub channels_opened: u64,
    /// Why the link stopped before shutdown, if it did.
    pub stopped: Option<StopReason>,
}

pub struct Session<T: Transport, G> {
    config: SessionConfig,
    transport: T,
    gateway: Arc<G>,
    controller: ReconnectController,
    store: Reconciler,
    active: Option<T::Handle>,
    retry_at: Option<Instant>,
    tx: Sender<Input>,
    rx: Receiver<Input>,
    last_status: ConnectionStatus,
    decode_failures: u64,
    channels_opened: u64,
    stopped: Option<StopReason>,
}

impl<T, G> Session<T, G>
where
    T: Transport,
    G: CommandGateway + SnapshotSource + 'static,
{
    pub fn new(config: SessionConfig, transport: T, gateway: Arc<G>) -> Self {
        let (controller, _watch) = ReconnectController::new(config.retry);
        let (tx, rx) = mpsc::channel();
        let last_status = controller.status();
        Self {
            config,
            transport,
            gateway,
            controller,
            store: Reconciler::new(),
            active: None,
            retry_at: None,
            tx,
            rx,
            last_status,
            decode_failures: 0,
            channels_opened: 0,
            stopped: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.tx.clone(),
            status: self.controller.watch(),
        }
    }

    /// Load the snapshot, connect, and process inputs until shutdown.
    pub fn run<O: SessionObserver + ?Sized>(mut self, observer: &mut O) -> SessionSummary {
        info!(url = %self.config.ws_url, "session starting");
        self.spawn_snapshot();
        let directives = self.controller.activate();
        self.execute(directives, observer);

        loop {
            let next = match self.retry_at {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match self.rx.recv_timeout(wait) {
                        Ok(input) => Some(input),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.rx.recv() {
                    Ok(input) => Some(input),
                    Err(_) => break,
                },
            };

            let Some(input) = next else {
                self.retry_at = None;
                let directives = self.controller.on_retry_timer();
                self.execute(directives, observer);
                continue;
            };

            if !self.handle_input(input, observer) {
                break;
            }
        }

        let directives = self.controller.teardown();
        self.execute(directives, observer);
        self.active = None;
        info!(
            decode_failures = self.decode_failures,
            channels = self.channels_opened,
            "session stopped"
        );

        SessionSummary {
            store: self.store,
            decode_failures: self.decode_failures,
            channels_opened: self.channels_opened,
            stopped: self.stopped,
        }
    }

    /// Returns `false` when the loop should exit.
    fn handle_input<O: SessionObserver + ?Sized>(&mut self, input: Input, observer: &mut O) -> bool {
        match input {
            Input::Channel(channel, event) => {
                let closed = matches!(event, ChannelEvent::Closed { .. });
                let directives = self.controller.on_channel_event(channel, event);
                if closed && self.active.as_ref().is_some_and(|h| h.id() == channel) {
                    self.active = None;
                }
                self.execute(directives, observer);
            }
            Input::Command(Command::Shutdown) => return false,
            Input::Command(command) => self.handle_command(command, observer),
            Input::SnapshotSettled(Ok(issues)) => {
                self.store.load_snapshot(issues);
                observer.on_snapshot(&self.store);
            }
            Input::SnapshotSettled(Err(err)) => {
                warn!(error = %err, "snapshot fetch failed");
                observer.on_command_failed(CommandKind::Refresh, &CommandError::Gateway(err));
            }
            Input::ClassificationSettled(issue_id, Ok(())) => {
                debug!(issue_id, "classification requested");
                observer.on_classification_requested(issue_id);
            }
            Input::ClassificationSettled(issue_id, Err(err)) => {
                warn!(issue_id, error = %err, "classification request failed");
                observer.on_command_failed(CommandKind::Classify, &CommandError::Gateway(err));
            }
            Input::CorrectionSettled(issue_id, result) => {
                match self.store.settle_commit(issue_id, result) {
                    Ok(Some(_)) => {
                        observer.on_issue_updated(&self.store, issue_id);
                        observer.on_edit_changed(&self.store);
                    }
                    Ok(None) => observer.on_edit_changed(&self.store),
                    Err(err) => {
                        warn!(issue_id, error = %err, "correction failed");
                        observer.on_edit_changed(&self.store);
                        observer
                            .on_command_failed(CommandKind::CommitEdit, &CommandError::Gateway(err));
                    }
                }
            }
        }
        true
    }

    fn handle_command<O: SessionObserver + ?Sized>(&mut self, command: Command, observer: &mut O) {
        match command {
            Command::TriggerClassification(issue_id) => {
                let gateway = Arc::clone(&self.gateway);
                self.spawn_worker(move || {
                    Input::ClassificationSettled(issue_id, gateway.trigger_classification(issue_id))
                });
            }
            Command::BeginEdit(issue_id) => match self.store.begin_edit(issue_id) {
                Ok(_) => observer.on_edit_changed(&self.store),
                Err(err) => observer.on_command_failed(CommandKind::BeginEdit, &CommandError::Edit(err)),
            },
            Command::UpdateEdit(field) => match self.store.update_edit(field) {
                Ok(_) => observer.on_edit_changed(&self.store),
                Err(err) => observer.on_command_failed(CommandKind::UpdateEdit, &CommandError::Edit(err)),
            },
            Command::CancelEdit => {
                if self.store.cancel_edit().is_some() {
                    observer.on_edit_changed(&self.store);
                }
            }
            Command::CommitEdit => match self.store.prepare_commit() {
                Ok(correction) => {
                    observer.on_edit_changed(&self.store);
                    let gateway = Arc::clone(&self.gateway);
                    self.spawn_worker(move || {
                        let result = gateway.submit_correction(&correction);
                        Input::CorrectionSettled(correction.issue_id, result)
                    });
                }
                Err(err) => observer.on_command_failed(CommandKind::CommitEdit, &CommandError::Edit(err)),
            },
            Command::Refresh => self.spawn_snapshot(),
            Command::Reconnect => {
                let directives = self.controller.restart();
                self.execute(directives, observer);
            }
            Command::Shutdown => {}
        }
    }

    fn execute<O: SessionObserver + ?Sized>(&mut self, directives: Vec<Directive>, observer: &mut O) {
        for directive in directives {
            match directive {
                Directive::Open(channel) => {
                    let tx = self.tx.clone();
                    let sink = ChannelSink::new(channel, move |id, event| {
                        tx.send(Input::Channel(id, event)).is_ok()
                    });
                    self.channels_opened += 1;
                    self.active = Some(self.transport.open(&self.config.ws_url, sink));
                }
                Directive::Close {
                    channel,
                    code,
                    reason,
                } => {
                    if let Some(handle) = self.active.as_mut().filter(|h| h.id() == channel) {
                        handle.close(code, &reason);
                    }
                }
                Directive::ScheduleRetry(delay) => {
                    self.retry_at = Some(Instant::now() + delay);
                }
                Directive::CancelRetry => self.retry_at = None,
                Directive::Deliver(raw) => self.deliver(&raw, observer),
            }
        }
        self.publish_transitions(observer);
    }

    fn deliver<O: SessionObserver + ?Sized>(&mut self, raw: &str, observer: &mut O) {
        match decode(raw) {
            Ok(Decoded::Event(event)) => {
                if self.store.apply_event(&event) == Applied::Updated {
                    observer.on_issue_updated(&self.store, event.issue_id());
                }
            }
            Ok(Decoded::Ignored { kind }) => debug!(kind, "realtime message ignored"),
            Err(failure) => {
                self.decode_failures += 1;
                warn!(
                    code = %failure.code(),
                    error = %failure,
                    "undecodable realtime message"
                );
                observer.on_decode_failure(raw, &failure);
            }
        }
    }

    fn publish_transitions<O: SessionObserver + ?Sized>(&mut self, observer: &mut O) {
        let status = self.controller.status();
        if status != self.last_status {
            self.last_status = status;
            observer.on_status(status);
        }
        if let LinkState::Stopped(reason) = self.controller.state() {
            if reason != StopReason::Shutdown && self.stopped != Some(reason) {
                self.stopped = Some(reason);
                observer.on_stopped(reason);
            }
        } else {
            self.stopped = None;
        }
    }

    fn spawn_snapshot(&self) {
        let gateway = Arc::clone(&self.gateway);
        let query = self.config.query.clone();
        self.spawn_worker(move || Input::SnapshotSettled(gateway.fetch_issues(&query)));
    }

    fn spawn_worker(&self, work: impl FnOnce() -> Input + Send + 'static) {
        let tx = self.tx.clone();
        thread::spawn(move || {
            if tx.send(work()).is_err() {
                debug!("worker result dropped after session exit");
            }
        });
    }
}

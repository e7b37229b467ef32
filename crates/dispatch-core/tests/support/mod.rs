//! Scripted transport, in-memory backend, and a recording observer for
//! driving `Session::run` on a background thread.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dispatch_core::decode::DecodeFailure;
use dispatch_core::gateway::{
    CommandGateway, Correction, GatewayError, IssueQuery, SnapshotSource,
};
use dispatch_core::model::{Issue, IssueId};
use dispatch_core::reconnect::{ConnectionStatus, RetryState, StopReason};
use dispatch_core::session::{
    CommandKind, Session, SessionConfig, SessionHandle, SessionObserver, SessionSummary,
};
use dispatch_core::store::{CommandError, PendingEdit, Reconciler};
use dispatch_core::transport::{
    ABNORMAL_CLOSE, ChannelEvent, ChannelHandle, ChannelId, ChannelSink, Transport,
};

pub const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TransportState {
    scripts: VecDeque<Vec<ChannelEvent>>,
    fallback: Vec<ChannelEvent>,
    sinks: Vec<ChannelSink>,
    closes: Vec<(ChannelId, u16, String)>,
}

/// Each `open` replays the next queued script (or the fallback) through the
/// new channel's sink, then keeps the sink so tests can push more events.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    pub fn new(fallback: Vec<ChannelEvent>) -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().fallback = fallback;
        transport
    }

    pub fn script(&self, events: Vec<ChannelEvent>) {
        self.state.lock().unwrap().scripts.push_back(events);
    }

    pub fn opened(&self) -> Vec<ChannelId> {
        self.state
            .lock()
            .unwrap()
            .sinks
            .iter()
            .map(ChannelSink::channel)
            .collect()
    }

    pub fn closes(&self) -> Vec<(ChannelId, u16, String)> {
        self.state.lock().unwrap().closes.clone()
    }

    /// Push an event through the `index`th channel ever opened.
    pub fn emit(&self, index: usize, event: ChannelEvent) -> bool {
        let state = self.state.lock().unwrap();
        state.sinks[index].emit(event)
    }

    pub fn emit_latest(&self, event: ChannelEvent) -> bool {
        let state = self.state.lock().unwrap();
        state.sinks.last().expect("a channel was opened").emit(event)
    }
}

impl Transport for FakeTransport {
    type Handle = FakeHandle;

    fn open(&mut self, _url: &str, sink: ChannelSink) -> FakeHandle {
        let mut state = self.state.lock().unwrap();
        let queued = state.scripts.pop_front();
        let script = queued.unwrap_or_else(|| state.fallback.clone());
        for event in script {
            sink.emit(event);
        }
        let id = sink.channel();
        state.sinks.push(sink);
        FakeHandle {
            id,
            state: Arc::clone(&self.state),
        }
    }
}

pub struct FakeHandle {
    id: ChannelId,
    state: Arc<Mutex<TransportState>>,
}

impl ChannelHandle for FakeHandle {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn close(&mut self, code: u16, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.closes.push((self.id, code, reason.to_string()));
        if let Some(sink) = state.sinks.iter().find(|s| s.channel() == self.id) {
            sink.emit(ChannelEvent::Closed {
                code,
                reason: reason.to_string(),
            });
        }
    }
}

pub fn opened() -> Vec<ChannelEvent> {
    vec![ChannelEvent::Opened]
}

pub fn refused() -> Vec<ChannelEvent> {
    vec![
        ChannelEvent::Failed("connection refused".into()),
        ChannelEvent::Closed {
            code: ABNORMAL_CLOSE,
            reason: "connection failed".into(),
        },
    ]
}

pub fn dropped() -> ChannelEvent {
    ChannelEvent::Closed {
        code: ABNORMAL_CLOSE,
        reason: "connection lost".into(),
    }
}

pub fn classification_frame(issue_id: IssueId, category: &str, priority: &str) -> ChannelEvent {
    ChannelEvent::Message(format!(
        r#"{{"type":"classification_update","data":{{"issue_id":{issue_id},"category":"{category}","priority":"{priority}","confidence":0.92,"tags":["ui"],"similar_issues":[]}}}}"#
    ))
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeBackend {
    pub issues: Mutex<Vec<Issue>>,
    pub corrections: Mutex<Vec<Correction>>,
    pub classify_requests: Mutex<Vec<IssueId>>,
    pub snapshot_calls: AtomicUsize,
    pub reject_corrections: AtomicBool,
    pub reject_classify: AtomicBool,
}

impl FakeBackend {
    pub fn with_issues(issues: Vec<Issue>) -> Self {
        Self {
            issues: Mutex::new(issues),
            ..Self::default()
        }
    }
}

fn rejected(path: String) -> GatewayError {
    GatewayError::Status {
        url: format!("http://backend.test{path}"),
        status: 500,
        body: "internal error".into(),
    }
}

impl SnapshotSource for FakeBackend {
    fn fetch_issues(&self, _query: &IssueQuery) -> Result<Vec<Issue>, GatewayError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.issues.lock().unwrap().clone())
    }
}

impl CommandGateway for FakeBackend {
    fn trigger_classification(&self, issue_id: IssueId) -> Result<(), GatewayError> {
        if self.reject_classify.load(Ordering::SeqCst) {
            return Err(rejected(format!("/api/issues/{issue_id}/classify")));
        }
        self.classify_requests.lock().unwrap().push(issue_id);
        Ok(())
    }

    fn submit_correction(&self, correction: &Correction) -> Result<Issue, GatewayError> {
        if self.reject_corrections.load(Ordering::SeqCst) {
            return Err(rejected(format!(
                "/api/issues/{}/correct",
                correction.issue_id
            )));
        }
        self.corrections.lock().unwrap().push(correction.clone());
        let mut issues = self.issues.lock().unwrap();
        let issue = issues
            .iter_mut()
            .find(|issue| issue.id == correction.issue_id)
            .ok_or_else(|| GatewayError::Status {
                url: "http://backend.test/api/issues".into(),
                status: 404,
                body: "not found".into(),
            })?;
        issue.category = Some(correction.category.clone());
        issue.priority = Some(correction.priority.clone());
        issue.confidence = Some(1.0);
        issue.tags.clone_from(&correction.tags);
        issue.updated_at = "2024-05-01T12:00:00Z".into();
        Ok(issue.clone())
    }
}

pub fn sample_issues() -> Vec<Issue> {
    vec![
        Issue::new(3, 41, "Login button unresponsive", "acme/web"),
        Issue::new(5, 42, "Add dark mode", "acme/web"),
    ]
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Seen {
    Status(ConnectionStatus),
    Stopped(StopReason),
    Snapshot(usize),
    IssueUpdated(IssueId, Option<Issue>),
    Edit(Option<PendingEdit>),
    ClassificationRequested(IssueId),
    DecodeFailure(String),
    CommandFailed(CommandKind, CommandError),
}

pub struct Recorder {
    tx: Sender<Seen>,
}

impl SessionObserver for Recorder {
    fn on_status(&mut self, status: ConnectionStatus) {
        let _ = self.tx.send(Seen::Status(status));
    }

    fn on_stopped(&mut self, reason: StopReason) {
        let _ = self.tx.send(Seen::Stopped(reason));
    }

    fn on_snapshot(&mut self, store: &Reconciler) {
        let _ = self.tx.send(Seen::Snapshot(store.len()));
    }

    fn on_issue_updated(&mut self, store: &Reconciler, issue_id: IssueId) {
        let _ = self
            .tx
            .send(Seen::IssueUpdated(issue_id, store.get(issue_id).cloned()));
    }

    fn on_edit_changed(&mut self, store: &Reconciler) {
        let _ = self.tx.send(Seen::Edit(store.pending_edit().cloned()));
    }

    fn on_classification_requested(&mut self, issue_id: IssueId) {
        let _ = self.tx.send(Seen::ClassificationRequested(issue_id));
    }

    fn on_decode_failure(&mut self, raw: &str, _failure: &DecodeFailure) {
        let _ = self.tx.send(Seen::DecodeFailure(raw.to_string()));
    }

    fn on_command_failed(&mut self, command: CommandKind, error: &CommandError) {
        let _ = self.tx.send(Seen::CommandFailed(command, error.clone()));
    }
}

/// Everything the observer reported so far, with blocking lookups.
pub struct Journal {
    rx: Receiver<Seen>,
    history: Vec<Seen>,
}

impl Journal {
    /// Return the first recorded item matching `pred`, waiting if needed.
    pub fn wait_for(&mut self, what: &str, pred: impl Fn(&Seen) -> bool) -> Seen {
        if let Some(found) = self.history.iter().find(|seen| pred(seen)) {
            return found.clone();
        }
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(seen) => {
                    let hit = pred(&seen);
                    self.history.push(seen.clone());
                    if hit {
                        return seen;
                    }
                }
                Err(_) => panic!("timed out waiting for {what}; saw {:#?}", self.history),
            }
        }
    }

    /// Wait until `pred` has matched `n` recorded items.
    pub fn wait_for_nth(&mut self, what: &str, n: usize, pred: impl Fn(&Seen) -> bool) {
        let deadline = Instant::now() + WAIT;
        while self.history.iter().filter(|seen| pred(seen)).count() < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(seen) => self.history.push(seen),
                Err(_) => panic!("timed out waiting for {what} #{n}; saw {:#?}", self.history),
            }
        }
    }

    pub fn history(&self) -> &[Seen] {
        &self.history
    }

    /// Pull in anything already queued without blocking.
    pub fn drain(&mut self) -> &[Seen] {
        self.history.extend(self.rx.try_iter());
        &self.history
    }
}

pub struct Running {
    pub handle: SessionHandle,
    pub journal: Journal,
    thread: JoinHandle<SessionSummary>,
}

impl Running {
    pub fn shutdown(self) -> (SessionSummary, Journal) {
        let Self {
            handle,
            mut journal,
            thread,
        } = self;
        handle.shutdown();
        let summary = thread.join().expect("session thread");
        journal.drain();
        (summary, journal)
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryState {
    RetryState::new(max_attempts, Duration::from_millis(5))
}

pub fn start(transport: FakeTransport, backend: Arc<FakeBackend>, retry: RetryState) -> Running {
    let config = SessionConfig {
        ws_url: "ws://backend.test/ws".into(),
        query: IssueQuery::default(),
        retry,
    };
    let session = Session::new(config, transport, backend);
    let handle = session.handle();
    let (tx, rx) = mpsc::channel();
    let thread = thread::spawn(move || session.run(&mut Recorder { tx }));
    Running {
        handle,
        journal: Journal {
            rx,
            history: Vec::new(),
        },
        thread,
    }
}

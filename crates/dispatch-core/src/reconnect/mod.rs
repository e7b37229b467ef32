//! Reconnection Controller.
//!
//! A sans-IO state machine that decides when the realtime channel is opened,
//! reopened, or abandoned. It never touches a socket or a clock: each input
//! returns the [`Directive`]s the runtime must carry out.
//!
//! ```text
//! Idle ──activate──▶ Connecting ──Opened──▶ Connected
//!                        │                     │
//!                        ├──Failed──▶ Draining ◀┘ (Failed)
//!                        │               │
//!                        └────Closed─────┴──▶ Retrying ──timer──▶ Connecting
//!                                        │
//!                                        └──▶ Stopped(Intentional | RetriesExhausted)
//! ```
//!
//! Retries use a fixed delay. The attempt counter resets on every successful
//! open, so only consecutive failures count toward the ceiling. A close with
//! [`INTENTIONAL_CLOSE`] is final regardless of the remaining budget.

mod status;

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, info, warn};

pub use status::{ConnectionStatus, StatusPublisher, StatusWatch, status_channel};

use crate::transport::{ChannelEvent, ChannelId, INTENTIONAL_CLOSE};

/// Default number of consecutive reconnection attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default wait between a close and the next attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Consecutive-failure budget for reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    ceiling: u32,
    base_delay: Duration,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl RetryState {
    #[must_use]
    pub const fn new(ceiling: u32, base_delay: Duration) -> Self {
        Self {
            attempts: 0,
            ceiling,
            base_delay,
        }
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn ceiling(&self) -> u32 {
        self.ceiling
    }

    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.attempts >= self.ceiling
    }

    /// Spend one attempt, returning the delay to wait, or `None` when the
    /// budget is gone.
    fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.base_delay)
    }

    const fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Why the controller stopped connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The channel closed with the intentional close code.
    Intentional,
    /// The retry ceiling was reached.
    RetriesExhausted,
    /// The owner tore the session down.
    Shutdown,
}

impl StopReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intentional => "intentional",
            Self::RetriesExhausted => "retries-exhausted",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting(ChannelId),
    Connected(ChannelId),
    /// The live channel failed; waiting for its `Closed`.
    Draining(ChannelId),
    /// Waiting for the retry timer.
    Retrying,
    Stopped(StopReason),
}

impl LinkState {
    /// The channel whose events are currently honoured.
    #[must_use]
    pub const fn live_channel(self) -> Option<ChannelId> {
        match self {
            Self::Connecting(id) | Self::Connected(id) | Self::Draining(id) => Some(id),
            Self::Idle | Self::Retrying | Self::Stopped(_) => None,
        }
    }
}

/// An effect the runtime must perform on the controller's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Open a new channel with this id.
    Open(ChannelId),
    /// Close the given channel.
    Close {
        channel: ChannelId,
        code: u16,
        reason: String,
    },
    /// Call [`ReconnectController::on_retry_timer`] after this delay.
    ScheduleRetry(Duration),
    /// Forget any scheduled retry.
    CancelRetry,
    /// Hand a raw inbound message to the decoder.
    Deliver(String),
}

/// Owns the link state, the retry budget, and the status signal.
#[derive(Debug)]
pub struct ReconnectController {
    state: LinkState,
    retry: RetryState,
    next_channel: u64,
    status: StatusPublisher,
}

impl ReconnectController {
    /// Create an idle controller and a watch on its status.
    #[must_use]
    pub fn new(retry: RetryState) -> (Self, StatusWatch) {
        let (status, watch) = status_channel(ConnectionStatus::Disconnected);
        let controller = Self {
            state: LinkState::Idle,
            retry,
            next_channel: 1,
            status,
        };
        (controller, watch)
    }

    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.retry.attempts()
    }

    #[must_use]
    pub const fn retry(&self) -> &RetryState {
        &self.retry
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    #[must_use]
    pub fn watch(&self) -> StatusWatch {
        self.status.watch()
    }

    /// Open the first channel. Only valid from `Idle`.
    pub fn activate(&mut self) -> Vec<Directive> {
        if self.state != LinkState::Idle {
            debug!(state = ?self.state, "activate ignored");
            return Vec::new();
        }
        self.open_fresh()
    }

    /// Manual reconnect after the controller stopped. Resets the budget.
    pub fn restart(&mut self) -> Vec<Directive> {
        match self.state {
            LinkState::Idle | LinkState::Stopped(_) => {
                self.retry.reset();
                info!("manual reconnect");
                self.open_fresh()
            }
            state => {
                debug!(?state, "restart ignored while link is active");
                Vec::new()
            }
        }
    }

    /// Fold in one event from a channel.
    pub fn on_channel_event(&mut self, channel: ChannelId, event: ChannelEvent) -> Vec<Directive> {
        if self.state.live_channel() != Some(channel) {
            debug!(%channel, state = ?self.state, "event from stale channel ignored");
            return Vec::new();
        }

        match event {
            ChannelEvent::Opened => {
                if self.state == LinkState::Connecting(channel) {
                    self.state = LinkState::Connected(channel);
                    self.retry.reset();
                    self.status.publish(ConnectionStatus::Connected);
                    info!(%channel, "realtime connected");
                }
                Vec::new()
            }
            ChannelEvent::Message(raw) => {
                if self.state == LinkState::Connected(channel) {
                    vec![Directive::Deliver(raw)]
                } else {
                    debug!(%channel, "message outside connected state dropped");
                    Vec::new()
                }
            }
            ChannelEvent::Failed(info) => {
                warn!(%channel, error = %info, "realtime channel failed");
                self.state = LinkState::Draining(channel);
                self.status.publish(ConnectionStatus::Disconnected);
                Vec::new()
            }
            ChannelEvent::Closed { code, reason } => self.on_closed(channel, code, &reason),
        }
    }

    /// The scheduled retry delay has elapsed.
    pub fn on_retry_timer(&mut self) -> Vec<Directive> {
        if self.state != LinkState::Retrying {
            debug!(state = ?self.state, "stale retry timer ignored");
            return Vec::new();
        }
        self.open_fresh()
    }

    /// Stop for good: cancel any retry and close the live channel.
    pub fn teardown(&mut self) -> Vec<Directive> {
        let directives = match self.state {
            LinkState::Retrying => vec![Directive::CancelRetry],
            state => state
                .live_channel()
                .map(|channel| Directive::Close {
                    channel,
                    code: INTENTIONAL_CLOSE,
                    reason: "client shutting down".to_string(),
                })
                .into_iter()
                .collect(),
        };
        self.state = LinkState::Stopped(StopReason::Shutdown);
        self.status.publish(ConnectionStatus::Disconnected);
        directives
    }

    fn on_closed(&mut self, channel: ChannelId, code: u16, reason: &str) -> Vec<Directive> {
        self.status.publish(ConnectionStatus::Disconnected);

        if code == INTENTIONAL_CLOSE {
            info!(%channel, reason, "realtime closed intentionally");
            self.state = LinkState::Stopped(StopReason::Intentional);
            return Vec::new();
        }

        if let Some(delay) = self.retry.next_delay() {
            warn!(
                %channel,
                code,
                attempt = self.retry.attempts(),
                max = self.retry.ceiling(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "realtime closed, reconnecting"
            );
            self.state = LinkState::Retrying;
            vec![Directive::ScheduleRetry(delay)]
        } else {
            error!(
                %channel,
                code,
                attempts = self.retry.attempts(),
                "realtime retries exhausted"
            );
            self.state = LinkState::Stopped(StopReason::RetriesExhausted);
            Vec::new()
        }
    }

    fn open_fresh(&mut self) -> Vec<Directive> {
        let channel = ChannelId::new(self.next_channel);
        self.next_channel += 1;
        self.state = LinkState::Connecting(channel);
        self.status.publish(ConnectionStatus::Connecting);
        debug!(%channel, attempt = self.retry.attempts(), "opening realtime channel");
        vec![Directive::Open(channel)]
    }
}

//! Transport Channel: one realtime connection, no policy.
//!
//! A [`Transport`] opens single-use channels. Each channel reports its
//! lifecycle through a [`ChannelSink`]:
//!
//! ```text
//! Opened? -> Message* -> Failed? -> Closed
//! ```
//!
//! Every channel ends with exactly one [`ChannelEvent::Closed`], including
//! channels that never managed to open. Nothing is emitted after `Closed`.
//! Retry decisions belong to [`crate::reconnect`]; a closed handle is
//! discarded and a fresh one opened.

pub mod ws;

use std::fmt;

pub use ws::{WsError, WsTransport};

/// Close code a caller sends when it shuts a channel down on purpose.
pub const INTENTIONAL_CLOSE: u16 = 1000;

/// Close code reported when a channel ended without a close handshake.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Close code reported when the peer closed without giving a status.
pub const NO_STATUS_CLOSE: u16 = 1005;

/// Identity of one channel; never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// One lifecycle event of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(String),
    /// A socket-level failure; a `Closed` follows.
    Failed(String),
    Closed { code: u16, reason: String },
}

type Deliver = Box<dyn Fn(ChannelId, ChannelEvent) -> bool + Send + Sync>;

/// Where a channel reports its events, tagged with its [`ChannelId`].
pub struct ChannelSink {
    channel: ChannelId,
    deliver: Deliver,
}

impl ChannelSink {
    pub fn new(
        channel: ChannelId,
        deliver: impl Fn(ChannelId, ChannelEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            channel,
            deliver: Box::new(deliver),
        }
    }

    #[must_use]
    pub const fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Report an event. Returns `false` once nobody is listening.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        (self.deliver)(self.channel, event)
    }
}

impl fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// A live channel as seen by its owner.
pub trait ChannelHandle: Send {
    fn id(&self) -> ChannelId;

    /// Request a graceful close. The channel still reports `Closed`.
    fn close(&mut self, code: u16, reason: &str);
}

/// Opens realtime channels.
pub trait Transport {
    type Handle: ChannelHandle;

    /// Start connecting to `url`. Connection failures are reported through
    /// `sink` as `Failed` followed by `Closed`, never returned here.
    fn open(&mut self, url: &str, sink: ChannelSink) -> Self::Handle;
}

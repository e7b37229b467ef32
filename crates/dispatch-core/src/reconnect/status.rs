use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Realtime connection state as shown to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Shared {
    current: ConnectionStatus,
    subscribers: Vec<Sender<ConnectionStatus>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a status signal. The publisher is the only writer.
#[must_use]
pub fn status_channel(initial: ConnectionStatus) -> (StatusPublisher, StatusWatch) {
    let shared = Arc::new(Mutex::new(Shared {
        current: initial,
        subscribers: Vec::new(),
    }));
    (
        StatusPublisher {
            shared: Arc::clone(&shared),
        },
        StatusWatch { shared },
    )
}

/// Write side of the connection status. Deliberately not `Clone`.
#[derive(Debug)]
pub struct StatusPublisher {
    shared: Arc<Mutex<Shared>>,
}

impl StatusPublisher {
    /// Set the status. Subscribers hear only actual changes.
    ///
    /// Returns `true` when the value changed.
    pub fn publish(&self, status: ConnectionStatus) -> bool {
        let mut shared = lock(&self.shared);
        if shared.current == status {
            return false;
        }
        shared.current = status;
        shared.subscribers.retain(|tx| tx.send(status).is_ok());
        true
    }

    #[must_use]
    pub fn get(&self) -> ConnectionStatus {
        lock(&self.shared).current
    }

    #[must_use]
    pub fn watch(&self) -> StatusWatch {
        StatusWatch {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Read-only view of the connection status.
#[derive(Debug, Clone)]
pub struct StatusWatch {
    shared: Arc<Mutex<Shared>>,
}

impl StatusWatch {
    #[must_use]
    pub fn get(&self) -> ConnectionStatus {
        lock(&self.shared).current
    }

    /// Receive every later change. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ConnectionStatus> {
        let (tx, rx) = mpsc::channel();
        lock(&self.shared).subscribers.push(tx);
        rx
    }
}

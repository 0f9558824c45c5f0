//! Session change notifications.
//!
//! Every mutating operation publishes a `SessionEvent`. Front ends call
//! `subscribe()` and redraw from the repository when events arrive.

use tokio::sync::broadcast;
use tracing::debug;

use crate::models::SessionStatus;

/// Buffer size for the event channel.
/// Slow subscribers that fall further behind than this see `Lagged` and
/// should reload the full session list.
const EVENT_BUFFER_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Added(String),
    Updated(String),
    StatusChanged { session_id: String, status: SessionStatus },
    Removed(String),
    IntegrationSynced {
        integration_id: String,
        added: usize,
        deleted: usize,
    },
}

#[derive(Debug, Clone)]
pub struct SessionNotifier {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publishing with no subscribers is fine.
    pub fn publish(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("No session event subscribers");
        }
    }

    pub fn status_changed(&self, session_id: &str, status: SessionStatus) {
        self.publish(SessionEvent::StatusChanged {
            session_id: session_id.to_string(),
            status,
        });
    }
}

impl Default for SessionNotifier {
    fn default() -> Self {
        Self::new()
    }
}

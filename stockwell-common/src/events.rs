//! Event types for the Stockwell event system
//!
//! Provides shared event definitions and EventBus for the import service.
//! Events are broadcast via EventBus and can be serialized for SSE transmission.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Import workflow event types
///
/// All events use this central enum for type safety and exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ImportEvent {
    /// Import session created and round 1 analysis started
    SessionStarted {
        session_id: Uuid,
        filename: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An analysis round completed (clarification questions may be pending)
    AnalysisRoundCompleted {
        session_id: Uuid,
        round: u32,
        questions_pending: usize,
        overall_confidence: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session reached the reviewing gate and awaits human approval
    ReviewReady {
        session_id: Uuid,
        mapped_columns: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Rows committed to the structured store
    SessionCompleted {
        session_id: Uuid,
        created_count: usize,
        rejected_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session reached the error state
    SessionFailed {
        session_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// TTL sweep removed expired sessions
    SessionsExpired {
        removed: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ImportEvent {
    /// SSE event name for this event
    pub fn event_type(&self) -> &'static str {
        match self {
            ImportEvent::SessionStarted { .. } => "SessionStarted",
            ImportEvent::AnalysisRoundCompleted { .. } => "AnalysisRoundCompleted",
            ImportEvent::ReviewReady { .. } => "ReviewReady",
            ImportEvent::SessionCompleted { .. } => "SessionCompleted",
            ImportEvent::SessionFailed { .. } => "SessionFailed",
            ImportEvent::SessionsExpired { .. } => "SessionsExpired",
        }
    }
}

/// Broadcast bus for import events
///
/// Clone-cheap; all clones share the same underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ImportEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the number of subscribers that received the event.
    /// A send with zero subscribers is not an error; the event is dropped.
    pub fn emit(&self, event: ImportEvent) -> usize {
        match self.tx.send(event) {
            Ok(count) => count,
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let sent = bus.emit(ImportEvent::SessionsExpired {
            removed: 3,
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(sent, 1);

        match rx.recv().await.unwrap() {
            ImportEvent::SessionsExpired { removed, .. } => assert_eq!(removed, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_is_dropped() {
        let bus = EventBus::new(16);
        let sent = bus.emit(ImportEvent::SessionsExpired {
            removed: 0,
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(sent, 0);
    }
}

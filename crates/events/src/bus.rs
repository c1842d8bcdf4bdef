//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the scheduler, its
//! workers and any observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shotforge_core::types::JobId;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// What happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Queued,
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
}

impl JobEventKind {
    /// Whether no further events follow for the job.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A lifecycle or progress event for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub kind: JobEventKind,
    /// Progress percentage at the time of the event.
    pub percent: u8,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: JobId, kind: JobEventKind, percent: u8) -> Self {
        Self {
            job_id,
            kind,
            percent,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use shotforge_events::bus::{EventBus, JobEvent, JobEventKind};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(JobEvent::new(uuid::Uuid::nil(), JobEventKind::Queued, 0));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: JobEvent) {
        tracing::trace!(job_id = %event.job_id, kind = ?event.kind, percent = event.percent, "Job event");
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn progress_event_reaches_subscriber_intact() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let id = Uuid::now_v7();

        bus.publish(JobEvent::new(id, JobEventKind::Progress, 42).with_message("Processed 3 of 36 shots"));

        let event = rx.recv().await.unwrap();
        assert_eq!((event.job_id, event.kind, event.percent), (id, JobEventKind::Progress, 42));
        assert_eq!(event.message.as_deref(), Some("Processed 3 of 36 shots"));
    }

    #[tokio::test]
    async fn every_observer_sees_the_lifecycle_in_order() {
        let bus = EventBus::default();
        let mut observers = [bus.subscribe(), bus.subscribe()];
        let id = Uuid::now_v7();

        for kind in [JobEventKind::Queued, JobEventKind::Started, JobEventKind::Completed] {
            bus.publish(JobEvent::new(id, kind, 0));
        }

        for rx in &mut observers {
            let mut seen = Vec::new();
            while let Ok(event) = rx.try_recv() {
                seen.push(event.kind);
            }
            assert_eq!(
                seen,
                vec![JobEventKind::Queued, JobEventKind::Started, JobEventKind::Completed]
            );
        }
    }

    #[test]
    fn events_without_observers_are_dropped() {
        let bus = EventBus::new(4);
        bus.publish(JobEvent::new(Uuid::nil(), JobEventKind::Queued, 0));
        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn terminal_kinds() {
        assert!(JobEventKind::Completed.is_terminal());
        assert!(JobEventKind::Failed.is_terminal());
        assert!(JobEventKind::Cancelled.is_terminal());
        assert!(!JobEventKind::Progress.is_terminal());
        assert!(!JobEventKind::Started.is_terminal());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let event = JobEvent::new(Uuid::nil(), JobEventKind::Cancelled, 12);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "cancelled");
        assert!(json["message"].is_null());
    }
}

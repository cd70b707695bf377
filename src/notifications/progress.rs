use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use crate::models::ProgressEvent;
use super::{BroadcastHub, ChannelMessage, Envelope, Recipient};

/// Keeps the checkpoints each job has reached. Recording never blocks the
/// pipeline; the optional hub gets a copy for live viewers.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    events: DashMap<String, Vec<ProgressEvent>>,
    hub: Option<BroadcastHub>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hub(hub: BroadcastHub) -> Self {
        Self { events: DashMap::new(), hub: Some(hub) }
    }

    pub fn report(&self, job_id: &str, task_id: &str, percentage: u8, message: &str) -> ProgressEvent {
        let event = ProgressEvent {
            job_id: job_id.to_string(),
            task_id: task_id.to_string(),
            percentage: percentage.min(100),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        debug!(job_id, task_id, percentage, "{}", message);
        self.events.entry(job_id.to_string()).or_default().push(event.clone());

        if let Some(hub) = &self.hub {
            // broadcast::Sender::send is synchronous
            let _ = hub.tx.send(Envelope {
                recipient: Recipient::Group(task_id.to_string()),
                message: ChannelMessage::progress(&event),
            });
        }
        event
    }

    pub fn events(&self, job_id: &str) -> Vec<ProgressEvent> {
        self.events.get(job_id).map(|e| e.clone()).unwrap_or_default()
    }

    pub fn latest(&self, job_id: &str) -> Option<ProgressEvent> {
        self.events.get(job_id).and_then(|e| e.last().cloned())
    }

    pub fn forget(&self, job_id: &str) {
        self.events.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order_and_clamps() {
        let tracker = ProgressTracker::new();
        tracker.report("job-1", "task-1", 10, "Validating");
        tracker.report("job-1", "task-1", 150, "Done");

        let events = tracker.events("job-1");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].percentage, 10);
        assert_eq!(tracker.latest("job-1").unwrap().percentage, 100);
        assert!(tracker.events("job-2").is_empty());

        tracker.forget("job-1");
        assert!(tracker.latest("job-1").is_none());
    }

    #[tokio::test]
    async fn test_progress_is_forwarded_to_hub() {
        let hub = BroadcastHub::new(4);
        let mut rx = hub.subscribe();
        let tracker = ProgressTracker::with_hub(hub);
        tracker.report("job-1", "task-1", 40, "Executing");

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.recipient, Recipient::Group("task-1".into()));
        assert_eq!(envelope.message.percentage, Some(40));
    }
}

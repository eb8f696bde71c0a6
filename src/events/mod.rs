// ABOUTME: Deployment log publishing: persisted append plus live fan-out.
// ABOUTME: Subscribers are a convenience; the persisted log is the truth.

use crate::deploy::record::DeploymentStatus;
use crate::store::Store;
use crate::types::DeploymentId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Interval between heartbeat events on a live stream.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Overall budget for one streaming connection; clients reconnect with their
/// last known log offset after this elapses.
pub const STREAM_BUDGET: Duration = Duration::from_secs(300);

/// Buffered events per subscriber before the slowest one starts losing
/// messages. A lagging subscriber re-polls the persisted log to catch up.
const TOPIC_CAPACITY: usize = 256;

/// Events emitted on a deployment's stream.
///
/// Serialized with an `event` tag and a JSON payload, matching the
/// text-event-stream surface consumers speak.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event on a new subscription: where the persisted log ends.
    Connected { log_length: usize },
    /// One appended log chunk and the log length after appending it.
    Log { chunk: String, offset: usize },
    /// Keep-alive marker.
    Heartbeat { at: DateTime<Utc> },
    /// Terminal event; always the last one for a deployment.
    Complete { status: DeploymentStatus },
    /// The stream (not the deployment) ran out of budget.
    Timeout,
    /// Transport-level failure on the stream.
    Error { message: String },
}

/// Appends timestamped lines to the persisted deployment log and fans the
/// increments out to live subscribers.
///
/// Fan-out is fire-and-forget: no subscriber, a full buffer, or a dropped
/// receiver never fails the append or blocks the deployment worker.
pub struct LogPublisher {
    store: Arc<dyn Store>,
    topics: Mutex<HashMap<DeploymentId, broadcast::Sender<StreamEvent>>>,
}

impl LogPublisher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Append one log line, timestamped, and notify subscribers.
    /// Returns the new persisted log length.
    pub async fn append(
        &self,
        id: &DeploymentId,
        line: &str,
    ) -> Result<usize, crate::store::StoreError> {
        let stamped = format!("[{}] {}", Utc::now().format("%Y-%m-%d %H:%M:%S"), line);
        let offset = self.store.append_log(id, &stamped).await?;

        self.publish(
            id,
            StreamEvent::Log {
                chunk: stamped,
                offset,
            },
        );
        Ok(offset)
    }

    /// Publish the terminal event for a deployment and retire its topic.
    ///
    /// Idempotent: the topic is removed on the first call, so a repeat is a
    /// no-op and subscribers see exactly one completion.
    pub fn complete(&self, id: &DeploymentId, status: DeploymentStatus) {
        let sender = self.topics.lock().remove(id);
        if let Some(sender) = sender {
            let _ = sender.send(StreamEvent::Complete { status });
        }
    }

    /// Subscribe to a deployment's live events.
    ///
    /// The returned offset is the current persisted log length; a consumer
    /// replays the persisted log up to that point, then switches to the
    /// receiver. Events already published are not replayed.
    pub async fn subscribe(
        &self,
        id: &DeploymentId,
    ) -> Result<(usize, broadcast::Receiver<StreamEvent>), crate::store::StoreError> {
        // Topic before length: a line appended in between is then delivered
        // twice (once in the replayed prefix, once as an event) rather than
        // lost. Consumers drop chunks whose offset is inside their prefix.
        let receiver = {
            let mut topics = self.topics.lock();
            topics
                .entry(id.clone())
                .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
                .subscribe()
        };
        let log_length = self.store.deployment(id).await?.log.len();
        Ok((log_length, receiver))
    }

    fn publish(&self, id: &DeploymentId, event: StreamEvent) {
        let mut topics = self.topics.lock();
        let sender = topics
            .entry(id.clone())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        // Send fails only when there are no receivers; that's fine.
        let _ = sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::record::{DeploymentKind, DeploymentRecord};
    use crate::store::MemoryStore;
    use crate::types::AppName;

    async fn publisher_with_record() -> (Arc<LogPublisher>, DeploymentId) {
        let store = Arc::new(MemoryStore::new());
        let id = store.next_deployment_id().await.unwrap();
        store
            .create_deployment(DeploymentRecord::new(
                id.clone(),
                AppName::new("myapp").unwrap(),
                DeploymentKind::Deploy,
                Utc::now(),
            ))
            .await
            .unwrap();
        (Arc::new(LogPublisher::new(store)), id)
    }

    #[tokio::test]
    async fn append_persists_and_notifies() {
        let (publisher, id) = publisher_with_record().await;
        let (offset, mut rx) = publisher.subscribe(&id).await.unwrap();
        assert_eq!(offset, 0);

        publisher.append(&id, "Cloning repository").await.unwrap();

        match rx.recv().await.unwrap() {
            StreamEvent::Log { chunk, offset } => {
                assert!(chunk.contains("Cloning repository"));
                assert!(offset > 0);
            }
            other => panic!("expected log event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn append_succeeds_without_subscribers() {
        let (publisher, id) = publisher_with_record().await;
        let offset = publisher.append(&id, "no one listening").await.unwrap();
        assert!(offset > 0);
    }

    #[tokio::test]
    async fn complete_is_last_and_only_once() {
        let (publisher, id) = publisher_with_record().await;
        let (_, mut rx) = publisher.subscribe(&id).await.unwrap();

        publisher.append(&id, "step").await.unwrap();
        publisher.complete(&id, DeploymentStatus::Success);
        publisher.complete(&id, DeploymentStatus::Failed);

        assert!(matches!(rx.recv().await.unwrap(), StreamEvent::Log { .. }));
        assert_eq!(
            rx.recv().await.unwrap(),
            StreamEvent::Complete {
                status: DeploymentStatus::Success
            }
        );
        // Topic retired: no second completion arrives.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stream_events_serialize_with_event_tag() {
        let event = StreamEvent::Log {
            chunk: "line".to_string(),
            offset: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "log");
        assert_eq!(json["data"]["offset"], 5);
    }
}

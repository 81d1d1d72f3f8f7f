use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// The fixed, closed set of events the core publishes. Non-durable: a
/// subscriber that isn't listening when an event fires simply misses it,
/// same as the teacher's `ServerEvent` broadcast — there is no replay log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BusEvent {
    #[serde(rename = "thread:response")]
    ThreadResponse { thread_id: String, agent_id: String },
    #[serde(rename = "thread:error")]
    ThreadError { thread_id: String, message: String },
    #[serde(rename = "thread:file")]
    ThreadFile { thread_id: String, path: String },
    #[serde(rename = "thread:note")]
    ThreadNote { thread_id: String, text: String },
    #[serde(rename = "thread:pin")]
    ThreadPin { thread_id: String, pinned: bool },
    #[serde(rename = "cowork:spawned")]
    CoworkSpawned { parent_thread_id: String, child_thread_id: String, agent_id: String },
    #[serde(rename = "cowork:result")]
    CoworkResult { parent_thread_id: String, child_thread_id: String },
}

/// In-process pub/sub over `BusEvent`. Delivery is best-effort and
/// synchronous within the publishing turn — a publish that finds no
/// subscribers is a no-op, never buffered for later.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Best-effort publish. Returns the number of live subscribers notified;
    /// `0` is a normal, expected outcome when nobody is listening.
    pub fn publish(&self, event: BusEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_with_no_subscribers_is_a_noop() {
        let bus = EventBus::default();
        let delivered = bus.publish(BusEvent::ThreadNote {
            thread_id: "t1".into(),
            text: "hi".into(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(BusEvent::ThreadResponse {
            thread_id: "t1".into(),
            agent_id: "a1".into(),
        });
        let received = rx.recv().await.unwrap();
        match received {
            BusEvent::ThreadResponse { thread_id, agent_id } => {
                assert_eq!(thread_id, "t1");
                assert_eq!(agent_id, "a1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

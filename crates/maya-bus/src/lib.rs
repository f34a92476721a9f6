use std::collections::HashMap;
use std::sync::Arc;

use maya_schema::ConsoleEvent;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Topic {
    EvaluationCompleted,
    RollingEvaluationCompleted,
    SessionRotated,
    FeedbackSubmitted,
    QualityDegraded,
    ImprovementStaged,
    PromptVersionCommitted,
    IterationRecorded,
    ReflectionFinished,
    MetricsUpdated,
}

impl Topic {
    pub const ALL: [Topic; 10] = [
        Topic::EvaluationCompleted,
        Topic::RollingEvaluationCompleted,
        Topic::SessionRotated,
        Topic::FeedbackSubmitted,
        Topic::QualityDegraded,
        Topic::ImprovementStaged,
        Topic::PromptVersionCommitted,
        Topic::IterationRecorded,
        Topic::ReflectionFinished,
        Topic::MetricsUpdated,
    ];

    pub fn from_event(event: &ConsoleEvent) -> Self {
        match event {
            ConsoleEvent::EvaluationCompleted { .. } => Topic::EvaluationCompleted,
            ConsoleEvent::RollingEvaluationCompleted { .. } => Topic::RollingEvaluationCompleted,
            ConsoleEvent::SessionRotated { .. } => Topic::SessionRotated,
            ConsoleEvent::FeedbackSubmitted { .. } => Topic::FeedbackSubmitted,
            ConsoleEvent::QualityDegraded { .. } => Topic::QualityDegraded,
            ConsoleEvent::ImprovementStaged { .. } => Topic::ImprovementStaged,
            ConsoleEvent::PromptVersionCommitted { .. } => Topic::PromptVersionCommitted,
            ConsoleEvent::IterationRecorded { .. } => Topic::IterationRecorded,
            ConsoleEvent::ReflectionFinished { .. } => Topic::ReflectionFinished,
            ConsoleEvent::MetricsUpdated { .. } => Topic::MetricsUpdated,
        }
    }
}

type Subscriber = mpsc::Sender<ConsoleEvent>;
type SubscriberMap = Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>;

/// In-process fan-out of console events. Slow subscribers lose events
/// instead of blocking producers.
pub struct EventBus {
    subscribers: SubscriberMap,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<ConsoleEvent> {
        self.subscribe_many(&[topic]).await
    }

    /// One receiver fed by several topics, in publish order.
    pub async fn subscribe_many(&self, topics: &[Topic]) -> mpsc::Receiver<ConsoleEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        for topic in topics {
            subs.entry(*topic).or_default().push(tx.clone());
        }
        rx
    }

    pub async fn publish(&self, event: ConsoleEvent) -> usize {
        deliver(&self.subscribers, event).await
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .await
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            subscribers: self.subscribers.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[derive(Clone)]
pub struct BusPublisher {
    subscribers: SubscriberMap,
}

impl BusPublisher {
    pub async fn publish(&self, event: ConsoleEvent) -> usize {
        deliver(&self.subscribers, event).await
    }
}

async fn deliver(subscribers: &SubscriberMap, event: ConsoleEvent) -> usize {
    let topic = Topic::from_event(&event);
    let mut delivered = 0;
    let mut stale = false;
    {
        let subs = subscribers.read().await;
        if let Some(targets) = subs.get(&topic) {
            for tx in targets {
                match tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(?topic, "subscriber queue full, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => stale = true,
                }
            }
        }
    }
    if stale {
        let mut subs = subscribers.write().await;
        if let Some(targets) = subs.get_mut(&topic) {
            targets.retain(|tx| !tx.is_closed());
            tracing::debug!(?topic, remaining = targets.len(), "pruned closed subscribers");
        }
    }
    delivered
}

// vote.changed - published after a vote transaction commits
// Listeners run in their own tasks; a failing or panicking listener is logged and
// never reaches the publisher or the other listeners.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument, Span};
use uuid::Uuid;

use crate::core::{TargetRef, UserId, VoteDirection};
use crate::error::AppResult;
use crate::models::{TargetCounters, VoteChange, VoteOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteChanged {
    pub event_id: Uuid,
    pub target: TargetRef,
    pub author_id: UserId,
    pub voter: UserId,
    pub previous: Option<VoteDirection>,
    pub current: Option<VoteDirection>,
    pub change: VoteChange,
    pub counters: TargetCounters,
    pub reputation_delta: i64,
    pub occurred_at: DateTime<Utc>,
}

impl VoteChanged {
    pub const NAME: &'static str = "vote.changed";

    pub fn from_outcome(voter: UserId, outcome: &VoteOutcome) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            target: outcome.counters.target,
            author_id: outcome.counters.author_id,
            voter,
            previous: outcome.previous,
            current: outcome.user_vote,
            change: outcome.change,
            counters: outcome.counters.clone(),
            reputation_delta: outcome.reputation_delta,
            occurred_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait VoteListener: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_vote_changed(&self, event: &VoteChanged) -> AppResult<()>;
}

#[derive(Default, Clone)]
pub struct VoteEventBus {
    listeners: Vec<Arc<dyn VoteListener>>,
}

impl VoteEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Arc<dyn VoteListener>) {
        self.listeners.push(listener);
    }

    pub fn with_listener(mut self, listener: Arc<dyn VoteListener>) -> Self {
        self.subscribe(listener);
        self
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Fire-and-forget dispatch. The returned handle resolves once every
    /// listener has finished; callers are free to drop it. Listener tasks
    /// run inside the caller's span, so failures carry its request id.
    pub fn publish(&self, event: VoteChanged) -> JoinHandle<()> {
        let event = Arc::new(event);
        let listeners = self.listeners.clone();
        let span = Span::current();

        let dispatch = async move {
            let tasks = listeners.into_iter().map(|listener| {
                let event = Arc::clone(&event);
                let name = listener.name();
                let listener_span = Span::current();
                let handle = tokio::spawn(
                    async move {
                        if let Err(e) = listener.on_vote_changed(&event).await {
                            warn!(
                                listener = name,
                                event_id = %event.event_id,
                                target = %event.target,
                                "{} listener failed: {}",
                                VoteChanged::NAME,
                                e
                            );
                        }
                    }
                    .instrument(listener_span),
                );
                async move { (name, handle.await) }
            });

            for (name, result) in join_all(tasks).await {
                if let Err(e) = result {
                    warn!(listener = name, "{} listener panicked: {}", VoteChanged::NAME, e);
                }
            }
            debug!(event_id = %event.event_id, "{} dispatched", VoteChanged::NAME);
        };

        tokio::spawn(dispatch.instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl VoteListener for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn on_vote_changed(&self, _event: &VoteChanged) -> AppResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl VoteListener for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn on_vote_changed(&self, _event: &VoteChanged) -> AppResult<()> {
            Err(AppError::Internal("cache unreachable".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl VoteListener for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn on_vote_changed(&self, _event: &VoteChanged) -> AppResult<()> {
            panic!("listener bug");
        }
    }

    fn sample_event() -> VoteChanged {
        let outcome = VoteOutcome {
            counters: TargetCounters {
                target: TargetRef::snippet(1),
                author_id: UserId(1),
                upvotes: 1,
                downvotes: 0,
            },
            previous: None,
            user_vote: Some(VoteDirection::Upvote),
            change: VoteChange::Created,
            reputation_delta: 10,
            author_reputation: Some(10),
        };
        VoteChanged::from_outcome(UserId(2), &outcome)
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let bus = VoteEventBus::new()
            .with_listener(Arc::new(Failing))
            .with_listener(Arc::new(Panicking))
            .with_listener(counting.clone());

        bus.publish(sample_event()).await.unwrap();
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_listener_failure_logs_request_id() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let bus = VoteEventBus::new().with_listener(Arc::new(Failing));
        async { bus.publish(sample_event()).await.unwrap() }
            .instrument(tracing::info_span!("request", request_id = "req-42"))
            .await;

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|line| line.contains("listener failed"))
            .unwrap_or_else(|| panic!("no listener warning in {:?}", output));
        assert!(line.contains("req-42"), "{}", line);
    }

    #[tokio::test]
    async fn test_publish_without_listeners() {
        let bus = VoteEventBus::new();
        assert_eq!(bus.listener_count(), 0);
        bus.publish(sample_event()).await.unwrap();
    }

    #[test]
    fn test_event_carries_outcome() {
        let event = sample_event();
        assert_eq!(event.author_id, UserId(1));
        assert_eq!(event.voter, UserId(2));
        assert_eq!(event.current, Some(VoteDirection::Upvote));
        assert_eq!(event.reputation_delta, 10);
    }
}

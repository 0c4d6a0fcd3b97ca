// vote.changed listeners - cache invalidation, author notification, badges

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::infrastructure::badges::BadgeEvaluator;
use crate::infrastructure::cache::{CacheInvalidation, TargetCache};
use crate::infrastructure::notifier::RealtimeNotifier;
use crate::models::{Notification, VoteChange};
use crate::votes::events::{VoteChanged, VoteListener};

pub const TRENDING_PATTERN: &str = "trending:*";
pub const LISTING_PATTERN: &str = "listing:*";

/// Drops the target's cached view and every cached trending/listing view
pub struct CacheInvalidationListener {
    cache: Arc<dyn CacheInvalidation>,
}

impl CacheInvalidationListener {
    pub fn new(cache: Arc<dyn CacheInvalidation>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl VoteListener for CacheInvalidationListener {
    fn name(&self) -> &'static str {
        "cache_invalidation"
    }

    async fn on_vote_changed(&self, event: &VoteChanged) -> AppResult<()> {
        let target_key = TargetCache::target_key(event.target);
        let mut first_error = None;

        if let Err(e) = self.cache.invalidate_key(&target_key).await {
            warn!("Failed to invalidate {}: {}", target_key, e);
            first_error.get_or_insert(e);
        }

        for pattern in [TRENDING_PATTERN, LISTING_PATTERN] {
            match self.cache.invalidate_pattern(pattern).await {
                Ok(removed) => debug!("Invalidated {} entries matching {}", removed, pattern),
                Err(e) => {
                    warn!("Failed to invalidate pattern {}: {}", pattern, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Tells the author someone voted on their content
pub struct AuthorNotificationListener {
    notifier: Arc<dyn RealtimeNotifier>,
}

impl AuthorNotificationListener {
    pub fn new(notifier: Arc<dyn RealtimeNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl VoteListener for AuthorNotificationListener {
    fn name(&self) -> &'static str {
        "author_notification"
    }

    async fn on_vote_changed(&self, event: &VoteChanged) -> AppResult<()> {
        if event.voter == event.author_id {
            return Ok(());
        }
        if !matches!(event.change, VoteChange::Created | VoteChange::Switched) {
            return Ok(());
        }

        let notification = Notification {
            kind: "vote".to_string(),
            target: event.target,
            actor: event.voter,
            direction: event.current,
            score: event.counters.score(),
            created_at: event.occurred_at,
        };
        let delivered = self.notifier.notify_user(event.author_id, notification).await?;
        debug!(
            "Notified author {} of vote on {} ({} subscribers)",
            event.author_id, event.target, delivered
        );
        Ok(())
    }
}

/// Re-evaluates the author's badges
pub struct BadgeEvaluationListener {
    evaluator: Arc<dyn BadgeEvaluator>,
}

impl BadgeEvaluationListener {
    pub fn new(evaluator: Arc<dyn BadgeEvaluator>) -> Self {
        Self { evaluator }
    }
}

#[async_trait]
impl VoteListener for BadgeEvaluationListener {
    fn name(&self) -> &'static str {
        "badge_evaluation"
    }

    async fn on_vote_changed(&self, event: &VoteChanged) -> AppResult<()> {
        self.evaluator.evaluate(event.author_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TargetRef, UserId, VoteDirection};
    use crate::error::AppError;
    use crate::infrastructure::badges::ReputationBadgeEvaluator;
    use crate::infrastructure::memory_store::MemoryVoteStore;
    use crate::infrastructure::notifier::RoomNotifier;
    use crate::infrastructure::store::VoteStore;
    use crate::models::{Badge, TargetCounters, VoteOutcome};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn event(author: i64, voter: i64, change: VoteChange) -> VoteChanged {
        let outcome = VoteOutcome {
            counters: TargetCounters {
                target: TargetRef::snippet(7),
                author_id: UserId(author),
                upvotes: 2,
                downvotes: 0,
            },
            previous: None,
            user_vote: match change {
                VoteChange::Removed | VoteChange::Unchanged => None,
                _ => Some(VoteDirection::Upvote),
            },
            change,
            reputation_delta: 10,
            author_reputation: Some(10),
        };
        VoteChanged::from_outcome(UserId(voter), &outcome)
    }

    #[derive(Default)]
    struct FlakyCache {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CacheInvalidation for FlakyCache {
        async fn invalidate_key(&self, key: &str) -> AppResult<()> {
            self.calls.lock().await.push(key.to_string());
            Err(AppError::Internal("cache down".to_string()))
        }

        async fn invalidate_pattern(&self, pattern: &str) -> AppResult<u64> {
            self.calls.lock().await.push(pattern.to_string());
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_cache_listener_invalidates_target_and_views() {
        let cache = Arc::new(TargetCache::new(16, Duration::from_secs(60)).unwrap());
        cache.put("target:snippet:7", &1u32).await.unwrap();
        cache.put("target:snippet:8", &1u32).await.unwrap();
        cache.put("listing:snippet:top:10", &1u32).await.unwrap();
        cache.put("trending:week", &1u32).await.unwrap();

        let listener = CacheInvalidationListener::new(cache.clone());
        listener
            .on_vote_changed(&event(1, 2, VoteChange::Created))
            .await
            .unwrap();

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get::<u32>("target:snippet:8").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_cache_listener_keeps_going_after_failure() {
        let cache = Arc::new(FlakyCache::default());
        let listener = CacheInvalidationListener::new(cache.clone());

        let result = listener
            .on_vote_changed(&event(1, 2, VoteChange::Created))
            .await;
        assert!(result.is_err());
        assert_eq!(
            *cache.calls.lock().await,
            vec!["target:snippet:7", TRENDING_PATTERN, LISTING_PATTERN]
        );
    }

    #[tokio::test]
    async fn test_notification_rules() {
        let notifier = Arc::new(RoomNotifier::default());
        let mut rx = notifier.subscribe(UserId(1)).await;
        let listener = AuthorNotificationListener::new(notifier.clone());

        // self vote and removal are silent
        listener
            .on_vote_changed(&event(1, 1, VoteChange::Created))
            .await
            .unwrap();
        listener
            .on_vote_changed(&event(1, 2, VoteChange::Removed))
            .await
            .unwrap();
        listener
            .on_vote_changed(&event(1, 2, VoteChange::Switched))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.actor, UserId(2));
        assert_eq!(received.score, 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_badge_listener_evaluates_author() {
        let store = MemoryVoteStore::new();
        let author = store.create_user("author").await.unwrap();
        store.seed_reputation(author.id, 10).await.unwrap();

        let evaluator = Arc::new(ReputationBadgeEvaluator::new(Arc::new(store.clone())));
        let listener = BadgeEvaluationListener::new(evaluator);
        listener
            .on_vote_changed(&event(author.id.value(), 99, VoteChange::Created))
            .await
            .unwrap();

        assert_eq!(
            store.list_badges(author.id).await.unwrap(),
            vec![Badge::Contributor]
        );
    }
}

// Vote ledger - casts, toggles, switches and removes votes
// The vote row, the target counters and the author's reputation are written in
// one datastore transaction. Side effects run after commit via vote.changed.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::VoteConfig;
use crate::core::{TargetKind, TargetRef, UserId, VoteDirection};
use crate::error::{AppError, AppResult};
use crate::infrastructure::cache::TargetCache;
use crate::infrastructure::store::{VoteStore, VoteTransaction};
use crate::models::{ReputationResponse, TargetCounters, VoteChange, VoteOutcome};
use crate::votes::events::{VoteChanged, VoteEventBus};

pub const UPVOTE_WEIGHT: i64 = 10;
pub const DOWNVOTE_WEIGHT: i64 = -2;

pub const DEFAULT_LISTING_LIMIT: u32 = 10;
pub const MAX_LISTING_LIMIT: u32 = 100;

/// Reputation contributed to an author by one active vote
pub fn reputation_weight(direction: Option<VoteDirection>) -> i64 {
    match direction {
        Some(VoteDirection::Upvote) => UPVOTE_WEIGHT,
        Some(VoteDirection::Downvote) => DOWNVOTE_WEIGHT,
        None => 0,
    }
}

fn tally(direction: Option<VoteDirection>) -> (i64, i64) {
    match direction {
        Some(VoteDirection::Upvote) => (1, 0),
        Some(VoteDirection::Downvote) => (0, 1),
        None => (0, 0),
    }
}

/// The state change one request makes to one (target, voter) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: Option<VoteDirection>,
    pub next: Option<VoteDirection>,
    pub change: VoteChange,
    pub upvote_delta: i64,
    pub downvote_delta: i64,
    pub reputation_delta: i64,
}

impl Transition {
    /// `requested == None` is an explicit removal. Requesting the direction
    /// already held toggles the vote off.
    pub fn plan(previous: Option<VoteDirection>, requested: Option<VoteDirection>) -> Self {
        let next = match requested {
            Some(direction) if previous == Some(direction) => None,
            other => other,
        };

        let change = match (previous, next) {
            (None, None) => VoteChange::Unchanged,
            (None, Some(_)) => VoteChange::Created,
            (Some(_), None) => VoteChange::Removed,
            (Some(_), Some(_)) => VoteChange::Switched,
        };

        let (up_before, down_before) = tally(previous);
        let (up_after, down_after) = tally(next);

        Self {
            previous,
            next,
            change,
            upvote_delta: up_after - up_before,
            downvote_delta: down_after - down_before,
            reputation_delta: reputation_weight(next) - reputation_weight(previous),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotePolicy {
    pub allow_self_vote: bool,
}

impl Default for VotePolicy {
    fn default() -> Self {
        Self {
            allow_self_vote: true,
        }
    }
}

impl From<&VoteConfig> for VotePolicy {
    fn from(config: &VoteConfig) -> Self {
        Self {
            allow_self_vote: config.allow_self_vote,
        }
    }
}

pub struct VoteLedger {
    store: Arc<dyn VoteStore>,
    cache: Option<Arc<TargetCache>>,
    events: VoteEventBus,
    policy: VotePolicy,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn VoteStore>, events: VoteEventBus, policy: VotePolicy) -> Self {
        Self {
            store,
            cache: None,
            events,
            policy,
        }
    }

    pub fn with_cache(mut self, cache: Arc<TargetCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[instrument(skip(self))]
    pub async fn cast_vote(
        &self,
        target: TargetRef,
        voter: UserId,
        direction: VoteDirection,
    ) -> AppResult<VoteOutcome> {
        self.apply(target, voter, Some(direction)).await
    }

    #[instrument(skip(self))]
    pub async fn remove_vote(&self, target: TargetRef, voter: UserId) -> AppResult<VoteOutcome> {
        self.apply(target, voter, None).await
    }

    pub async fn get_current_vote(
        &self,
        target: TargetRef,
        voter: UserId,
    ) -> AppResult<Option<VoteDirection>> {
        Ok(self
            .store
            .find_vote(target, voter)
            .await?
            .map(|vote| vote.direction))
    }

    /// Read-through view of a target's counters
    #[instrument(skip(self))]
    pub async fn target_counters(&self, target: TargetRef) -> AppResult<TargetCounters> {
        let key = TargetCache::target_key(target);
        if let Some(cached) = self.cached::<TargetCounters>(&key).await {
            return Ok(cached);
        }

        let generation = self.cache_generation();
        let counters = self
            .store
            .get_target(target)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Target {} not found", target)))?;
        self.populate(&key, &counters, generation).await;
        Ok(counters)
    }

    /// Highest-scoring targets of one kind, cached per limit
    #[instrument(skip(self))]
    pub async fn top_targets(&self, kind: TargetKind, limit: u32) -> AppResult<Vec<TargetCounters>> {
        if limit == 0 || limit > MAX_LISTING_LIMIT {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_LISTING_LIMIT
            )));
        }

        let key = TargetCache::listing_key(kind, limit);
        if let Some(cached) = self.cached::<Vec<TargetCounters>>(&key).await {
            return Ok(cached);
        }

        let generation = self.cache_generation();
        let targets = self.store.top_targets(kind, limit).await?;
        self.populate(&key, &targets, generation).await;
        Ok(targets)
    }

    pub async fn reputation(&self, user: UserId) -> AppResult<ReputationResponse> {
        let profile = self
            .store
            .get_user(user)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user)))?;
        let badges = self.store.list_badges(user).await?;

        Ok(ReputationResponse {
            user_id: profile.id,
            username: profile.username,
            reputation: profile.reputation,
            badges,
        })
    }

    async fn apply(
        &self,
        target: TargetRef,
        voter: UserId,
        requested: Option<VoteDirection>,
    ) -> AppResult<VoteOutcome> {
        // A concurrent first vote by the same voter loses the unique-key race;
        // re-running sees the winner's row and toggles or switches it.
        let outcome = match self.apply_once(target, voter, requested).await {
            Err(AppError::Conflict(msg)) => {
                warn!("Vote conflict on {} by {}, retrying: {}", target, voter, msg);
                self.apply_once(target, voter, requested).await?
            }
            result => result?,
        };

        if outcome.change == VoteChange::Unchanged {
            debug!("No vote by {} on {}, nothing to remove", voter, target);
            return Ok(outcome);
        }

        info!(
            "Vote {:?} on {} by {}: {:?} -> {:?}, reputation {:+}",
            outcome.change, target, voter, outcome.previous, outcome.user_vote, outcome.reputation_delta
        );
        self.events.publish(VoteChanged::from_outcome(voter, &outcome));
        Ok(outcome)
    }

    async fn apply_once(
        &self,
        target: TargetRef,
        voter: UserId,
        requested: Option<VoteDirection>,
    ) -> AppResult<VoteOutcome> {
        let mut tx = self.store.begin().await?;

        let result = self.run(tx.as_mut(), target, voter, requested).await;
        match result {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed for vote on {}: {}", target, rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        tx: &mut dyn VoteTransaction,
        target: TargetRef,
        voter: UserId,
        requested: Option<VoteDirection>,
    ) -> AppResult<VoteOutcome> {
        let counters = tx
            .lock_target(target)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Target {} not found", target)))?;

        if requested.is_some() && !self.policy.allow_self_vote && counters.author_id == voter {
            return Err(AppError::Forbidden(format!(
                "User {} cannot vote on their own {}",
                voter, target.kind
            )));
        }

        let previous = tx.find_vote(target, voter).await?;
        let transition = Transition::plan(previous, requested);

        match (transition.previous, transition.next) {
            (None, None) => {
                return Ok(VoteOutcome {
                    counters,
                    previous: None,
                    user_vote: None,
                    change: VoteChange::Unchanged,
                    reputation_delta: 0,
                    author_reputation: None,
                });
            }
            (None, Some(direction)) => tx.insert_vote(target, voter, direction).await?,
            (Some(_), Some(direction)) => tx.update_vote(target, voter, direction).await?,
            (Some(_), None) => tx.delete_vote(target, voter).await?,
        }

        let counters = tx
            .adjust_counters(target, transition.upvote_delta, transition.downvote_delta)
            .await?;
        let author_reputation = tx
            .adjust_reputation(counters.author_id, transition.reputation_delta)
            .await?;

        Ok(VoteOutcome {
            counters,
            previous: transition.previous,
            user_vote: transition.next,
            change: transition.change,
            reputation_delta: transition.reputation_delta,
            author_reputation: Some(author_reputation),
        })
    }

    async fn cached<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let cache = self.cache.as_ref()?;
        match cache.get::<T>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    fn cache_generation(&self) -> u64 {
        self.cache.as_ref().map_or(0, |cache| cache.generation())
    }

    // A value read before an invalidation must not be written back after it
    async fn populate<T: serde::Serialize + Sync>(&self, key: &str, value: &T, generation: u64) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put_if_current(key, value, generation).await {
                warn!("Cache write failed for {}: {}", key, e);
            }
        }
    }
}

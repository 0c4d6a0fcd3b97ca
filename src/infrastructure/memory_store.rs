// In-memory vote store
// Transactions hold the store lock and work on a staged copy; commit swaps it in.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::{TargetId, TargetKind, TargetRef, UserId, VoteDirection};
use crate::error::{AppError, AppResult};
use crate::infrastructure::store::{VoteStore, VoteTransaction};
use crate::models::{Badge, TargetCounters, UserProfile, VoteRecord};

#[derive(Debug, Clone)]
struct TargetRow {
    author_id: UserId,
    upvotes: i64,
    downvotes: i64,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    users: HashMap<UserId, UserProfile>,
    targets: HashMap<TargetRef, TargetRow>,
    votes: HashMap<(TargetRef, UserId), VoteRecord>,
    badges: BTreeSet<(UserId, Badge)>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn counters(&self, target: TargetRef) -> Option<TargetCounters> {
        self.targets.get(&target).map(|row| TargetCounters {
            target,
            author_id: row.author_id,
            upvotes: row.upvotes,
            downvotes: row.downvotes,
        })
    }
}

/// Vote store backed by process memory
#[derive(Clone, Default)]
pub struct MemoryVoteStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryVoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a target's counters, for seeding fixtures
    pub async fn seed_counters(
        &self,
        target: TargetRef,
        upvotes: i64,
        downvotes: i64,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let row = state
            .targets
            .get_mut(&target)
            .ok_or_else(|| AppError::NotFound(format!("Target {} not found", target)))?;
        row.upvotes = upvotes;
        row.downvotes = downvotes;
        Ok(())
    }

    /// Overwrite a user's reputation, for seeding fixtures
    pub async fn seed_reputation(&self, user: UserId, reputation: i64) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let profile = state
            .users
            .get_mut(&user)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user)))?;
        profile.reputation = reputation;
        Ok(())
    }
}

pub struct MemoryVoteTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl VoteTransaction for MemoryVoteTransaction {
    async fn lock_target(&mut self, target: TargetRef) -> AppResult<Option<TargetCounters>> {
        Ok(self.staged.counters(target))
    }

    async fn find_vote(
        &mut self,
        target: TargetRef,
        voter: UserId,
    ) -> AppResult<Option<VoteDirection>> {
        Ok(self
            .staged
            .votes
            .get(&(target, voter))
            .map(|vote| vote.direction))
    }

    async fn insert_vote(
        &mut self,
        target: TargetRef,
        voter: UserId,
        direction: VoteDirection,
    ) -> AppResult<()> {
        if !self.staged.users.contains_key(&voter) {
            return Err(AppError::NotFound(format!("User {} not found", voter)));
        }
        if self.staged.votes.contains_key(&(target, voter)) {
            return Err(AppError::Conflict(format!(
                "Vote by {} on {} already exists",
                voter, target
            )));
        }
        self.staged.votes.insert(
            (target, voter),
            VoteRecord {
                target,
                voter,
                direction,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn update_vote(
        &mut self,
        target: TargetRef,
        voter: UserId,
        direction: VoteDirection,
    ) -> AppResult<()> {
        let vote = self
            .staged
            .votes
            .get_mut(&(target, voter))
            .ok_or_else(|| AppError::NotFound(format!("Vote by {} on {} not found", voter, target)))?;
        vote.direction = direction;
        Ok(())
    }

    async fn delete_vote(&mut self, target: TargetRef, voter: UserId) -> AppResult<()> {
        self.staged
            .votes
            .remove(&(target, voter))
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Vote by {} on {} not found", voter, target)))
    }

    async fn adjust_counters(
        &mut self,
        target: TargetRef,
        upvote_delta: i64,
        downvote_delta: i64,
    ) -> AppResult<TargetCounters> {
        let row = self
            .staged
            .targets
            .get_mut(&target)
            .ok_or_else(|| AppError::NotFound(format!("Target {} not found", target)))?;

        let upvotes = row.upvotes + upvote_delta;
        let downvotes = row.downvotes + downvote_delta;
        if upvotes < 0 || downvotes < 0 {
            return Err(AppError::DatabaseError(format!(
                "Counters for {} would go negative",
                target
            )));
        }
        row.upvotes = upvotes;
        row.downvotes = downvotes;

        Ok(TargetCounters {
            target,
            author_id: row.author_id,
            upvotes,
            downvotes,
        })
    }

    async fn adjust_reputation(&mut self, user: UserId, delta: i64) -> AppResult<i64> {
        let profile = self
            .staged
            .users
            .get_mut(&user)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user)))?;
        profile.reputation += delta;
        Ok(profile.reputation)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryVoteTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl VoteStore for MemoryVoteStore {
    async fn begin(&self) -> AppResult<Box<dyn VoteTransaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryVoteTransaction { guard, staged }))
    }

    async fn find_vote(&self, target: TargetRef, voter: UserId) -> AppResult<Option<VoteRecord>> {
        let state = self.state.lock().await;
        Ok(state.votes.get(&(target, voter)).cloned())
    }

    async fn get_target(&self, target: TargetRef) -> AppResult<Option<TargetCounters>> {
        let state = self.state.lock().await;
        Ok(state.counters(target))
    }

    async fn top_targets(&self, kind: TargetKind, limit: u32) -> AppResult<Vec<TargetCounters>> {
        let state = self.state.lock().await;
        let mut targets: Vec<TargetCounters> = state
            .targets
            .keys()
            .filter(|target| target.kind == kind)
            .filter_map(|target| state.counters(*target))
            .collect();
        targets.sort_by(|a, b| {
            b.score()
                .cmp(&a.score())
                .then_with(|| a.target.id.cmp(&b.target.id))
        });
        targets.truncate(limit as usize);
        Ok(targets)
    }

    async fn count_votes(&self, target: TargetRef) -> AppResult<u64> {
        let state = self.state.lock().await;
        Ok(state
            .votes
            .keys()
            .filter(|(voted, _)| *voted == target)
            .count() as u64)
    }

    async fn create_user(&self, username: &str) -> AppResult<UserProfile> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|user| user.username == username) {
            return Err(AppError::Conflict(format!(
                "Username {} is already taken",
                username
            )));
        }
        let id = UserId(state.next_id());
        let profile = UserProfile {
            id,
            username: username.to_string(),
            reputation: 0,
            created_at: Utc::now(),
        };
        state.users.insert(id, profile.clone());
        Ok(profile)
    }

    async fn get_user(&self, user: UserId) -> AppResult<Option<UserProfile>> {
        let state = self.state.lock().await;
        Ok(state.users.get(&user).cloned())
    }

    async fn create_snippet(&self, author: UserId, _title: &str) -> AppResult<TargetRef> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&author) {
            return Err(AppError::NotFound(format!("User {} not found", author)));
        }
        let target = TargetRef::snippet(state.next_id());
        state.targets.insert(
            target,
            TargetRow {
                author_id: author,
                upvotes: 0,
                downvotes: 0,
            },
        );
        Ok(target)
    }

    async fn create_comment(
        &self,
        author: UserId,
        snippet: TargetId,
        _body: &str,
    ) -> AppResult<TargetRef> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&author) {
            return Err(AppError::NotFound(format!("User {} not found", author)));
        }
        let parent = TargetRef::new(TargetKind::Snippet, snippet);
        if !state.targets.contains_key(&parent) {
            return Err(AppError::NotFound(format!("Snippet {} not found", snippet)));
        }
        let target = TargetRef::comment(state.next_id());
        state.targets.insert(
            target,
            TargetRow {
                author_id: author,
                upvotes: 0,
                downvotes: 0,
            },
        );
        Ok(target)
    }

    async fn award_badge(&self, user: UserId, badge: Badge) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user) {
            return Err(AppError::NotFound(format!("User {} not found", user)));
        }
        Ok(state.badges.insert((user, badge)))
    }

    async fn list_badges(&self, user: UserId) -> AppResult<Vec<Badge>> {
        let state = self.state.lock().await;
        Ok(state
            .badges
            .iter()
            .filter(|(owner, _)| *owner == user)
            .map(|(_, badge)| *badge)
            .collect())
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = MemoryVoteStore::new();
        let author = store.create_user("author").await.unwrap();
        let snippet = store.create_snippet(author.id, "s").await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_vote(snippet, author.id, VoteDirection::Upvote)
                .await
                .unwrap();
            tx.adjust_counters(snippet, 1, 0).await.unwrap();
        }

        assert_eq!(store.count_votes(snippet).await.unwrap(), 0);
        assert_eq!(store.get_target(snippet).await.unwrap().unwrap().upvotes, 0);
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryVoteStore::new();
        let author = store.create_user("author").await.unwrap();
        let snippet = store.create_snippet(author.id, "s").await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.adjust_counters(snippet, 0, 1).await.unwrap();
        tx.adjust_reputation(author.id, -2).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get_target(snippet).await.unwrap().unwrap().downvotes, 1);
        assert_eq!(store.get_user(author.id).await.unwrap().unwrap().reputation, -2);
    }

    #[tokio::test]
    async fn test_top_targets_orders_by_score() {
        let store = MemoryVoteStore::new();
        let author = store.create_user("author").await.unwrap();
        let low = store.create_snippet(author.id, "low").await.unwrap();
        let high = store.create_snippet(author.id, "high").await.unwrap();
        store.seed_counters(low, 1, 3).await.unwrap();
        store.seed_counters(high, 4, 0).await.unwrap();

        let top = store.top_targets(TargetKind::Snippet, 10).await.unwrap();
        assert_eq!(top[0].target, high);
        assert_eq!(top[1].target, low);
        assert!(store.top_targets(TargetKind::Comment, 10).await.unwrap().is_empty());
    }
}

// Badge evaluation - awards reputation badges after vote changes

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::core::UserId;
use crate::error::{AppError, AppResult};
use crate::infrastructure::store::VoteStore;
use crate::models::Badge;

#[async_trait]
pub trait BadgeEvaluator: Send + Sync {
    /// Award any badges the user has earned. Returns the newly awarded ones.
    async fn evaluate(&self, user: UserId) -> AppResult<Vec<Badge>>;
}

/// Awards badges from the user's current reputation. Badges are never revoked.
pub struct ReputationBadgeEvaluator {
    store: Arc<dyn VoteStore>,
}

impl ReputationBadgeEvaluator {
    pub fn new(store: Arc<dyn VoteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BadgeEvaluator for ReputationBadgeEvaluator {
    async fn evaluate(&self, user: UserId) -> AppResult<Vec<Badge>> {
        let profile = self
            .store
            .get_user(user)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user)))?;

        let mut awarded = Vec::new();
        for badge in Badge::earned_at(profile.reputation) {
            if self.store.award_badge(user, badge).await? {
                info!("Awarded {} badge to user {}", badge, user);
                awarded.push(badge);
            }
        }
        Ok(awarded)
    }
}

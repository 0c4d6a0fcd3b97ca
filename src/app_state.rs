use std::sync::Arc;

use crate::{
    config::Config,
    error::AppResult,
    infrastructure::{
        badges::ReputationBadgeEvaluator,
        cache::TargetCache,
        notifier::RoomNotifier,
        store::{connect_store, VoteStore},
    },
    votes::{
        events::VoteEventBus,
        ledger::{VoteLedger, VotePolicy},
        listeners::{AuthorNotificationListener, BadgeEvaluationListener, CacheInvalidationListener},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn VoteStore>,
    pub cache: Arc<TargetCache>,
    pub notifier: Arc<RoomNotifier>,
    pub ledger: Arc<VoteLedger>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = connect_store(&config.database).await?;
        Ok(Self::from_parts(config, store)?)
    }

    /// Wire the ledger and its vote.changed listeners around an existing store
    pub fn from_parts(config: Config, store: Arc<dyn VoteStore>) -> AppResult<Self> {
        let cache = Arc::new(TargetCache::from_config(&config.cache)?);
        let notifier = Arc::new(RoomNotifier::default());
        let badges = Arc::new(ReputationBadgeEvaluator::new(Arc::clone(&store)));

        let events = VoteEventBus::new()
            .with_listener(Arc::new(CacheInvalidationListener::new(cache.clone())))
            .with_listener(Arc::new(AuthorNotificationListener::new(notifier.clone())))
            .with_listener(Arc::new(BadgeEvaluationListener::new(badges)));

        let ledger = VoteLedger::new(
            Arc::clone(&store),
            events,
            VotePolicy::from(&config.votes),
        )
        .with_cache(cache.clone());

        Ok(Self {
            config,
            store,
            cache,
            notifier,
            ledger: Arc::new(ledger),
        })
    }
}

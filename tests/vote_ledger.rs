// Vote ledger against a file-backed SQLite store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use snippet_votes::{
    config::Config,
    app_state::AppState,
    core::{TargetKind, TargetRef, UserId},
    infrastructure::{SqliteVoteStore, VoteStore},
    models::{Badge, VoteChange},
    votes::{VoteChanged, VoteEventBus, VoteLedger, VoteListener, VotePolicy},
    AppError, AppResult,
};
use tempfile::TempDir;

use snippet_votes::core::VoteDirection::{Downvote, Upvote};

struct TestDb {
    _dir: TempDir,
    store: Arc<SqliteVoteStore>,
}

async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("votes.db").display());
    let store = SqliteVoteStore::connect(&url, 8).await.unwrap();
    store.initialize().await.unwrap();
    TestDb {
        _dir: dir,
        store: Arc::new(store),
    }
}

fn ledger(store: &Arc<SqliteVoteStore>) -> VoteLedger {
    VoteLedger::new(store.clone(), VoteEventBus::new(), VotePolicy::default())
}

async fn seed(store: &SqliteVoteStore, target: TargetRef, up: i64, down: i64, author: UserId, rep: i64) {
    let sql = format!(
        "UPDATE {} SET upvotes = ?1, downvotes = ?2 WHERE id = ?3",
        target.kind.table()
    );
    sqlx::query(&sql)
        .bind(up)
        .bind(down)
        .bind(target.id.value())
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query("UPDATE users SET reputation = ?1 WHERE id = ?2")
        .bind(rep)
        .bind(author.value())
        .execute(store.pool())
        .await
        .unwrap();
}

async fn reputation(store: &SqliteVoteStore, user: UserId) -> i64 {
    store.get_user(user).await.unwrap().unwrap().reputation
}

#[tokio::test]
async fn scenarios_upvote_switch_toggle() {
    let db = test_db().await;
    let author = db.store.create_user("author").await.unwrap().id;
    let voter = db.store.create_user("voter").await.unwrap().id;
    let snippet = db.store.create_snippet(author, "fizzbuzz").await.unwrap();
    seed(&db.store, snippet, 5, 2, author, 40).await;
    let ledger = ledger(&db.store);

    let a = ledger.cast_vote(snippet, voter, Upvote).await.unwrap();
    assert_eq!((a.counters.upvotes, a.counters.downvotes), (6, 2));
    assert_eq!(reputation(&db.store, author).await, 50);
    assert_eq!(ledger.get_current_vote(snippet, voter).await.unwrap(), Some(Upvote));

    let b = ledger.cast_vote(snippet, voter, Downvote).await.unwrap();
    assert_eq!((b.counters.upvotes, b.counters.downvotes), (5, 3));
    assert_eq!(reputation(&db.store, author).await, 38);
    assert_eq!(ledger.get_current_vote(snippet, voter).await.unwrap(), Some(Downvote));

    let c = ledger.cast_vote(snippet, voter, Downvote).await.unwrap();
    assert_eq!((c.counters.upvotes, c.counters.downvotes), (5, 2));
    assert_eq!(reputation(&db.store, author).await, 40);
    assert_eq!(ledger.get_current_vote(snippet, voter).await.unwrap(), None);
}

#[tokio::test]
async fn comment_votes_are_separate_from_snippet_votes() {
    let db = test_db().await;
    let author = db.store.create_user("author").await.unwrap().id;
    let commenter = db.store.create_user("commenter").await.unwrap().id;
    let voter = db.store.create_user("voter").await.unwrap().id;
    let snippet = db.store.create_snippet(author, "quicksort").await.unwrap();
    let comment = db
        .store
        .create_comment(commenter, snippet.id, "use a pivot")
        .await
        .unwrap();
    let ledger = ledger(&db.store);

    ledger.cast_vote(snippet, voter, Upvote).await.unwrap();
    let outcome = ledger.cast_vote(comment, voter, Downvote).await.unwrap();

    assert_eq!(outcome.counters.author_id, commenter);
    assert_eq!(outcome.counters.downvotes, 1);
    assert_eq!(reputation(&db.store, author).await, 10);
    assert_eq!(reputation(&db.store, commenter).await, -2);
    assert_eq!(ledger.get_current_vote(snippet, voter).await.unwrap(), Some(Upvote));
    assert_eq!(ledger.get_current_vote(comment, voter).await.unwrap(), Some(Downvote));
}

#[tokio::test]
async fn missing_target_is_not_found_and_writes_nothing() {
    let db = test_db().await;
    let voter = db.store.create_user("voter").await.unwrap().id;
    let ghost = TargetRef::new(TargetKind::Snippet, 999);

    let result = ledger(&db.store).cast_vote(ghost, voter, Upvote).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert_eq!(db.store.count_votes(ghost).await.unwrap(), 0);
}

#[tokio::test]
async fn remove_without_vote_is_a_noop() {
    let db = test_db().await;
    let author = db.store.create_user("author").await.unwrap().id;
    let voter = db.store.create_user("voter").await.unwrap().id;
    let snippet = db.store.create_snippet(author, "hello").await.unwrap();
    seed(&db.store, snippet, 3, 1, author, 28).await;

    let outcome = ledger(&db.store).remove_vote(snippet, voter).await.unwrap();
    assert_eq!(outcome.change, VoteChange::Unchanged);
    assert_eq!((outcome.counters.upvotes, outcome.counters.downvotes), (3, 1));
    assert_eq!(reputation(&db.store, author).await, 28);
}

#[tokio::test]
async fn concurrent_voters_are_serialized() {
    let db = test_db().await;
    let author = db.store.create_user("author").await.unwrap().id;
    let snippet = db.store.create_snippet(author, "popular").await.unwrap();

    let mut voters = Vec::new();
    for i in 0..20 {
        voters.push(db.store.create_user(&format!("voter{}", i)).await.unwrap().id);
    }

    let ledger = Arc::new(ledger(&db.store));
    let handles: Vec<_> = voters
        .iter()
        .enumerate()
        .map(|(i, voter)| {
            let ledger = ledger.clone();
            let voter = *voter;
            let direction = if i % 4 == 0 { Downvote } else { Upvote };
            tokio::spawn(async move { ledger.cast_vote(snippet, voter, direction).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let counters = db.store.get_target(snippet).await.unwrap().unwrap();
    assert_eq!((counters.upvotes, counters.downvotes), (15, 5));
    assert_eq!(db.store.count_votes(snippet).await.unwrap(), 20);
    assert_eq!(reputation(&db.store, author).await, 15 * 10 - 5 * 2);
}

#[tokio::test]
async fn badges_are_awarded_after_commit() {
    let db = test_db().await;
    let author = db.store.create_user("author").await.unwrap().id;
    let voter = db.store.create_user("voter").await.unwrap().id;
    let snippet = db.store.create_snippet(author, "regex").await.unwrap();

    let state = AppState::from_parts(Config::default(), db.store.clone()).unwrap();
    state.ledger.cast_vote(snippet, voter, Upvote).await.unwrap();

    let mut badges = Vec::new();
    for _ in 0..100 {
        badges = db.store.list_badges(author).await.unwrap();
        if !badges.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(badges, vec![Badge::Contributor]);

    // dropping below the threshold keeps the badge
    state.ledger.cast_vote(snippet, voter, Upvote).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(reputation(&db.store, author).await, 0);
    assert_eq!(db.store.list_badges(author).await.unwrap(), vec![Badge::Contributor]);
}

#[tokio::test]
async fn cached_view_is_refreshed_after_vote() {
    let db = test_db().await;
    let author = db.store.create_user("author").await.unwrap().id;
    let voter = db.store.create_user("voter").await.unwrap().id;
    let snippet = db.store.create_snippet(author, "cache me").await.unwrap();

    let state = AppState::from_parts(Config::default(), db.store.clone()).unwrap();
    assert_eq!(state.ledger.target_counters(snippet).await.unwrap().upvotes, 0);

    state.ledger.cast_vote(snippet, voter, Upvote).await.unwrap();

    let mut upvotes = 0;
    for _ in 0..100 {
        upvotes = state.ledger.target_counters(snippet).await.unwrap().upvotes;
        if upvotes == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(upvotes, 1);
}

#[derive(Default)]
struct CountingListener(AtomicUsize);

#[async_trait]
impl VoteListener for CountingListener {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn on_vote_changed(&self, _event: &VoteChanged) -> AppResult<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A snippet whose author row is gone, so the reputation update fails after
/// the vote row and counters were already written.
async fn orphaned_snippet(store: &SqliteVoteStore, up: i64, down: i64) -> TargetRef {
    let mut conn = store.pool().acquire().await.unwrap();
    sqlx::query("PRAGMA foreign_keys = OFF")
        .execute(&mut *conn)
        .await
        .unwrap();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO snippets (author_id, title, upvotes, downvotes, created_at) VALUES (999, 'orphan', ?1, ?2, ?3) RETURNING id",
    )
    .bind(up)
    .bind(down)
    .bind(chrono::Utc::now())
    .fetch_one(&mut *conn)
    .await
    .unwrap();
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await
        .unwrap();
    TargetRef::new(TargetKind::Snippet, id)
}

#[tokio::test]
async fn failed_reputation_update_rolls_back_vote_and_counters() {
    let db = test_db().await;
    let voter = db.store.create_user("voter").await.unwrap().id;
    let snippet = orphaned_snippet(&db.store, 2, 1).await;

    let listener = Arc::new(CountingListener::default());
    let ledger = VoteLedger::new(
        db.store.clone(),
        VoteEventBus::new().with_listener(listener.clone()),
        VotePolicy::default(),
    );

    let result = ledger.cast_vote(snippet, voter, Upvote).await;
    assert!(matches!(result, Err(AppError::NotFound(_))), "{:?}", result);

    assert_eq!(db.store.count_votes(snippet).await.unwrap(), 0);
    assert_eq!(ledger.get_current_vote(snippet, voter).await.unwrap(), None);
    let counters = db.store.get_target(snippet).await.unwrap().unwrap();
    assert_eq!((counters.upvotes, counters.downvotes), (2, 1));
    assert_eq!(reputation(&db.store, voter).await, 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(listener.0.load(Ordering::SeqCst), 0);
}

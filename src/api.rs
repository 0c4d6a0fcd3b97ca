// HTTP surface - vote, target, and reputation endpoints

use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    app_state::AppState,
    core::{TargetKind, TargetRef, UserId},
    error::{AppError, AppResult},
    infrastructure::middleware::{request_id_middleware, Voter},
    models::{CastVoteRequest, CurrentVoteResponse, ReputationResponse, TargetCounters, VoteResponse},
    votes::ledger::DEFAULT_LISTING_LIMIT,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct TargetResponse {
    pub target: TargetRef,
    pub author_id: UserId,
    pub upvotes: i64,
    pub downvotes: i64,
    pub score: i64,
}

impl From<TargetCounters> for TargetResponse {
    fn from(counters: TargetCounters) -> Self {
        Self {
            score: counters.score(),
            target: counters.target,
            author_id: counters.author_id,
            upvotes: counters.upvotes,
            downvotes: counters.downvotes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TopTargetsQuery {
    pub limit: Option<u32>,
}

fn parse_target(kind: &str, id: &str) -> AppResult<TargetRef> {
    let id = id
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid target id: {}", id)))?;
    Ok(TargetRef::new(kind.parse::<TargetKind>()?, id))
}

// HTTP Handlers

pub async fn cast_vote_handler(
    State(state): State<AppState>,
    Voter(voter): Voter,
    Path((kind, id)): Path<(String, String)>,
    Json(req): Json<CastVoteRequest>,
) -> AppResult<Json<VoteResponse>> {
    let target = parse_target(&kind, &id)?;
    let outcome = state.ledger.cast_vote(target, voter, req.direction).await?;
    Ok(Json(VoteResponse::from(&outcome)))
}

pub async fn get_vote_handler(
    State(state): State<AppState>,
    Voter(voter): Voter,
    Path((kind, id)): Path<(String, String)>,
) -> AppResult<Json<CurrentVoteResponse>> {
    let target = parse_target(&kind, &id)?;
    let user_vote = state.ledger.get_current_vote(target, voter).await?;
    Ok(Json(CurrentVoteResponse { target, user_vote }))
}

pub async fn remove_vote_handler(
    State(state): State<AppState>,
    Voter(voter): Voter,
    Path((kind, id)): Path<(String, String)>,
) -> AppResult<Json<VoteResponse>> {
    let target = parse_target(&kind, &id)?;
    let outcome = state.ledger.remove_vote(target, voter).await?;
    Ok(Json(VoteResponse::from(&outcome)))
}

pub async fn get_target_handler(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> AppResult<Json<TargetResponse>> {
    let target = parse_target(&kind, &id)?;
    let counters = state.ledger.target_counters(target).await?;
    Ok(Json(counters.into()))
}

pub async fn top_targets_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<TopTargetsQuery>,
) -> AppResult<Json<Vec<TargetResponse>>> {
    let kind = kind.parse::<TargetKind>()?;
    let limit = query.limit.unwrap_or(DEFAULT_LISTING_LIMIT);
    let targets = state.ledger.top_targets(kind, limit).await?;
    Ok(Json(targets.into_iter().map(TargetResponse::from).collect()))
}

pub async fn reputation_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ReputationResponse>> {
    let user = id.parse::<UserId>()?;
    Ok(Json(state.ledger.reputation(user).await?))
}

pub async fn health_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state.store.health_check().await?;
    Ok(Json(json!({
        "status": "healthy",
        "cache": state.cache.stats(),
    })))
}

pub fn create_vote_router(state: AppState) -> Router {
    Router::new()
        // Vote operations
        .route(
            "/targets/{kind}/{id}/vote",
            get(get_vote_handler)
                .post(cast_vote_handler)
                .delete(remove_vote_handler),
        )
        // Target views
        .route("/targets/{kind}/top", get(top_targets_handler))
        .route("/targets/{kind}/{id}", get(get_target_handler))
        .route("/users/{id}/reputation", get(reputation_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Full application router with the API nested under `/api/v1`
pub fn create_app(state: AppState) -> Router {
    Router::new().nest("/api/v1", create_vote_router(state))
}

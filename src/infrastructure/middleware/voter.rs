// Voter extractor - the authenticated user id set by the auth gateway

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::core::UserId;
use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Verified voter identity.
///
/// ```rust,ignore
/// async fn handler(Voter(user): Voter) -> AppResult<Json<..>> { .. }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voter(pub UserId);

impl std::ops::Deref for Voter {
    type Target = UserId;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn voter_from_parts(parts: &Parts) -> Result<Voter, AppError> {
    let raw = parts
        .headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| AppError::Unauthorized("Missing voter identity".to_string()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("Malformed voter identity".to_string()))?;

    match raw.parse::<UserId>() {
        Ok(user) if user.value() > 0 => Ok(Voter(user)),
        _ => Err(AppError::Unauthorized(format!(
            "Invalid voter identity: {}",
            raw
        ))),
    }
}

impl<S> FromRequestParts<S> for Voter
where
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let voter = voter_from_parts(parts);
        async move { voter }
    }
}

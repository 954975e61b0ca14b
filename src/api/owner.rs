use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::response::ApiError;

/// Header carrying the authenticated owner id, set by the fronting gateway.
pub const OWNER_HEADER: &str = "x-owner-id";

/// The owner on whose behalf a request runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, ApiError> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or_else(|| ApiError::unauthorized("Missing X-Owner-Id header"))
    }
}

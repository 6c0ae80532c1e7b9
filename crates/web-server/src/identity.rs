use crate::error::AppError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Header the upstream gateway sets after authenticating the caller.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller, taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("{USER_ID_HEADER} header is missing")))?;

        value
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized(format!("{USER_ID_HEADER} is not a user id")))
    }
}

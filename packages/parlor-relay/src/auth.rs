//! Caller identity.
//!
//! Authentication happens upstream; by the time a request reaches the relay
//! the gateway has put the authenticated user id in `x-user-id`.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use parlor_core::UserId;

use crate::api::ApiError;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated user making the request.
#[derive(Debug, Clone)]
pub struct Caller(pub UserId);

impl Caller {
    /// Read the caller from request headers, if present and well-formed.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let raw = headers.get(USER_ID_HEADER)?.to_str().ok()?;
        UserId::parse(raw).ok().map(Caller)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Caller::from_headers(&parts.headers).ok_or_else(ApiError::unauthorized)
    }
}

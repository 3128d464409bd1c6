// HTTP middleware

use axum::{
    extract::{FromRef, FromRequestParts, Query},
    http::{header, request::Parts},
};
use serde::Deserialize;
use voxroom_core::models::UserId;

use super::{AppError, AppState};

/// Name of the cookie carrying the session token
pub const TOKEN_COOKIE: &str = "token";

/// Authenticated user extracted from a JWT token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let token = extract_token(parts)
            .ok_or_else(|| AppError::unauthorized("Missing authentication token"))?;

        let user_id = app_state
            .identity
            .resolve(&token)
            .map_err(|e| AppError::unauthorized(e.to_string()))?;

        Ok(Self { user_id })
    }
}

/// Token from, in order: the `token` cookie, a bearer `Authorization`
/// header, or a `token` query parameter
#[must_use]
pub fn extract_token(parts: &Parts) -> Option<String> {
    cookie_token(parts)
        .or_else(|| bearer_token(parts))
        .or_else(|| query_token(parts))
        .filter(|token| !token.is_empty())
}

fn cookie_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == TOKEN_COOKIE).then(|| value.to_string())
        })
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

fn query_token(parts: &Parts) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
}

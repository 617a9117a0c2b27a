//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs carrying the user id. Every request reloads the user
//! so the stored role, not anything in the token, decides access.

use anyhow::Result;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use boxoffice_models::{Role, User};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: u64,
}

pub fn issue_token(secret: &str, user: &User, ttl_hours: u64) -> Result<String> {
    let ttl = chrono::Duration::hours(i64::try_from(ttl_hours)?);
    let claims = Claims {
        sub: user.id.to_string(),
        email: user.email.clone(),
        exp: u64::try_from((Utc::now() + ttl).timestamp())?,
    };
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    let validation = Validation::new(Algorithm::HS256);
    match jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            debug!("Rejected token: {e}");
            None
        }
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized("Missing authorization header"))?;
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized("Expected a bearer token"))
}

/// Any authenticated user.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = verify_token(&state.jwt_secret, token)
            .ok_or(ApiError::Unauthorized("Invalid or expired token"))?;
        let user_id: i64 = claims
            .sub
            .parse()
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token"))?;
        let user = boxoffice_db::get_user(&state.pool, user_id)
            .await?
            .ok_or(ApiError::Unauthorized("User no longer exists"))?;
        Ok(AuthUser(user))
    }
}

async fn with_role(parts: &mut Parts, state: &AppState, role: Role) -> Result<User, ApiError> {
    let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
    if user.role != role {
        debug!(user_id = user.id, role = %user.role, required = %role, "Role check failed");
        return Err(ApiError::Forbidden);
    }
    Ok(user)
}

/// An authenticated user holding the `user` role (a ticket buyer).
#[derive(Debug, Clone)]
pub struct Customer(pub User);

impl FromRequestParts<AppState> for Customer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        with_role(parts, state, Role::User).await.map(Customer)
    }
}

/// An authenticated user holding the `organizer` role.
#[derive(Debug, Clone)]
pub struct Organizer(pub User);

impl FromRequestParts<AppState> for Organizer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        with_role(parts, state, Role::Organizer).await.map(Organizer)
    }
}

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use crate::{dto::auth::Claims, error::AppError, state::AppState};

/// Request header carrying the anonymous session id. Responses echo it back.
pub const SESSION_HEADER: &str = "x-session-id";

/// The caller's session, anonymous or not. Never rejects for lack of identity:
/// a request without a usable session id gets a fresh one, and so does a
/// request naming a user's session without that user's token.
#[derive(Debug, Clone, Copy)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub user_id: Option<Uuid>,
}

/// A caller whose bearer token names a live session bound to the token's user.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        bearer_user(parts, state)
            .await?
            .ok_or(AppError::Unauthenticated)
    }
}

impl FromRequestParts<AppState> for SessionContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = bearer_user(parts, state).await? {
            return Ok(SessionContext {
                session_id: user.session_id,
                user_id: Some(user.user_id),
            });
        }

        let presented = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok());

        // A logged-in session is only reachable through its bearer token.
        let session_id = match presented {
            Some(id) => {
                if state.sessions.session_owner(id).await?.is_none() {
                    id
                } else {
                    tracing::debug!(session_id = %id, "bound session presented without a token");
                    mint_session()
                }
            }
            None => mint_session(),
        };

        Ok(SessionContext {
            session_id,
            user_id: None,
        })
    }
}

fn mint_session() -> Uuid {
    let minted = Uuid::new_v4();
    tracing::debug!(session_id = %minted, "starting anonymous session");
    minted
}

/// Resolves the bearer token, if any, to an authenticated user.
///
/// A token only counts while the session it names is still bound to the same
/// user, so logging out or expiry invalidates it even before `exp`.
async fn bearer_user(parts: &Parts, state: &AppState) -> Result<Option<AuthUser>, AppError> {
    let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let Some(token) = auth_header
        .to_str()
        .ok()
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .map(str::trim)
    else {
        tracing::debug!("ignoring malformed Authorization header");
        return Ok(None);
    };

    let claims = match decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.security.jwt_secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(decoded) => decoded.claims,
        Err(err) => {
            tracing::debug!(error = %err, "rejecting bearer token");
            return Ok(None);
        }
    };

    let (Ok(user_id), Ok(session_id)) = (Uuid::parse_str(&claims.sub), Uuid::parse_str(&claims.sid))
    else {
        tracing::debug!("bearer token carries malformed ids");
        return Ok(None);
    };

    match state.sessions.session_user(session_id).await? {
        Some(bound) if bound == user_id => Ok(Some(AuthUser {
            user_id,
            session_id,
        })),
        _ => {
            tracing::debug!(%session_id, "bearer token names an ended session");
            Ok(None)
        }
    }
}

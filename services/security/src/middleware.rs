//! Middleware for session token validation and authentication

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{AppState, session::SessionToken};

/// The authenticated caller, inserted into request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: Uuid,
    pub session_id: String,
}

/// Validate the session token from the Authorization header
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(Authorization(bearer)) = req.headers().typed_get::<Authorization<Bearer>>() else {
        debug!("Request without bearer token");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let Some(token) = SessionToken::parse(bearer.token()) else {
        debug!("Malformed session token");
        return Err(StatusCode::UNAUTHORIZED);
    };

    if !state.security.sessions().authenticate(&token).await {
        warn!("Rejected invalid session for user {}", token.user_id);
        return Err(StatusCode::UNAUTHORIZED);
    }

    req.extensions_mut().insert(AuthSession {
        user_id: token.user_id,
        session_id: token.session_id,
    });
    Ok(next.run(req).await)
}

//! Security service routes

use std::net::SocketAddr;

use axum::{
    Extension, Json, Router,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    AppState,
    error::{SecurityError, SecurityResult},
    middleware::{AuthSession, auth_middleware},
    models::{AuthMethod, LoginActivityRecord, LoginStatus, SessionMetadata},
    repositories::verify_password,
    request_info::{RequestInfo, extract_request_info},
    security::RecordLoginParams,
};

/// Page size of the activity listing when none is given
pub const DEFAULT_ACTIVITY_LIMIT: i64 = 20;

/// Request for user login
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Response for user login
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user_id: Uuid,
    pub session_id: String,
    pub suspicious: bool,
}

#[derive(Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct RenameDeviceRequest {
    pub device_name: String,
}

/// Create the router for the security service
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/logout", post(logout))
        .route("/security/activity", get(login_activity))
        .route("/security/devices", get(active_devices))
        .route("/security/devices/logout-all", post(logout_all_devices))
        .route(
            "/security/devices/:session_id",
            delete(logout_device).patch(rename_device),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(login))
        .merge(protected)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.security.sessions().health_check().await;
    let database = match &state.db_pool {
        Some(pool) => common::database::health_check(pool).await.unwrap_or(false),
        None => true,
    };

    let status = if store && database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "service": "security-service",
            "session_store": store,
            "database": database,
        })),
    )
}

async fn record_failure(
    state: &AppState,
    user_id: Option<Uuid>,
    reason: &str,
    request: RequestInfo,
) -> SecurityResult<()> {
    state
        .security
        .record_login_attempt(RecordLoginParams {
            user_id,
            session_id: None,
            auth_method: AuthMethod::Password,
            two_factor_used: false,
            status: LoginStatus::Failed,
            failure_reason: Some(reason.to_string()),
            request,
        })
        .await?;
    Ok(())
}

/// Password login endpoint
pub async fn login(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> SecurityResult<impl IntoResponse> {
    let request = extract_request_info(&headers, peer.map(|ConnectInfo(addr)| addr));

    let Some(user) = state.users.find_by_username_or_email(&payload.username).await? else {
        record_failure(&state, None, "Unknown user", request).await?;
        return Err(SecurityError::InvalidCredentials);
    };

    let candidate = user.clone();
    let password = payload.password;
    let verified = tokio::task::spawn_blocking(move || verify_password(&candidate, &password))
        .await
        .map_err(|e| SecurityError::Internal(format!("Password verification failed: {}", e)))?;

    if !verified {
        record_failure(&state, Some(user.id), "Invalid password", request).await?;
        return Err(SecurityError::InvalidCredentials);
    }

    let sessions = state.security.sessions();
    let token = sessions
        .issue_session(user.id, SessionMetadata::from(&request))
        .await?;

    let record = state
        .security
        .record_login_attempt(RecordLoginParams {
            user_id: Some(user.id),
            session_id: Some(token.session_id.clone()),
            auth_method: AuthMethod::Password,
            two_factor_used: false,
            status: LoginStatus::Success,
            failure_reason: None,
            request,
        })
        .await?;
    state.security.spawn_session_maintenance(user.id);

    info!("User {} logged in", user.id);

    Ok(Json(LoginResponse {
        access_token: token.encode(),
        token_type: "Bearer".to_string(),
        expires_in: sessions.ttl_seconds(),
        user_id: token.user_id,
        session_id: token.session_id,
        suspicious: record.is_some_and(|r| r.is_suspicious),
    }))
}

/// Logout endpoint, revokes the calling session
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
) -> SecurityResult<StatusCode> {
    state
        .security
        .sessions()
        .revoke_session(auth.user_id, &auth.session_id)
        .await?;
    info!("User {} logged out", auth.user_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Login history of the caller
pub async fn login_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Query(query): Query<ActivityQuery>,
) -> SecurityResult<Json<Vec<LoginActivityRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT);
    let records = state
        .security
        .get_login_activity(auth.user_id, limit)
        .await?;
    Ok(Json(records))
}

/// Devices with a live session
pub async fn active_devices(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
) -> SecurityResult<impl IntoResponse> {
    let devices = state
        .security
        .get_active_devices(auth.user_id, &auth.session_id)
        .await?;
    Ok(Json(devices))
}

/// Sign out one device other than the calling one
pub async fn logout_device(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Path(session_id): Path<String>,
) -> SecurityResult<StatusCode> {
    if session_id == auth.session_id {
        return Err(SecurityError::Validation(
            "Use /auth/logout to sign out the current device".to_string(),
        ));
    }

    state
        .security
        .logout_device(auth.user_id, &session_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Sign out every device, the calling one included
pub async fn logout_all_devices(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
) -> SecurityResult<impl IntoResponse> {
    let revoked = state.security.logout_all_devices(auth.user_id).await?;
    Ok(Json(json!({ "revoked": revoked })))
}

/// Rename one of the caller's devices
pub async fn rename_device(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
    Path(session_id): Path<String>,
    Json(payload): Json<RenameDeviceRequest>,
) -> SecurityResult<StatusCode> {
    state
        .security
        .update_device_name(auth.user_id, &session_id, &payload.device_name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

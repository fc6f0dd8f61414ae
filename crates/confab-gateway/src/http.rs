//! HTTP edges: file upload, token-gated download, health.
//!
//! Downloads are the one place capability tokens are enforced: the token
//! must verify, its claims must name exactly the requested key, the key
//! must belong to the token's subject, and when a trusted identity header
//! is present it must match the subject too.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use confab_auth::identity::{resolve_identity, IDENTITY_HEADER};
use confab_core::types::session::FileSource;
use confab_core::GatewayError;
use confab_storage::ObjectStore;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::state::AppState;
use crate::ws;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/ws", any(ws::ws_handler))
        .route("/api/files", post(upload_file).get(list_files))
        .route("/api/files/stats", get(file_stats))
        .route("/api/files/download/{*key}", get(download_file))
}

/// Error envelope for the REST edge.
pub struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::Validation(_) | GatewayError::Protocol(_) => StatusCode::BAD_REQUEST,
            GatewayError::Auth(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut response = (
            status,
            Json(json!({ "type": "error", "message": self.0.user_message() })),
        )
            .into_response();
        if let GatewayError::RateLimited { retry_after } = &self.0 {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.sessions.count().await,
    }))
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    filename: String,
    content_base64: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .limiter
        .check(&addr.ip().to_string(), "/api/files")
        .map_err(GatewayError::from)?;
    let user = identify(&state, &headers)?;

    let metadata = state
        .store
        .upload(
            &user,
            &request.filename,
            &request.content_base64,
            request.content_type.as_deref().unwrap_or(""),
            request.tags,
            FileSource::User,
        )
        .await
        .map_err(GatewayError::from)?;
    Ok(Json(serde_json::to_value(metadata).map_err(GatewayError::from)?))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    source: Option<FileSource>,
}

/// The user's own stored objects. No token needed: identity scopes access.
async fn list_files(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .limiter
        .check(&addr.ip().to_string(), "/api/files")
        .map_err(GatewayError::from)?;
    let user = identify(&state, &headers)?;

    let listing = state
        .store
        .list(
            &user,
            confab_storage::ListFilter {
                source: query.source,
                limit: query.limit,
            },
        )
        .await
        .map_err(GatewayError::from)?;
    Ok(Json(json!({ "files": listing })))
}

async fn file_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .limiter
        .check(&addr.ip().to_string(), "/api/files/stats")
        .map_err(GatewayError::from)?;
    let user = identify(&state, &headers)?;
    let stats = state.store.stats(&user).await.map_err(GatewayError::from)?;
    Ok(Json(serde_json::to_value(stats).map_err(GatewayError::from)?))
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    token: Option<String>,
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Response, ApiError> {
    state
        .limiter
        .check(&addr.ip().to_string(), "/api/files/download")
        .map_err(GatewayError::from)?;

    let token = query
        .token
        .as_deref()
        .ok_or_else(|| GatewayError::auth("missing capability token"))?;

    // The key's owner is the only acceptable subject; a presented identity
    // header must agree with it.
    let owner = confab_storage::key::key_owner(&key)
        .ok_or_else(|| GatewayError::auth("key is not user-scoped"))?
        .to_string();
    if let Some(identity) = headers.get(IDENTITY_HEADER).and_then(|v| v.to_str().ok()) {
        if identity.trim() != owner {
            warn!("download identity does not match object owner");
            return Err(GatewayError::auth("token subject mismatch").into());
        }
    }

    let claims = state
        .minter
        .verify(token, &owner)
        .map_err(GatewayError::from)?;
    if claims.key != key {
        return Err(GatewayError::auth("token does not cover this object").into());
    }

    let object = state
        .store
        .get(&claims.subject, &key)
        .await
        .map_err(GatewayError::from)?
        .ok_or_else(|| GatewayError::validation("object not found"))?;

    let bytes = STANDARD
        .decode(&object.content_base64)
        .map_err(|e| GatewayError::internal(format!("stored object is not base64: {e}")))?;

    let response = (
        [
            (header::CONTENT_TYPE, object.metadata.content_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", object.metadata.filename),
            ),
        ],
        bytes,
    )
        .into_response();
    Ok(response)
}

fn identify(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let header_identity = headers.get(IDENTITY_HEADER).and_then(|v| v.to_str().ok());
    resolve_identity(
        header_identity,
        state.settings.debug,
        &state.settings.debug_user,
    )
    .map_err(|e| ApiError(GatewayError::from(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_statuses() {
        let cases = [
            (GatewayError::validation("x"), StatusCode::BAD_REQUEST),
            (GatewayError::auth("x"), StatusCode::FORBIDDEN),
            (GatewayError::rate_limited(5), StatusCode::TOO_MANY_REQUESTS),
            (GatewayError::upstream("llm", "x"), StatusCode::BAD_GATEWAY),
            (GatewayError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            let response = ApiError(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn rate_limit_response_carries_retry_after() {
        let response = ApiError(GatewayError::rate_limited(7)).into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
    }
}

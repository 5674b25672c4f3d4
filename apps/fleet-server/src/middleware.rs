//! Operator bearer gate, per-IP API rate limiting, and capped JSON bodies
//! (§4.F). Device-token auth is body-carried and enforced inside
//! [`crate::service::Service`], not here.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequest, FromRequestParts, Query, Request, State};
use axum::http::header;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::de::DeserializeOwned;

use crate::error::FleetError;
use crate::security::resolve_client_ip;
use crate::state::AppState;

/// Requires `Authorization: Bearer <token>` to name a live operator session.
pub async fn operator_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => return FleetError::MissingBearer.into_response(),
    };

    match state.service.validate_operator(token, Utc::now()) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

/// Enforces the per-IP fixed-window limit on everything under `/api/*`.
pub async fn api_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = resolve_client_ip(
        request.headers(),
        &addr.ip().to_string(),
        state.config.trust_proxy_headers,
    );
    match state.api_rate_limiter.check(&client_ip, Utc::now()) {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => FleetError::ApiRateExceeded { retry_after_secs }.into_response(),
    }
}

/// JSON body extractor capped at `state.config.max_json_bytes`, rejecting
/// unknown fields and trailing content (§4.F body decoding rules).
pub struct ApiJson<T>(pub T);

impl<T> FromRequest<AppState> for ApiJson<T>
where
    T: DeserializeOwned,
{
    type Rejection = FleetError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        decode_json_capped(req, state.config.max_json_bytes).await.map(ApiJson)
    }
}

/// Same as [`ApiJson`] but capped at `state.config.max_artifact_bytes`, for
/// the artifact upload route.
pub struct ArtifactJson<T>(pub T);

impl<T> FromRequest<AppState> for ArtifactJson<T>
where
    T: DeserializeOwned,
{
    type Rejection = FleetError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        decode_json_capped(req, state.config.max_artifact_bytes).await.map(ArtifactJson)
    }
}

/// Query-string extractor whose rejection renders through [`FleetError`]
/// instead of Axum's own plain-text `QueryRejection`, so a malformed or
/// missing query string produces the same `{"error": "<code>"}` envelope
/// as every other decode failure in this codebase.
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = FleetError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| ApiQuery(value))
            .map_err(|_| FleetError::InvalidJson)
    }
}

async fn decode_json_capped<T: DeserializeOwned>(req: Request, limit: usize) -> Result<T, FleetError> {
    let bytes = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|_| FleetError::PayloadTooLarge)?;

    let mut de = serde_json::Deserializer::from_slice(&bytes);
    let value = T::deserialize(&mut de).map_err(|_| FleetError::InvalidJson)?;
    de.end().map_err(|_| FleetError::InvalidJson)?;
    Ok(value)
}

//! Closed error-kind set and its HTTP rendering (§7, §4.F).

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("invalid_operator_password")]
    InvalidOperatorPassword,
    #[error("invalid_operator_token")]
    InvalidOperatorToken,
    #[error("invalid_device_token")]
    InvalidDeviceToken,
    #[error("invalid_enroll_key")]
    InvalidEnrollKey,
    #[error("missing_bearer")]
    MissingBearer,

    #[error("device_not_found")]
    DeviceNotFound,
    #[error("command_not_found")]
    CommandNotFound,
    #[error("artifact_not_found")]
    ArtifactNotFound,

    #[error("fleet_limit_reached")]
    FleetLimitReached,
    #[error("device_exists_with_other_identity")]
    DeviceIdentityConflict,
    #[error("unsupported_command_type")]
    UnsupportedCommandType,

    #[error("missing_required_field")]
    MissingRequiredField,
    #[error("invalid_json")]
    InvalidJson,
    #[error("payload_too_large")]
    PayloadTooLarge,
    #[error("invalid_base64")]
    InvalidBase64,
    #[error("empty_artifact_payload")]
    EmptyArtifactPayload,

    #[error("login_rate_exceeded")]
    LoginRateExceeded { retry_after_secs: u64 },
    #[error("api_rate_exceeded")]
    ApiRateExceeded { retry_after_secs: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl FleetError {
    fn status(&self) -> StatusCode {
        match self {
            FleetError::InvalidOperatorPassword
            | FleetError::InvalidOperatorToken
            | FleetError::InvalidDeviceToken
            | FleetError::InvalidEnrollKey
            | FleetError::MissingBearer => StatusCode::UNAUTHORIZED,

            FleetError::DeviceNotFound
            | FleetError::CommandNotFound
            | FleetError::ArtifactNotFound => StatusCode::NOT_FOUND,

            FleetError::FleetLimitReached
            | FleetError::DeviceIdentityConflict => StatusCode::CONFLICT,

            FleetError::UnsupportedCommandType
            | FleetError::MissingRequiredField
            | FleetError::InvalidJson
            | FleetError::PayloadTooLarge
            | FleetError::InvalidBase64
            | FleetError::EmptyArtifactPayload => StatusCode::BAD_REQUEST,

            FleetError::LoginRateExceeded { .. } | FleetError::ApiRateExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }

            FleetError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The wire code, i.e. `error.to_string()` minus the block-duration
    /// variant's formatted message (callers should prefer `self.code()`
    /// over `Display` when rendering the body).
    fn code(&self) -> String {
        match self {
            FleetError::LoginRateExceeded { .. } => "login_rate_exceeded".to_string(),
            FleetError::ApiRateExceeded { .. } => "api_rate_exceeded".to_string(),
            other => other.to_string(),
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            FleetError::LoginRateExceeded { retry_after_secs } => Some(*retry_after_secs),
            FleetError::ApiRateExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after();
        let body = ErrorBody { error: &self.code() };
        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = header::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type FleetResult<T> = Result<T, FleetError>;

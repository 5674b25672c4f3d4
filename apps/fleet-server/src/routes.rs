//! Route table assembly (§6) and middleware ordering (§4.F).

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::handlers::{device, operator};
use crate::middleware::{api_rate_limit, operator_auth};
use crate::security::security_headers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let operator_protected = Router::new()
        .route("/operator/capabilities", get(operator::capabilities))
        .route("/devices", get(operator::list_devices))
        .route("/devices/:device_id", get(operator::get_device))
        .route("/devices/:device_id/telemetry", get(operator::list_telemetry))
        .route("/devices/:device_id/commands", get(operator::list_commands))
        .route("/commands", post(operator::create_command))
        .route("/artifacts", post(operator::upload_artifact))
        .route("/artifacts/:artifact_id", get(operator::get_artifact))
        .route_layer(middleware::from_fn_with_state(state.clone(), operator_auth));

    let operator_public = Router::new().route("/operator/login", post(operator::login));

    let device_routes = Router::new()
        .route("/device/register", post(device::register))
        .route("/device/heartbeat", post(device::heartbeat))
        .route("/device/telemetry", post(device::telemetry))
        .route("/device/location", post(device::location))
        .route("/device/commands/pull", post(device::pull_command))
        .route("/device/commands/:command_id/result", post(device::command_result))
        .route("/device/artifacts/:artifact_id", get(device::get_artifact));

    let api = operator_protected
        .merge(operator_public)
        .merge(device_routes)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(state.clone(), api_rate_limit));

    let static_dir = ServeDir::new(&state.config.static_dir);

    Router::new()
        .nest("/api/v1", api)
        .fallback_service(static_dir)
        .layer(middleware::from_fn_with_state(state.clone(), security_headers))
        .with_state(state)
}

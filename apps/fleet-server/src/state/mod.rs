pub mod model;
pub mod store;

use std::sync::Arc;

pub use model::{
    Artifact, ArtifactSummary, Command, CommandResult, CommandStatus, CommandType, Device,
    DeviceStatus, DeviceView, LocationSample, TelemetrySample,
};
pub use store::StateStore;

use crate::config::Config;
use crate::security::{ApiRateLimiter, LoginGuard};
use crate::service::Service;

/// Shared application state threaded through every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<Service>,
    pub api_rate_limiter: Arc<ApiRateLimiter>,
    pub login_guard: Arc<LoginGuard>,
}

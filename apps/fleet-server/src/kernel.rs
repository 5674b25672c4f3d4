//! Composition root: wires config into state, binds the listener, serves
//! with graceful shutdown (§5, §6 exit codes).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use chrono::Duration;
use thiserror::Error;
use tracing::info;

use crate::auth::OperatorAuth;
use crate::config::Config;
use crate::routes::build_router;
use crate::security::{ApiRateLimiter, LoginGuard};
use crate::service::Service;
use crate::state::{AppState, StateStore};

const GRACEFUL_SHUTDOWN_DEADLINE: StdDuration = StdDuration::from_secs(5);

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("loading state snapshot: {0}")]
    State(#[from] crate::error::FleetError),
    #[error("invalid listen address {0:?}: {1}")]
    Addr(String, std::net::AddrParseError),
    #[error("loading TLS materials: {0}")]
    Tls(std::io::Error),
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Composes [`AppState`] from a validated [`Config`].
pub fn build_state(config: Config) -> Result<AppState, KernelError> {
    let store = Arc::new(StateStore::load(&config.data_file)?);
    let auth = Arc::new(OperatorAuth::new(
        config.operator_password.clone(),
        Duration::seconds(config.operator_token_ttl_secs),
    ));
    let service = Arc::new(Service::new(
        store,
        auth,
        config.device_enroll_key.clone(),
        config.fleet_limit,
        Duration::seconds(config.device_offline_after_secs),
    ));
    let api_rate_limiter = Arc::new(ApiRateLimiter::new(config.api_rate_per_minute));
    let login_guard = Arc::new(LoginGuard::new(config.login_burst, config.login_rate_per_minute));

    Ok(AppState {
        config: Arc::new(config),
        service,
        api_rate_limiter,
        login_guard,
    })
}

/// Binds and serves until a `ctrl_c` signal, then drains in-flight
/// requests for up to 5 seconds before returning.
pub async fn serve(state: AppState) -> Result<(), KernelError> {
    let router = build_router(state.clone());
    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, draining in-flight requests");
        shutdown_handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_DEADLINE));
    });

    if state.config.tls_enabled() {
        let addr: SocketAddr = state
            .config
            .https_addr
            .clone()
            .expect("tls_enabled implies https_addr is set")
            .parse()
            .map_err(|e| KernelError::Addr(state.config.https_addr.clone().unwrap(), e))?;
        let cert = state.config.tls_cert_file.clone().expect("validated");
        let key = state.config.tls_key_file.clone().expect("validated");
        let tls_config = RustlsConfig::from_pem_file(cert, key)
            .await
            .map_err(KernelError::Tls)?;

        info!(%addr, "listening (tls)");
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(make_service)
            .await
            .map_err(KernelError::Serve)?;
    } else {
        let addr: SocketAddr = state
            .config
            .http_addr
            .parse()
            .map_err(|e| KernelError::Addr(state.config.http_addr.clone(), e))?;

        info!(%addr, "listening (http)");
        axum_server::bind(addr)
            .handle(handle)
            .serve(make_service)
            .await
            .map_err(KernelError::Serve)?;
    }

    Ok(())
}

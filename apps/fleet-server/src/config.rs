//! Process configuration: CLI flags with environment fallback (§4.B).

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

#[derive(Debug, Parser, Clone)]
#[command(name = "fleet-server", about = "LTE/SWD fleet control-plane server")]
pub struct Config {
    /// Plain-HTTP listen address.
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,

    /// HTTPS listen address. Requires `tls_cert_file` and `tls_key_file`.
    #[arg(long, env = "HTTPS_ADDR")]
    pub https_addr: Option<String>,

    #[arg(long, env = "TLS_CERT_FILE")]
    pub tls_cert_file: Option<PathBuf>,

    #[arg(long, env = "TLS_KEY_FILE")]
    pub tls_key_file: Option<PathBuf>,

    #[arg(long, env = "OPERATOR_PASSWORD")]
    pub operator_password: String,

    #[arg(long, env = "DEVICE_ENROLL_KEY")]
    pub device_enroll_key: String,

    #[arg(long, env = "DATA_FILE", default_value = "fleet-data.json")]
    pub data_file: PathBuf,

    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    #[arg(long, env = "FLEET_LIMIT", default_value_t = 64)]
    pub fleet_limit: usize,

    /// Operator session TTL, in seconds.
    #[arg(long, env = "OPERATOR_TOKEN_TTL_SECS", default_value_t = 12 * 3600)]
    pub operator_token_ttl_secs: i64,

    /// Device staleness threshold, in seconds.
    #[arg(long, env = "DEVICE_OFFLINE_AFTER_SECS", default_value_t = 90)]
    pub device_offline_after_secs: i64,

    #[arg(long, env = "MAX_JSON_BYTES", default_value_t = 64 * 1024)]
    pub max_json_bytes: usize,

    #[arg(long, env = "MAX_ARTIFACT_BYTES", default_value_t = 16 * 1024 * 1024)]
    pub max_artifact_bytes: usize,

    #[arg(long, env = "API_RATE_PER_MINUTE", default_value_t = 600)]
    pub api_rate_per_minute: u32,

    #[arg(long, env = "LOGIN_RATE_PER_MINUTE", default_value_t = 30)]
    pub login_rate_per_minute: u32,

    #[arg(long, env = "LOGIN_BURST", default_value_t = 5)]
    pub login_burst: u32,

    #[arg(long, env = "TRUST_PROXY_HEADERS", default_value_t = false)]
    pub trust_proxy_headers: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("https_addr, tls_cert_file and tls_key_file must be set together or all omitted")]
    IncompleteTls,
    #[error("operator_password must not be empty")]
    EmptyOperatorPassword,
    #[error("device_enroll_key must not be empty")]
    EmptyEnrollKey,
    #[error("fleet_limit must be greater than zero")]
    ZeroFleetLimit,
    #[error("max_json_bytes must be at least 1024")]
    JsonCapTooSmall,
    #[error("max_artifact_bytes must be at least max_json_bytes")]
    ArtifactCapTooSmall,
    #[error("api_rate_per_minute, login_rate_per_minute and login_burst must be positive")]
    NonPositiveRate,
}

impl Config {
    /// Loads configuration from CLI args and environment, `.env` already
    /// merged in by the caller (ambient: `main` calls `dotenvy::dotenv` first).
    pub fn load() -> Self {
        Config::parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tls_fields = [
            self.https_addr.is_some(),
            self.tls_cert_file.is_some(),
            self.tls_key_file.is_some(),
        ];
        if tls_fields.iter().any(|x| *x) && !tls_fields.iter().all(|x| *x) {
            return Err(ConfigError::IncompleteTls);
        }
        if self.operator_password.is_empty() {
            return Err(ConfigError::EmptyOperatorPassword);
        }
        if self.device_enroll_key.is_empty() {
            return Err(ConfigError::EmptyEnrollKey);
        }
        if self.fleet_limit == 0 {
            return Err(ConfigError::ZeroFleetLimit);
        }
        if self.max_json_bytes < 1024 {
            return Err(ConfigError::JsonCapTooSmall);
        }
        if self.max_artifact_bytes < self.max_json_bytes {
            return Err(ConfigError::ArtifactCapTooSmall);
        }
        if self.api_rate_per_minute == 0 || self.login_rate_per_minute == 0 || self.login_burst == 0 {
            return Err(ConfigError::NonPositiveRate);
        }
        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        self.https_addr.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            http_addr: "0.0.0.0:8080".into(),
            https_addr: None,
            tls_cert_file: None,
            tls_key_file: None,
            operator_password: "pw".into(),
            device_enroll_key: "key".into(),
            data_file: "data.json".into(),
            static_dir: "static".into(),
            fleet_limit: 10,
            operator_token_ttl_secs: 3600,
            device_offline_after_secs: 90,
            max_json_bytes: 2048,
            max_artifact_bytes: 4096,
            api_rate_per_minute: 60,
            login_rate_per_minute: 10,
            login_burst: 5,
            trust_proxy_headers: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn partial_tls_is_rejected() {
        let mut c = base();
        c.https_addr = Some("0.0.0.0:8443".into());
        assert!(matches!(c.validate(), Err(ConfigError::IncompleteTls)));
    }

    #[test]
    fn artifact_cap_below_json_cap_is_rejected() {
        let mut c = base();
        c.max_artifact_bytes = c.max_json_bytes - 1;
        assert!(matches!(c.validate(), Err(ConfigError::ArtifactCapTooSmall)));
    }
}

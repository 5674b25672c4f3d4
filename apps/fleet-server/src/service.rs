//! Domain rules layered over the state store and operator auth (§4.E).
//!
//! Stateless: every method takes what it needs and delegates storage to
//! [`StateStore`], auth to [`OperatorAuth`]. This is the seam unit tests
//! exercise without going through HTTP.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use subtle::ConstantTimeEq;

use crate::auth::OperatorAuth;
use crate::error::{FleetError, FleetResult};
use crate::state::{
    Artifact, Command, CommandResult, CommandType, Device, LocationSample, StateStore,
    TelemetrySample,
};

pub struct RegisterOutcome {
    pub device_token: String,
    pub poll_interval_sec: u64,
    pub heartbeat_interval_sec: u64,
}

pub struct LoginOutcome {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct Service {
    store: Arc<StateStore>,
    auth: Arc<OperatorAuth>,
    enroll_key: String,
    fleet_limit: usize,
    device_offline_after: Duration,
}

impl Service {
    pub fn new(
        store: Arc<StateStore>,
        auth: Arc<OperatorAuth>,
        enroll_key: String,
        fleet_limit: usize,
        device_offline_after: Duration,
    ) -> Self {
        Service {
            store,
            auth,
            enroll_key,
            fleet_limit,
            device_offline_after,
        }
    }

    pub fn login_operator(&self, password: &str, now: DateTime<Utc>) -> FleetResult<LoginOutcome> {
        let (token, expires_at) = self.auth.login(password.trim(), now)?;
        Ok(LoginOutcome { token, expires_at })
    }

    pub fn validate_operator(&self, token: &str, now: DateTime<Utc>) -> FleetResult<()> {
        self.auth.validate(token, now)
    }

    pub fn register_device(
        &self,
        enroll_key: &str,
        device_id: &str,
        hw_uid: &str,
        modem_imei: &str,
        sim_iccid: &str,
        firmware_version: &str,
        now: DateTime<Utc>,
    ) -> FleetResult<RegisterOutcome> {
        let ok: bool = self.enroll_key.as_bytes().ct_eq(enroll_key.as_bytes()).into();
        if !ok {
            return Err(FleetError::InvalidEnrollKey);
        }
        if device_id.is_empty() {
            return Err(FleetError::MissingRequiredField);
        }

        let (device, _created) = self.store.register_device(
            device_id,
            hw_uid,
            modem_imei,
            sim_iccid,
            firmware_version,
            self.fleet_limit,
            now,
        )?;

        Ok(RegisterOutcome {
            device_token: device.device_token,
            poll_interval_sec: 3,
            heartbeat_interval_sec: 10,
        })
    }

    fn require_device_fields(device_id: &str, device_token: &str) -> FleetResult<()> {
        if device_id.is_empty() || device_token.is_empty() {
            return Err(FleetError::MissingRequiredField);
        }
        Ok(())
    }

    pub fn device_heartbeat(&self, device_id: &str, device_token: &str, now: DateTime<Utc>) -> FleetResult<()> {
        Self::require_device_fields(device_id, device_token)?;
        self.store.heartbeat(device_id, device_token, now)
    }

    pub fn device_telemetry(
        &self,
        device_id: &str,
        device_token: &str,
        sample: TelemetrySample,
        now: DateTime<Utc>,
    ) -> FleetResult<()> {
        Self::require_device_fields(device_id, device_token)?;
        self.store.telemetry(device_id, device_token, sample, now)
    }

    pub fn device_location(
        &self,
        device_id: &str,
        device_token: &str,
        sample: LocationSample,
        now: DateTime<Utc>,
    ) -> FleetResult<()> {
        Self::require_device_fields(device_id, device_token)?;
        self.store.location(device_id, device_token, sample, now)
    }

    pub fn device_pull_command(
        &self,
        device_id: &str,
        device_token: &str,
        now: DateTime<Utc>,
    ) -> FleetResult<Option<Command>> {
        Self::require_device_fields(device_id, device_token)?;
        self.store.pull_next_command(device_id, device_token, now)
    }

    pub fn device_command_result(
        &self,
        device_id: &str,
        device_token: &str,
        command_id: &str,
        mut result: CommandResult,
        now: DateTime<Utc>,
    ) -> FleetResult<Command> {
        Self::require_device_fields(device_id, device_token)?;
        if result.status != "success" {
            result.status = "failed".to_string();
        }
        self.store
            .complete_command(device_id, device_token, command_id, result, now)
    }

    pub fn device_get_artifact(
        &self,
        device_id: &str,
        device_token: &str,
        artifact_id: &str,
        now: DateTime<Utc>,
    ) -> FleetResult<Artifact> {
        Self::require_device_fields(device_id, device_token)?;
        self.store.validate_device_token(device_id, device_token, now)?;
        self.store.get_artifact(artifact_id)
    }

    pub fn list_devices(&self, now: DateTime<Utc>) -> FleetResult<Vec<Device>> {
        self.store.list_devices(self.device_offline_after, now)
    }

    pub fn get_device(&self, device_id: &str, now: DateTime<Utc>) -> FleetResult<Device> {
        self.store.get_device(device_id, self.device_offline_after, now)
    }

    pub fn list_telemetry(&self, device_id: &str, limit: usize) -> FleetResult<Vec<TelemetrySample>> {
        self.store.list_telemetry(device_id, limit)
    }

    pub fn list_commands(&self, device_id: &str, limit: usize) -> FleetResult<Vec<Command>> {
        self.store.list_commands(device_id, limit)
    }

    pub fn create_command(
        &self,
        device_id: &str,
        command_type: &str,
        payload: Option<serde_json::Value>,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> FleetResult<Command> {
        let kind = CommandType::from_str(command_type).map_err(|_| FleetError::UnsupportedCommandType)?;
        let payload = payload.unwrap_or_else(|| serde_json::json!({}));
        self.store.add_command(device_id, kind, payload, created_by, now)
    }

    pub fn upload_artifact(
        &self,
        name: &str,
        content_type: Option<&str>,
        payload: Vec<u8>,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> FleetResult<Artifact> {
        if name.is_empty() {
            return Err(FleetError::MissingRequiredField);
        }
        if payload.is_empty() {
            return Err(FleetError::EmptyArtifactPayload);
        }
        let content_type = content_type.filter(|s| !s.is_empty()).unwrap_or("application/octet-stream");
        self.store.save_artifact(name, content_type, payload, created_by, now)
    }

    pub fn get_artifact(&self, artifact_id: &str) -> FleetResult<Artifact> {
        self.store.get_artifact(artifact_id)
    }

    /// The closed command-type set, sorted lexicographically (§4.E).
    pub fn supported_command_types(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = CommandType::ALL.iter().map(|c| c.as_wire()).collect();
        names.sort_unstable();
        names
    }
}

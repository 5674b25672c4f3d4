//! Entity types held by the state store (§3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Device liveness, derived on every read from `last_seen_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    #[serde(default)]
    pub hw_uid: String,
    #[serde(default)]
    pub modem_imei: String,
    #[serde(default)]
    pub sim_iccid: String,
    #[serde(default)]
    pub firmware_version: String,
    pub device_token: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_telemetry_at: Option<DateTime<Utc>>,
    pub last_location_at: Option<DateTime<Utc>>,
    pub status: DeviceStatus,
    pub last_telemetry: Option<TelemetrySample>,
    pub last_location: Option<LocationSample>,
}

/// The subset of [`Device`] handed back over HTTP — `device_token` is a
/// credential, never echoed back in operator-facing reads.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    pub device_id: String,
    pub hw_uid: String,
    pub modem_imei: String,
    pub sim_iccid: String,
    pub firmware_version: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_telemetry_at: Option<DateTime<Utc>>,
    pub last_location_at: Option<DateTime<Utc>>,
    pub status: DeviceStatus,
    pub last_telemetry: Option<TelemetrySample>,
    pub last_location: Option<LocationSample>,
}

impl From<&Device> for DeviceView {
    fn from(d: &Device) -> Self {
        DeviceView {
            device_id: d.device_id.clone(),
            hw_uid: d.hw_uid.clone(),
            modem_imei: d.modem_imei.clone(),
            sim_iccid: d.sim_iccid.clone(),
            firmware_version: d.firmware_version.clone(),
            registered_at: d.registered_at,
            last_seen_at: d.last_seen_at,
            last_heartbeat_at: d.last_heartbeat_at,
            last_telemetry_at: d.last_telemetry_at,
            last_location_at: d.last_location_at,
            status: d.status,
            last_telemetry: d.last_telemetry.clone(),
            last_location: d.last_location.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub battery_mv: i64,
    pub supply_mv: i64,
    pub temperature_c: f64,
    pub rssi_dbm: i64,
    pub network_state: String,
    pub uptime_sec: i64,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSample {
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
    pub accuracy_m: f64,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Queued,
    Dispatched,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: String,
    pub device_id: String,
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub payload: Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: CommandStatus,
    pub result: Option<CommandResult>,
}

/// The closed set of SWD operations a device may be asked to perform (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    SwdConnect,
    SwdReadMemory,
    SwdWriteMemory,
    SwdErase,
    SwdProgram,
    SwdVerify,
    SwdCopyFirmware,
    SwdReset,
}

impl CommandType {
    /// The closed set, sorted lexicographically by wire name (§4.E).
    pub const ALL: [CommandType; 8] = [
        CommandType::SwdConnect,
        CommandType::SwdCopyFirmware,
        CommandType::SwdErase,
        CommandType::SwdProgram,
        CommandType::SwdReadMemory,
        CommandType::SwdReset,
        CommandType::SwdVerify,
        CommandType::SwdWriteMemory,
    ];

    pub fn as_wire(self) -> &'static str {
        match self {
            CommandType::SwdConnect => "swd_connect",
            CommandType::SwdReadMemory => "swd_read_memory",
            CommandType::SwdWriteMemory => "swd_write_memory",
            CommandType::SwdErase => "swd_erase",
            CommandType::SwdProgram => "swd_program",
            CommandType::SwdVerify => "swd_verify",
            CommandType::SwdCopyFirmware => "swd_copy_firmware",
            CommandType::SwdReset => "swd_reset",
        }
    }
}

impl std::str::FromStr for CommandType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|c| c.as_wire() == s).ok_or(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    pub name: String,
    pub content_type: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub payload_sha256: String,
}

/// Metadata-only view returned by the upload endpoint (no payload bytes).
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub artifact_id: String,
    pub name: String,
    pub content_type: String,
    pub size: usize,
    pub payload_sha256: String,
}

impl From<&Artifact> for ArtifactSummary {
    fn from(a: &Artifact) -> Self {
        ArtifactSummary {
            artifact_id: a.artifact_id.clone(),
            name: a.name.clone(),
            content_type: a.content_type.clone(),
            size: a.payload.len(),
            payload_sha256: a.payload_sha256.clone(),
        }
    }
}

/// `serde(with = "base64_bytes")` — persists byte vectors as base64 strings
/// in the JSON snapshot rather than serde_json's default array-of-numbers.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

//! Authoritative in-memory state with atomic file snapshot (§4.C).

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{FleetError, FleetResult};
use crate::state::model::{
    Artifact, Command, CommandResult, CommandStatus, CommandType, Device, DeviceStatus,
    LocationSample, TelemetrySample,
};
use crate::tokens::random_token;

const TELEMETRY_RING_CAP: usize = 500;

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    devices: HashMap<String, Device>,
    #[serde(default)]
    telemetry_by_id: HashMap<String, VecDeque<TelemetrySample>>,
    #[serde(default)]
    commands_by_id: HashMap<String, Command>,
    #[serde(default)]
    artifacts: HashMap<String, Artifact>,
}

struct StateInner {
    devices: HashMap<String, Device>,
    telemetry_by_id: HashMap<String, VecDeque<TelemetrySample>>,
    commands_by_id: HashMap<String, Command>,
    artifacts: HashMap<String, Artifact>,
}

impl From<Snapshot> for StateInner {
    fn from(s: Snapshot) -> Self {
        StateInner {
            devices: s.devices,
            telemetry_by_id: s.telemetry_by_id,
            commands_by_id: s.commands_by_id,
            artifacts: s.artifacts,
        }
    }
}

impl StateInner {
    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            devices: self.devices.clone(),
            telemetry_by_id: self.telemetry_by_id.clone(),
            commands_by_id: self.commands_by_id.clone(),
            artifacts: self.artifacts.clone(),
        }
    }

    fn device_commands(&self, device_id: &str) -> Vec<Command> {
        let mut cmds: Vec<Command> = self
            .commands_by_id
            .values()
            .filter(|c| c.device_id == device_id)
            .cloned()
            .collect();
        cmds.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.command_id.cmp(&b.command_id)));
        cmds
    }

    fn refresh_status(&mut self, device_id: &str, offline_after: Duration, now: DateTime<Utc>) {
        if let Some(d) = self.devices.get_mut(device_id) {
            d.status = if now - d.last_seen_at <= offline_after {
                DeviceStatus::Online
            } else {
                DeviceStatus::Offline
            };
        }
    }
}

/// Single owner of all domain data, guarded by one coarse multi-reader /
/// single-writer lock (§5). Every mutation writes a full snapshot before
/// the holding call returns.
pub struct StateStore {
    inner: RwLock<StateInner>,
    data_file: PathBuf,
}

impl StateStore {
    /// Loads `data_file` if present (missing = empty state); malformed
    /// contents are a startup error.
    pub fn load(data_file: impl AsRef<Path>) -> FleetResult<Self> {
        let data_file = data_file.as_ref().to_path_buf();
        let snapshot = match fs::read(&data_file) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| FleetError::Internal(format!("malformed snapshot: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(FleetError::Internal(format!("reading snapshot: {e}"))),
        };
        Ok(StateStore {
            inner: RwLock::new(snapshot.into()),
            data_file,
        })
    }

    fn persist(&self, inner: &StateInner) -> FleetResult<()> {
        let snapshot = inner.to_snapshot();
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| FleetError::Internal(format!("serializing snapshot: {e}")))?;
        if let Some(parent) = self.data_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| FleetError::Internal(format!("creating data dir: {e}")))?;
            }
        }
        let tmp = self.data_file.with_extension("tmp");
        fs::write(&tmp, &json).map_err(|e| FleetError::Internal(format!("writing snapshot: {e}")))?;
        fs::rename(&tmp, &self.data_file)
            .map_err(|e| FleetError::Internal(format!("renaming snapshot: {e}")))?;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StateInner> {
        self.inner.read().expect("state lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StateInner> {
        self.inner.write().expect("state lock poisoned")
    }

    pub fn register_device(
        &self,
        device_id: &str,
        hw_uid: &str,
        modem_imei: &str,
        sim_iccid: &str,
        firmware_version: &str,
        fleet_limit: usize,
        now: DateTime<Utc>,
    ) -> FleetResult<(Device, bool)> {
        let mut state = self.write();

        if let Some(existing) = state.devices.get(device_id) {
            let hw_conflict = !hw_uid.is_empty() && !existing.hw_uid.is_empty() && existing.hw_uid != hw_uid;
            let imei_conflict =
                !modem_imei.is_empty() && !existing.modem_imei.is_empty() && existing.modem_imei != modem_imei;
            if hw_conflict || imei_conflict {
                return Err(FleetError::DeviceIdentityConflict);
            }

            let device = state.devices.get_mut(device_id).expect("checked above");
            if device.hw_uid.is_empty() && !hw_uid.is_empty() {
                device.hw_uid = hw_uid.to_string();
            }
            if device.modem_imei.is_empty() && !modem_imei.is_empty() {
                device.modem_imei = modem_imei.to_string();
            }
            if device.sim_iccid.is_empty() && !sim_iccid.is_empty() {
                device.sim_iccid = sim_iccid.to_string();
            }
            if !firmware_version.is_empty() {
                device.firmware_version = firmware_version.to_string();
            }
            device.last_seen_at = now;
            device.last_heartbeat_at = Some(now);
            device.status = DeviceStatus::Online;
            let out = device.clone();
            self.persist(&state)?;
            return Ok((out, false));
        }

        if state.devices.len() >= fleet_limit {
            return Err(FleetError::FleetLimitReached);
        }

        let device = Device {
            device_id: device_id.to_string(),
            hw_uid: hw_uid.to_string(),
            modem_imei: modem_imei.to_string(),
            sim_iccid: sim_iccid.to_string(),
            firmware_version: firmware_version.to_string(),
            device_token: random_token("dev", 24),
            registered_at: now,
            last_seen_at: now,
            last_heartbeat_at: Some(now),
            last_telemetry_at: None,
            last_location_at: None,
            status: DeviceStatus::Online,
            last_telemetry: None,
            last_location: None,
        };
        state.devices.insert(device_id.to_string(), device.clone());
        self.persist(&state)?;
        Ok((device, true))
    }

    fn check_device_token(state: &StateInner, device_id: &str, token: &str) -> FleetResult<()> {
        let device = state.devices.get(device_id).ok_or(FleetError::InvalidDeviceToken)?;
        let ok: bool = device.device_token.as_bytes().ct_eq(token.as_bytes()).into();
        if ok {
            Ok(())
        } else {
            Err(FleetError::InvalidDeviceToken)
        }
    }

    /// Validates `token` for `device_id`, touches liveness and returns a
    /// clone. Absent device and mismatched token render the same error so
    /// an unauthenticated caller cannot probe device existence.
    pub fn validate_device_token(
        &self,
        device_id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> FleetResult<Device> {
        let mut state = self.write();
        Self::check_device_token(&state, device_id, token)?;
        let device = state.devices.get_mut(device_id).expect("checked above");
        device.last_seen_at = now;
        device.status = DeviceStatus::Online;
        let out = device.clone();
        self.persist(&state)?;
        Ok(out)
    }

    pub fn heartbeat(&self, device_id: &str, token: &str, now: DateTime<Utc>) -> FleetResult<()> {
        let mut state = self.write();
        Self::check_device_token(&state, device_id, token)?;
        let device = state.devices.get_mut(device_id).expect("checked above");
        device.last_seen_at = now;
        device.last_heartbeat_at = Some(now);
        device.status = DeviceStatus::Online;
        self.persist(&state)?;
        Ok(())
    }

    pub fn telemetry(
        &self,
        device_id: &str,
        token: &str,
        sample: TelemetrySample,
        now: DateTime<Utc>,
    ) -> FleetResult<()> {
        let mut state = self.write();
        Self::check_device_token(&state, device_id, token)?;

        let ring = state.telemetry_by_id.entry(device_id.to_string()).or_default();
        ring.push_back(sample.clone());
        while ring.len() > TELEMETRY_RING_CAP {
            ring.pop_front();
        }

        let device = state.devices.get_mut(device_id).expect("checked above");
        device.last_seen_at = now;
        device.last_telemetry_at = Some(now);
        device.last_telemetry = Some(sample);
        device.status = DeviceStatus::Online;
        self.persist(&state)?;
        Ok(())
    }

    pub fn location(
        &self,
        device_id: &str,
        token: &str,
        sample: LocationSample,
        now: DateTime<Utc>,
    ) -> FleetResult<()> {
        let mut state = self.write();
        Self::check_device_token(&state, device_id, token)?;
        let device = state.devices.get_mut(device_id).expect("checked above");
        device.last_seen_at = now;
        device.last_location_at = Some(now);
        device.last_location = Some(sample);
        device.status = DeviceStatus::Online;
        self.persist(&state)?;
        Ok(())
    }

    pub fn list_devices(&self, offline_after: Duration, now: DateTime<Utc>) -> FleetResult<Vec<Device>> {
        let mut state = self.write();
        let ids: Vec<String> = state.devices.keys().cloned().collect();
        for id in &ids {
            state.refresh_status(id, offline_after, now);
        }
        let mut devices: Vec<Device> = state.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        self.persist(&state)?;
        Ok(devices)
    }

    pub fn get_device(
        &self,
        device_id: &str,
        offline_after: Duration,
        now: DateTime<Utc>,
    ) -> FleetResult<Device> {
        let mut state = self.write();
        if !state.devices.contains_key(device_id) {
            return Err(FleetError::DeviceNotFound);
        }
        state.refresh_status(device_id, offline_after, now);
        let out = state.devices.get(device_id).expect("checked above").clone();
        self.persist(&state)?;
        Ok(out)
    }

    pub fn list_telemetry(&self, device_id: &str, limit: usize) -> FleetResult<Vec<TelemetrySample>> {
        let state = self.read();
        if !state.devices.contains_key(device_id) {
            return Err(FleetError::DeviceNotFound);
        }
        let ring = state.telemetry_by_id.get(device_id);
        let items: Vec<TelemetrySample> = ring.map(|r| r.iter().cloned().collect()).unwrap_or_default();
        Ok(tail(items, limit))
    }

    pub fn add_command(
        &self,
        device_id: &str,
        kind: CommandType,
        payload: serde_json::Value,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> FleetResult<Command> {
        let mut state = self.write();
        if !state.devices.contains_key(device_id) {
            return Err(FleetError::DeviceNotFound);
        }
        let command_id = format!("cmd_{}", uuid::Uuid::new_v4().simple());
        let command = Command {
            command_id: command_id.clone(),
            device_id: device_id.to_string(),
            kind,
            payload,
            created_by: created_by.to_string(),
            created_at: now,
            dispatched_at: None,
            completed_at: None,
            status: CommandStatus::Queued,
            result: None,
        };
        state.commands_by_id.insert(command_id, command.clone());
        self.persist(&state)?;
        Ok(command)
    }

    pub fn list_commands(&self, device_id: &str, limit: usize) -> FleetResult<Vec<Command>> {
        let state = self.read();
        if !state.devices.contains_key(device_id) {
            return Err(FleetError::DeviceNotFound);
        }
        Ok(tail(state.device_commands(device_id), limit))
    }

    pub fn pull_next_command(
        &self,
        device_id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> FleetResult<Option<Command>> {
        let mut state = self.write();
        Self::check_device_token(&state, device_id, token)?;

        let next_id = state
            .device_commands(device_id)
            .into_iter()
            .find(|c| c.status == CommandStatus::Queued)
            .map(|c| c.command_id);

        let result = if let Some(id) = next_id {
            let cmd = state.commands_by_id.get_mut(&id).expect("checked above");
            cmd.status = CommandStatus::Dispatched;
            cmd.dispatched_at = Some(now);
            Some(cmd.clone())
        } else {
            None
        };

        let device = state.devices.get_mut(device_id).expect("checked above");
        device.last_seen_at = now;
        device.status = DeviceStatus::Online;
        self.persist(&state)?;
        Ok(result)
    }

    pub fn complete_command(
        &self,
        device_id: &str,
        token: &str,
        command_id: &str,
        result: CommandResult,
        now: DateTime<Utc>,
    ) -> FleetResult<Command> {
        let mut state = self.write();
        Self::check_device_token(&state, device_id, token)?;

        let belongs = state
            .commands_by_id
            .get(command_id)
            .map(|c| c.device_id == device_id)
            .unwrap_or(false);
        if !belongs {
            return Err(FleetError::CommandNotFound);
        }

        let final_status = if result.status == "success" {
            CommandStatus::Success
        } else {
            CommandStatus::Failed
        };

        let cmd = state.commands_by_id.get_mut(command_id).expect("checked above");
        cmd.completed_at = Some(now);
        cmd.result = Some(result);
        cmd.status = final_status;
        let out = cmd.clone();

        let device = state.devices.get_mut(device_id).expect("checked above");
        device.last_seen_at = now;
        device.status = DeviceStatus::Online;

        self.persist(&state)?;
        Ok(out)
    }

    pub fn save_artifact(
        &self,
        name: &str,
        content_type: &str,
        payload: Vec<u8>,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> FleetResult<Artifact> {
        let mut state = self.write();

        let digest = Sha256::digest(&payload);
        let payload_sha256 = hex::encode(digest);
        let artifact_id = format!("art_{}", &payload_sha256[..24]);

        if let Some(existing) = state.artifacts.get(&artifact_id) {
            return Ok(existing.clone());
        }

        let artifact = Artifact {
            artifact_id: artifact_id.clone(),
            name: name.to_string(),
            content_type: content_type.to_string(),
            created_by: created_by.to_string(),
            created_at: now,
            payload,
            payload_sha256,
        };
        state.artifacts.insert(artifact_id, artifact.clone());
        self.persist(&state)?;
        Ok(artifact)
    }

    pub fn get_artifact(&self, artifact_id: &str) -> FleetResult<Artifact> {
        let state = self.read();
        state
            .artifacts
            .get(artifact_id)
            .cloned()
            .ok_or(FleetError::ArtifactNotFound)
    }

    pub fn device_count(&self) -> usize {
        self.read().devices.len()
    }
}

fn tail<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if limit == 0 || items.len() <= limit {
        return items;
    }
    let drop = items.len() - limit;
    items.drain(..drop);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (StateStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        (StateStore::load(&path).unwrap(), dir)
    }

    #[test]
    fn missing_file_loads_empty_state() {
        let (s, _dir) = store();
        assert_eq!(s.device_count(), 0);
    }

    #[test]
    fn register_new_then_existing_same_identity_succeeds() {
        let (s, _dir) = store();
        let now = Utc::now();
        let (d1, created1) = s
            .register_device("d1", "u1", "i1", "s1", "r1", 10, now)
            .unwrap();
        assert!(created1);
        let (d2, created2) = s
            .register_device("d1", "u1", "i1", "s1", "r2", 10, now)
            .unwrap();
        assert!(!created2);
        assert_eq!(d1.device_token, d2.device_token);
        assert_eq!(d2.firmware_version, "r2");
    }

    #[test]
    fn conflicting_hw_uid_is_rejected() {
        let (s, _dir) = store();
        let now = Utc::now();
        s.register_device("d1", "u1", "i1", "s1", "r1", 10, now).unwrap();
        let err = s
            .register_device("d1", "u2", "i1", "s1", "r1", 10, now)
            .unwrap_err();
        assert!(matches!(err, FleetError::DeviceIdentityConflict));
    }

    #[test]
    fn fleet_limit_enforced_on_new_ids_only() {
        let (s, _dir) = store();
        let now = Utc::now();
        s.register_device("d1", "u1", "i1", "s1", "r1", 1, now).unwrap();
        s.register_device("d1", "u1", "i1", "s1", "r1", 1, now).unwrap();
        let err = s
            .register_device("d2", "u2", "i2", "s2", "r1", 1, now)
            .unwrap_err();
        assert!(matches!(err, FleetError::FleetLimitReached));
    }

    #[test]
    fn telemetry_ring_caps_at_500() {
        let (s, _dir) = store();
        let now = Utc::now();
        let (device, _) = s.register_device("d1", "u1", "i1", "s1", "r1", 10, now).unwrap();
        for i in 0..520 {
            let sample = TelemetrySample {
                battery_mv: i,
                supply_mv: 3300,
                temperature_c: 20.0,
                rssi_dbm: -70,
                network_state: "lte".to_string(),
                uptime_sec: i,
                extra: Default::default(),
            };
            s.telemetry(&device.device_id, &device.device_token, sample, now).unwrap();
        }
        let items = s.list_telemetry(&device.device_id, 1000).unwrap();
        assert_eq!(items.len(), 500);
        assert_eq!(items[0].battery_mv, 20);
    }

    #[test]
    fn command_lifecycle_is_monotone() {
        let (s, _dir) = store();
        let now = Utc::now();
        let (device, _) = s.register_device("d1", "u1", "i1", "s1", "r1", 10, now).unwrap();
        let cmd = s
            .add_command(&device.device_id, CommandType::SwdReset, serde_json::json!({}), "op", now)
            .unwrap();
        assert_eq!(cmd.status, CommandStatus::Queued);

        let pulled = s
            .pull_next_command(&device.device_id, &device.device_token, now)
            .unwrap()
            .unwrap();
        assert_eq!(pulled.status, CommandStatus::Dispatched);

        let result = CommandResult {
            status: "success".to_string(),
            message: "ok".to_string(),
            metrics: serde_json::Value::Null,
            data: serde_json::Value::Null,
        };
        let done = s
            .complete_command(&device.device_id, &device.device_token, &cmd.command_id, result, now)
            .unwrap();
        assert_eq!(done.status, CommandStatus::Success);
    }

    #[test]
    fn artifact_upload_is_deduplicated() {
        let (s, _dir) = store();
        let now = Utc::now();
        let a1 = s.save_artifact("fw.bin", "application/octet-stream", vec![0u8], "op", now).unwrap();
        let a2 = s.save_artifact("other.bin", "application/octet-stream", vec![0u8], "op", now).unwrap();
        assert_eq!(a1.artifact_id, a2.artifact_id);
        assert_eq!(a1.artifact_id, format!("art_{}", &hex::encode(Sha256::digest([0u8]))[..24]));
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let now = Utc::now();
        {
            let s = StateStore::load(&path).unwrap();
            s.register_device("d1", "u1", "i1", "s1", "r1", 10, now).unwrap();
            s.save_artifact("fw.bin", "application/octet-stream", vec![1, 2, 3], "op", now)
                .unwrap();
        }
        let reloaded = StateStore::load(&path).unwrap();
        assert_eq!(reloaded.device_count(), 1);
        let device = reloaded
            .get_device("d1", Duration::seconds(90), now)
            .unwrap();
        assert_eq!(device.hw_uid, "u1");
    }
}

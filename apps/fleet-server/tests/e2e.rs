//! End-to-end scenarios exercised directly against the Axum router, no
//! socket bound (§8 concrete scenarios).

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use fleet_server::config::Config;
use fleet_server::kernel::build_state;
use fleet_server::routes::build_router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn config(dir: &std::path::Path) -> Config {
    Config {
        http_addr: "127.0.0.1:0".into(),
        https_addr: None,
        tls_cert_file: None,
        tls_key_file: None,
        operator_password: "lte_swd_admin".into(),
        device_enroll_key: "r1-enroll-key".into(),
        data_file: dir.join("state.json"),
        static_dir: dir.to_path_buf(),
        fleet_limit: 10,
        operator_token_ttl_secs: 3600,
        device_offline_after_secs: 90,
        max_json_bytes: 64 * 1024,
        max_artifact_bytes: 1024 * 1024,
        api_rate_per_minute: 1000,
        login_rate_per_minute: 1000,
        login_burst: 5,
        trust_proxy_headers: false,
    }
}

fn router(dir: &std::path::Path) -> axum::Router {
    let state = build_state(config(dir)).expect("state builds");
    build_router(state)
}

fn req(method: &str, path: &str, body: Value) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 1234))));
    request
}

fn get(path: &str) -> Request<Body> {
    let mut request = Request::builder().method("GET").uri(path).body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 1234))));
    request
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn enrollment_and_heartbeat() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path());

    let response = app
        .clone()
        .oneshot(req(
            "POST",
            "/api/v1/device/register",
            json!({
                "enroll_key": "r1-enroll-key",
                "device_id": "d1",
                "hw_uid": "u1",
                "modem_imei": "i1",
                "sim_iccid": "s1",
                "firmware_version": "r1"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let token = body["device_token"].as_str().unwrap().to_string();
    assert!(token.starts_with("dev_"));
    assert_eq!(body["poll_interval_sec"], 3);
    assert_eq!(body["heartbeat_interval_sec"], 10);

    let response = app
        .oneshot(req(
            "POST",
            "/api/v1/device/heartbeat",
            json!({"device_id": "d1", "device_token": token}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

async fn login(app: &axum::Router, password: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(req("POST", "/api/v1/operator/login", json!({"password": password})))
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test]
async fn full_command_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path());

    let response = app
        .clone()
        .oneshot(req(
            "POST",
            "/api/v1/device/register",
            json!({"enroll_key": "r1-enroll-key", "device_id": "d1", "hw_uid": "u1", "modem_imei": "i1", "sim_iccid": "s1", "firmware_version": "r1"}),
        ))
        .await
        .unwrap();
    let device_token = body_json(response).await["device_token"].as_str().unwrap().to_string();

    let (status, body) = login(&app, "lte_swd_admin").await;
    assert_eq!(status, StatusCode::OK);
    let op_token = body["token"].as_str().unwrap().to_string();

    let mut create_req = req(
        "POST",
        "/api/v1/commands",
        json!({"device_id": "d1", "type": "swd_reset", "payload": {"hard": true}}),
    );
    create_req
        .headers_mut()
        .insert("authorization", format!("Bearer {op_token}").parse().unwrap());
    let response = app.clone().oneshot(create_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let command = body_json(response).await;
    assert_eq!(command["status"], "queued");
    let command_id = command["command_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(req(
            "POST",
            "/api/v1/device/commands/pull",
            json!({"device_id": "d1", "device_token": device_token}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let pulled = body_json(response).await;
    assert_eq!(pulled["command"]["status"], "dispatched");
    assert!(!pulled["command"]["dispatched_at"].is_null());

    let response = app
        .clone()
        .oneshot(req(
            "POST",
            &format!("/api/v1/device/commands/{command_id}/result"),
            json!({"device_id": "d1", "device_token": device_token, "status": "success", "message": "ok"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let completed = body_json(response).await;
    assert_eq!(completed["status"], "success");
    assert!(!completed["completed_at"].is_null());
    assert_eq!(completed["result"]["status"], "success");
}

#[tokio::test]
async fn artifact_upload_is_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path());
    let (_, body) = login(&app, "lte_swd_admin").await;
    let token = body["token"].as_str().unwrap().to_string();

    let mut upload = req(
        "POST",
        "/api/v1/artifacts",
        json!({"name": "fw.bin", "content_type": "application/octet-stream", "base64_data": "AA=="}),
    );
    upload
        .headers_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    let response = app.clone().oneshot(upload).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let first = body_json(response).await;
    let artifact_id = first["artifact_id"].as_str().unwrap().to_string();

    let mut upload2 = req(
        "POST",
        "/api/v1/artifacts",
        json!({"name": "other.bin", "content_type": "application/octet-stream", "base64_data": "AA=="}),
    );
    upload2
        .headers_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    let response = app.clone().oneshot(upload2).await.unwrap();
    let second = body_json(response).await;
    assert_eq!(second["artifact_id"], artifact_id);

    let mut download = get(&format!("/api/v1/artifacts/{artifact_id}"));
    download
        .headers_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    let response = app.oneshot(download).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], &[0u8]);
}

#[tokio::test]
async fn fleet_cap_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.fleet_limit = 1;
    let state = build_state(cfg).unwrap();
    let app = build_router(state);

    app.clone()
        .oneshot(req(
            "POST",
            "/api/v1/device/register",
            json!({"enroll_key": "r1-enroll-key", "device_id": "d1", "hw_uid": "u1", "modem_imei": "i1", "sim_iccid": "s1", "firmware_version": "r1"}),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(req(
            "POST",
            "/api/v1/device/register",
            json!({"enroll_key": "r1-enroll-key", "device_id": "d2", "hw_uid": "u2", "modem_imei": "i2", "sim_iccid": "s2", "firmware_version": "r1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"], "fleet_limit_reached");
}

#[tokio::test]
async fn identity_conflict_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path());

    app.clone()
        .oneshot(req(
            "POST",
            "/api/v1/device/register",
            json!({"enroll_key": "r1-enroll-key", "device_id": "d1", "hw_uid": "u1", "modem_imei": "i1", "sim_iccid": "s1", "firmware_version": "r1"}),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(req(
            "POST",
            "/api/v1/device/register",
            json!({"enroll_key": "r1-enroll-key", "device_id": "d1", "hw_uid": "u2", "modem_imei": "i1", "sim_iccid": "s1", "firmware_version": "r1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"], "device_exists_with_other_identity");
}

#[tokio::test]
async fn login_brute_force_guard_blocks_after_burst() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.login_burst = 5;
    let state = build_state(cfg).unwrap();
    let app = build_router(state);

    for _ in 0..5 {
        let (status, _) = login(&app, "wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) = login(&app, "wrong").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "login_rate_exceeded");
}

#[tokio::test]
async fn missing_bearer_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = router(dir.path());
    let response = app.oneshot(get("/api/v1/devices")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn body_over_cap_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.max_json_bytes = 1024;
    let state = build_state(cfg).unwrap();
    let app = build_router(state);

    let oversized = "x".repeat(2000);
    let response = app
        .oneshot(req(
            "POST",
            "/api/v1/device/heartbeat",
            json!({"device_id": "d1", "device_token": oversized}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

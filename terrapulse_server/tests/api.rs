use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use terrapulse_server::database::MemoryStore;
use terrapulse_server::http::{router, AppState};
use terrapulse_server::program::{RewardProgram, RewardRates, SimulatedProgram};
use tower::ServiceExt;

const ADMIN: &str = "test-admin";

struct TestApp {
    router: Router,
    program: Arc<SimulatedProgram>,
}

impl TestApp {
    async fn new() -> Self {
        let program = Arc::new(SimulatedProgram::new());
        program.initialize(ADMIN, RewardRates::default()).await.unwrap();
        let state = AppState::new(Arc::new(MemoryStore::new()), program.clone(), ADMIN.to_string());
        Self { router: router(state), program }
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send("GET", uri, None).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", uri, Some(body)).await
    }

    /// Registers a user with a wallet and an active device carrying a
    /// temperature sensor. Returns (user id, device id).
    async fn seed(&self) -> (String, String) {
        let (status, user) = self
            .post(
                "/api/users",
                json!({ "privyId": "did:privy:alice", "walletAddress": "WalletAlice", "email": "a@x.io" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let user_id = user["id"].as_str().unwrap().to_string();

        let (status, device) = self
            .post("/api/devices", json!({ "deviceId": "esp32-01", "ownerId": user_id }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(device["status"], "PENDING");
        let device_id = device["id"].as_str().unwrap().to_string();

        let (status, _) = self
            .send("PATCH", &format!("/api/devices/{device_id}"), Some(json!({ "status": "ACTIVE" })))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, sensor) = self
            .post("/api/sensors", json!({ "deviceId": device_id, "type": "TEMPERATURE" }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(sensor["unit"], "°C");

        let (status, _) = self
            .post(
                "/api/rewards/index",
                json!({
                    "basePoints": 10,
                    "sensorBoosts": { "TEMPERATURE": 1.2 },
                    "multiplierJson": { "dataQuality": 1 }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        (user_id, device_id)
    }

    async fn submit(&self, device_id: &str, value: f64) -> (StatusCode, Value) {
        self.post(
            "/api/sensor-readings",
            json!({
                "deviceId": device_id,
                "sensorType": "TEMPERATURE",
                "value": value,
                "rawPayload": { "timestamp": "2024-05-01T12:00:00Z", "deviceSignature": "sig" }
            }),
        )
        .await
    }
}

#[tokio::test]
async fn health() {
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn user_upsert_and_lookup() {
    let app = TestApp::new().await;
    let (user_id, _) = app.seed().await;

    let (status, user) = app
        .post("/api/users", json!({ "privyId": "did:privy:alice", "name": "Alice" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["id"], user_id);
    assert_eq!(user["name"], "Alice");
    assert_eq!(user["email"], "a@x.io");

    let (status, user) = app.get("/api/users?walletAddress=WalletAlice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["privyId"], "did:privy:alice");
    assert_eq!(user["wallets"].as_array().unwrap().len(), 1);
    assert!(app.program.user_account("WalletAlice").await.unwrap().is_some());

    let (status, body) = app.get("/api/users").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Either privyId or walletAddress is required");

    let (status, _) = app.get("/api/users?privyId=nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post("/api/users", json!({ "privyId": "did:privy:mallory", "walletAddress": "WalletAlice" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn device_registration_errors() {
    let app = TestApp::new().await;
    let (user_id, _) = app.seed().await;

    let (status, body) = app.post("/api/devices", json!({ "deviceId": "esp32-02" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "deviceId and ownerId are required");

    let (status, _) = app
        .post("/api/devices", json!({ "deviceId": "esp32-01", "ownerId": user_id }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post(
            "/api/devices",
            json!({ "deviceId": "esp32-03", "ownerId": "9b2f7c9e-4d0e-4d43-9a41-2a1b9b7d5c11" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.get("/api/devices?status=ACTIVE").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["devices"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["limit"], 50);
    assert_eq!(body["pagination"]["hasMore"], false);

    app.post("/api/devices", json!({ "deviceId": "esp32-04", "ownerId": user_id })).await;
    let (status, body) = app.get(&format!("/api/devices?ownerId={user_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"], json!({ "byStatus": { "ACTIVE": 1, "PENDING": 1 }, "total": 2 }));
}

#[tokio::test]
async fn sensor_registration_errors() {
    let app = TestApp::new().await;
    let (_, device_id) = app.seed().await;

    let (status, body) = app
        .post("/api/sensors", json!({ "deviceId": device_id, "type": "TEMPERATURE" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Device already has a TEMPERATURE sensor");

    let (status, body) = app
        .post(
            "/api/sensors",
            json!({ "deviceId": "9b2f7c9e-4d0e-4d43-9a41-2a1b9b7d5c11", "type": "NOISE" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Device not found");

    let (status, body) = app.get(&format!("/api/sensors?deviceId={device_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sensors"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn reading_flow_awards_points() {
    let app = TestApp::new().await;
    let (user_id, device_id) = app.seed().await;

    let (status, body) = app.submit(&device_id, 22.0).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["reading"]["validated"], true);
    assert_eq!(body["reading"]["qualityScore"], 1.0);
    assert_eq!(body["pointsAwarded"], 12.0);

    let (status, body) = app.submit(&device_id, 500.0).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["reading"]["validated"], true);
    assert_eq!(body["pointsAwarded"], 5.88);

    let (status, body) = app.get(&format!("/api/rewards/points?userId={user_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pointsLedger"].as_array().unwrap().len(), 2);
    assert_eq!(body["summary"]["totalEntries"], 2);
    assert_eq!(body["summary"]["totalPoints"], 17.88);
    assert_eq!(
        body["summary"]["breakdown"],
        json!([{ "reason": "BASE_SUBMISSION", "points": 17.88, "entries": 2 }])
    );

    let (status, body) = app.get(&format!("/api/devices/{device_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["totalReadings"], 2);
    assert_eq!(body["readings"].as_array().unwrap().len(), 2);
    assert!(body["device"]["lastSeenAt"].is_string());

    let (status, body) = app
        .get(&format!("/api/sensor-readings?deviceId={device_id}&validated=true&limit=1"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["readings"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["total"], 2);
    assert_eq!(body["pagination"]["hasMore"], true);
    assert_eq!(body["stats"]["totalReadings"], 2);
    assert_eq!(body["stats"]["averageValue"], 261.0);
    let average_quality = body["stats"]["averageQuality"].as_f64().unwrap();
    assert!((average_quality - 0.85).abs() < 1e-9);
}

#[tokio::test]
async fn reading_rejections() {
    let app = TestApp::new().await;
    let (_, device_id) = app.seed().await;

    let (status, body) = app
        .post(
            "/api/sensor-readings",
            json!({ "deviceId": device_id, "sensorType": "NOISE", "value": 40, "rawPayload": {} }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = app
        .post("/api/sensor-readings", json!({ "deviceId": device_id, "value": 40 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            "/api/sensor-readings",
            json!({
                "deviceId": device_id,
                "sensorId": "9b2f7c9e-4d0e-4d43-9a41-2a1b9b7d5c11",
                "sensorType": "TEMPERATURE",
                "value": 21,
                "rawPayload": {}
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "sensorId does not match the device's TEMPERATURE sensor");

    let (status, _) = app
        .send("PATCH", &format!("/api/devices/{device_id}"), Some(json!({ "status": "SUSPENDED" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.submit(&device_id, 20.0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.get("/api/sensor-readings?startDate=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn claims_are_bounded_by_balance() {
    let app = TestApp::new().await;
    let (user_id, device_id) = app.seed().await;
    app.submit(&device_id, 22.0).await;

    let (status, body) = app
        .post("/api/rewards/claims", json!({ "userId": user_id, "pointsSpent": 12.01 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Insufficient points");
    assert_eq!(body["available"], 12.0);
    assert_eq!(body["requested"], 12.01);

    let (status, claim) = app
        .post("/api/rewards/claims", json!({ "userId": user_id, "pointsSpent": 12.0 }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(claim["status"], "PENDING");
    assert_eq!(claim["tokensIssued"], 0.012);
    assert_eq!(claim["note"], "Claim for 12 points");

    let (status, body) = app.get(&format!("/api/rewards/claims?userId={user_id}&status=PENDING")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["claims"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["stats"],
        json!({ "totalPointsSpent": 12.0, "totalTokensIssued": 0.012, "totalClaims": 1 })
    );
}

#[tokio::test]
async fn sync_pushes_points_once() {
    let app = TestApp::new().await;
    let (user_id, device_id) = app.seed().await;
    app.submit(&device_id, 22.0).await;
    app.submit(&device_id, 23.0).await;

    let (status, report) = app.post("/api/sync", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["userId"], user_id);
    assert_eq!(results[0]["wallet"], "WalletAlice");
    assert_eq!(
        results[0]["updates"],
        json!([{ "sensorType": "TEMPERATURE", "bucket": "temp", "points": 24.0, "status": "ok" }])
    );

    let account = app.program.user_account("WalletAlice").await.unwrap().unwrap();
    assert_eq!(account.temp_points, 24);

    let (status, report) = app.get("/api/sync").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["results"][0]["updates"], json!([]));
}

#[tokio::test]
async fn quick_reading_endpoint() {
    let app = TestApp::new().await;
    app.seed().await;

    let (status, body) = app
        .post("/api/sensor-data", json!({ "privyId": "did:privy:alice", "temperature": 21.0 }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["readings"].as_array().unwrap().len(), 1);
    // server payload carries no signature: 0.9 quality
    assert_eq!(body["pointsEarned"], 9.72);

    let (status, _) = app.post("/api/sensor-data", json!({ "privyId": "did:privy:alice" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/sensor-data", json!({ "privyId": "did:privy:nobody", "humidity": 40 }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

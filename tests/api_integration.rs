//! Integration tests for the identifier service API.
//!
//! These tests spin up a real server instance and make HTTP requests to verify
//! the complete request/response cycle.

use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;

use patient_idgen::api::{AppState, create_router};
use patient_idgen::config::{
    AppConfig, FileStorageConfig, ObservabilityConfig, ServerConfig, StorageBackend,
    StorageConfig,
};
use patient_idgen::storage::create_storage;

// ============================================================================
// Test Harness
// ============================================================================

/// Test server instance.
struct TestServer {
    addr: SocketAddr,
    client: Client,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".parse().unwrap(),
                port: 0,
                workers: 1,
                request_timeout_secs: 5,
            },
            storage: StorageConfig {
                backend: StorageBackend::File,
                file: FileStorageConfig {
                    data_dir: temp_dir.path().to_path_buf(),
                },
                ..Default::default()
            },
            observability: ObservabilityConfig {
                log_level: "warn".to_string(),
                log_format: "text".to_string(),
                metrics_enabled: false,
            },
            ..Default::default()
        };

        let storage = create_storage(&config.storage)
            .await
            .expect("Failed to create storage");

        let state = AppState::new(Arc::new(config), storage).expect("Failed to build state");
        let app = create_router(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Server failed");
        });

        Self {
            addr,
            client: Client::new(),
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Request failed")
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Response {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    async fn post_empty(&self, path: &str) -> Response {
        self.client
            .post(self.url(path))
            .send()
            .await
            .expect("Request failed")
    }

    async fn put<T: Serialize>(&self, path: &str, body: &T) -> Response {
        self.client
            .put(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    async fn delete(&self, path: &str) -> Response {
        self.client
            .delete(self.url(path))
            .send()
            .await
            .expect("Request failed")
    }

    /// POST and unwrap a successful envelope.
    async fn create<T: Serialize, R: DeserializeOwned>(&self, path: &str, body: &T) -> R {
        let response = self.post(path, body).await;
        assert_eq!(response.status(), StatusCode::OK, "POST {path}");
        let body: ApiResponse<R> = response.json().await.unwrap();
        body.data.expect("missing data")
    }

    async fn create_type(&self, body: Value) -> String {
        let created: Value = self.create("/v1/identifier-types", &body).await;
        created["id"].as_str().unwrap().to_string()
    }

    async fn create_source(&self, body: Value) -> String {
        let created: Value = self.create("/v1/sources", &body).await;
        created["id"].as_str().unwrap().to_string()
    }

    async fn set_policy(&self, body: Value) -> Value {
        let response = self.put("/v1/policies", &body).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: ApiResponse<Value> = response.json().await.unwrap();
        body.data.unwrap()
    }

    async fn generate(&self, identifier_type: &str, location: Option<&str>) -> Response {
        self.post(
            "/v1/identifiers",
            &json!({ "identifier_type": identifier_type, "location": location }),
        )
        .await
    }
}

/// API response structure.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i32,
    #[allow(dead_code)]
    message: String,
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn is_success(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Deserialize)]
struct Generated {
    value: String,
    source: String,
    reservation: Option<String>,
}

fn mrn_sequential(identifier_type: &str) -> Value {
    json!({
        "name": "MRN counter",
        "identifier_type": identifier_type,
        "kind": "sequential",
        "prefix": "MRN-",
        "base_character_set": "0123456789",
        "min_length": 8,
        "max_length": 8,
        "first_identifier_base": 1
    })
}

// ============================================================================
// Health Endpoint Tests
// ============================================================================

#[derive(Debug, Deserialize)]
struct HealthData {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ReadyData {
    ready: bool,
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::new().await;
    let response = server.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: ApiResponse<HealthData> = response.json().await.unwrap();
    assert!(body.is_success());
    assert_eq!(body.data.unwrap().status, "healthy");
}

#[tokio::test]
async fn test_ready_endpoint() {
    let server = TestServer::new().await;
    let response = server.get("/ready").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: ApiResponse<ReadyData> = response.json().await.unwrap();
    assert!(body.is_success());
    assert!(body.data.unwrap().ready);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = TestServer::new().await;
    let response = server.get("/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);

    let text = response.text().await.unwrap();
    assert!(text.contains("idgen_up"));
}

// ============================================================================
// Identifier Type Tests
// ============================================================================

#[tokio::test]
async fn test_create_and_get_type() {
    let server = TestServer::new().await;
    let id = server
        .create_type(json!({
            "name": "MRN",
            "format_regex": "MRN-\\d{4}",
            "location_behavior": "NOT_USED",
            "uniqueness_behavior": "UNIQUE"
        }))
        .await;

    let response = server.get(&format!("/v1/identifier-types/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: ApiResponse<Value> = response.json().await.unwrap();
    let data = body.data.unwrap();
    assert_eq!(data["name"], "MRN");
    assert_eq!(data["retired"], false);

    let response = server.get("/v1/identifier-types").await;
    let body: ApiResponse<Vec<Value>> = response.json().await.unwrap();
    assert_eq!(body.data.unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_type_name() {
    let server = TestServer::new().await;
    server.create_type(json!({ "name": "MRN" })).await;

    let response = server
        .post("/v1/identifier-types", &json!({ "name": "MRN" }))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: ApiResponse<()> = response.json().await.unwrap();
    assert_eq!(body.code, 1002);
}

#[tokio::test]
async fn test_invalid_type_regex() {
    let server = TestServer::new().await;
    let response = server
        .post(
            "/v1/identifier-types",
            &json!({ "name": "MRN", "format_regex": "MRN-(" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ApiResponse<()> = response.json().await.unwrap();
    assert_eq!(body.code, 1001);
}

#[tokio::test]
async fn test_get_nonexistent_type() {
    let server = TestServer::new().await;
    let response = server
        .get("/v1/identifier-types/6f0d5f1e-8f56-4a53-9d43-3f7a0e1b2c3d")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Source Tests
// ============================================================================

#[tokio::test]
async fn test_sequential_source_length_invariant() {
    let server = TestServer::new().await;
    let type_id = server.create_type(json!({ "name": "MRN" })).await;

    let mut source = mrn_sequential(&type_id);
    source["min_length"] = json!(9);
    let response = server.post("/v1/sources", &source).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_remote_source_password_masked() {
    let server = TestServer::new().await;
    let type_id = server.create_type(json!({ "name": "National ID" })).await;

    let source_id = server
        .create_source(json!({
            "name": "National registry",
            "identifier_type": type_id,
            "kind": "remote",
            "endpoint": "https://registry.example.org/ids",
            "username": "idgen",
            "password": "secret",
            "batch_size": 10
        }))
        .await;

    let response = server.get(&format!("/v1/sources/{source_id}")).await;
    let text = response.text().await.unwrap();
    assert!(!text.contains("secret"));
}

#[derive(Debug, Deserialize)]
struct PoolStatus {
    available: u64,
    reserved: u64,
    used: u64,
}

#[tokio::test]
async fn test_pool_upload_and_status() {
    let server = TestServer::new().await;
    let type_id = server.create_type(json!({ "name": "VIP" })).await;
    let source_id = server
        .create_source(json!({
            "name": "VIP pool",
            "identifier_type": type_id,
            "kind": "pool",
            "identifiers": ["VIP001"]
        }))
        .await;

    let response = server
        .post(
            &format!("/v1/sources/{source_id}/pool"),
            &json!({ "identifiers": ["VIP001", "VIP002"] }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: ApiResponse<Value> = response.json().await.unwrap();
    assert_eq!(body.data.unwrap()["added"], 1);

    let response = server.get(&format!("/v1/sources/{source_id}/pool")).await;
    let body: ApiResponse<PoolStatus> = response.json().await.unwrap();
    let status = body.data.unwrap();
    assert_eq!((status.available, status.reserved, status.used), (2, 0, 0));
}

// ============================================================================
// Generation Tests
// ============================================================================

#[tokio::test]
async fn test_generate_sequential() {
    let server = TestServer::new().await;
    let type_id = server
        .create_type(json!({ "name": "MRN", "format_regex": "MRN-\\d{4}" }))
        .await;
    let source_id = server.create_source(mrn_sequential(&type_id)).await;
    server
        .set_policy(json!({
            "identifier_type": type_id,
            "source": source_id,
            "automatic_generation": true
        }))
        .await;

    for expected in ["MRN-0001", "MRN-0002"] {
        let response = server.generate(&type_id, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: ApiResponse<Generated> = response.json().await.unwrap();
        let generated = body.data.unwrap();
        assert_eq!(generated.value, expected);
        assert_eq!(generated.source, source_id);
        assert!(generated.reservation.is_none());
    }
}

#[tokio::test]
async fn test_generate_without_policy() {
    let server = TestServer::new().await;
    let type_id = server.create_type(json!({ "name": "MRN" })).await;

    let response = server.generate(&type_id, None).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: ApiResponse<()> = response.json().await.unwrap();
    assert_eq!(body.code, 1003);
}

#[tokio::test]
async fn test_location_policy_requires_manual_entry() {
    let server = TestServer::new().await;
    let type_id = server.create_type(json!({ "name": "MRN" })).await;
    let source_id = server.create_source(mrn_sequential(&type_id)).await;
    server
        .set_policy(json!({
            "identifier_type": type_id,
            "source": source_id,
            "automatic_generation": true
        }))
        .await;
    server
        .set_policy(json!({
            "identifier_type": type_id,
            "location": "X",
            "source": source_id,
            "automatic_generation": false,
            "manual_entry_allowed": true
        }))
        .await;

    let response = server.generate(&type_id, Some("X")).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: ApiResponse<()> = response.json().await.unwrap();
    assert_eq!(body.code, 4003);

    let response = server.generate(&type_id, Some("Y")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_pool_reservation_lifecycle() {
    let server = TestServer::new().await;
    let type_id = server.create_type(json!({ "name": "VIP" })).await;
    let source_id = server
        .create_source(json!({
            "name": "VIP pool",
            "identifier_type": type_id,
            "kind": "pool",
            "identifiers": ["VIP001", "VIP002"]
        }))
        .await;
    server
        .set_policy(json!({ "identifier_type": type_id, "source": source_id }))
        .await;

    let first: ApiResponse<Generated> = server.generate(&type_id, None).await.json().await.unwrap();
    let first = first.data.unwrap();
    assert_eq!(first.value, "VIP001");
    let token = first.reservation.unwrap();

    let second: ApiResponse<Generated> = server.generate(&type_id, None).await.json().await.unwrap();
    let second_token = second.data.unwrap().reservation.unwrap();

    let response = server.generate(&type_id, None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: ApiResponse<()> = response.json().await.unwrap();
    assert_eq!(body.code, 2002);

    let response = server
        .post_empty(&format!("/v1/reservations/{token}/release"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let again: ApiResponse<Generated> = server.generate(&type_id, None).await.json().await.unwrap();
    assert_eq!(again.data.unwrap().value, "VIP001");

    let response = server
        .post_empty(&format!("/v1/reservations/{second_token}/commit"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = server
        .post_empty(&format!("/v1/reservations/{second_token}/commit"))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_malformed_reservation_token() {
    let server = TestServer::new().await;
    let response = server.post_empty("/v1/reservations/not-a-token/commit").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_validate_manual_identifier() {
    let server = TestServer::new().await;
    let type_id = server
        .create_type(json!({
            "name": "Luhn MRN",
            "format_regex": "\\d{11}",
            "check_digit": { "algorithm": "mod10_luhn" }
        }))
        .await;

    let response = server
        .post(
            "/v1/identifiers/validate",
            &json!({ "identifier_type": type_id, "value": "79927398713" }),
        )
        .await;
    let body: ApiResponse<Value> = response.json().await.unwrap();
    assert_eq!(body.data.unwrap()["valid"], true);

    let response = server
        .post(
            "/v1/identifiers/validate",
            &json!({ "identifier_type": type_id, "value": "79927398710" }),
        )
        .await;
    let body: ApiResponse<Value> = response.json().await.unwrap();
    assert_eq!(body.data.unwrap()["valid"], false);
}

// ============================================================================
// Policy Tests
// ============================================================================

#[tokio::test]
async fn test_policy_upsert_list_delete() {
    let server = TestServer::new().await;
    let type_id = server.create_type(json!({ "name": "MRN" })).await;
    let source_id = server.create_source(mrn_sequential(&type_id)).await;

    let first = server
        .set_policy(json!({ "identifier_type": type_id, "source": source_id }))
        .await;
    let second = server
        .set_policy(json!({
            "identifier_type": type_id,
            "source": source_id,
            "automatic_generation": false,
            "manual_entry_allowed": true
        }))
        .await;
    assert_eq!(first["id"], second["id"]);

    let response = server
        .get(&format!("/v1/policies?identifier_type={type_id}"))
        .await;
    let body: ApiResponse<Vec<Value>> = response.json().await.unwrap();
    assert_eq!(body.data.unwrap().len(), 1);

    let policy_id = first["id"].as_str().unwrap();
    let response = server.delete(&format!("/v1/policies/{policy_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = server.delete(&format!("/v1/policies/{policy_id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_policy_requires_a_mode() {
    let server = TestServer::new().await;
    let type_id = server.create_type(json!({ "name": "MRN" })).await;
    let source_id = server.create_source(mrn_sequential(&type_id)).await;

    let response = server
        .put(
            "/v1/policies",
            &json!({
                "identifier_type": type_id,
                "source": source_id,
                "automatic_generation": false,
                "manual_entry_allowed": false
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_generation() {
    let server = Arc::new(TestServer::new().await);
    let type_id = server.create_type(json!({ "name": "MRN" })).await;
    let source_id = server.create_source(mrn_sequential(&type_id)).await;
    server
        .set_policy(json!({ "identifier_type": type_id, "source": source_id }))
        .await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let server = Arc::clone(&server);
        let type_id = type_id.clone();
        handles.push(tokio::spawn(async move {
            let mut values = Vec::new();
            for _ in 0..5 {
                let body: ApiResponse<Generated> =
                    server.generate(&type_id, None).await.json().await.unwrap();
                values.push(body.data.unwrap().value);
            }
            values
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), total, "duplicate identifiers issued");
    assert_eq!(total, 50);
}

// ============================================================================
// Edge Cases
// ============================================================================

#[tokio::test]
async fn test_unknown_route() {
    let server = TestServer::new().await;
    let response = server.get("/v1/unknown").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

//! Integration tests for the registry backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::{Config, LogFormat};
use crate::db::{init_database, Repository};
use crate::models::ContentInventory;
use crate::poller::{ContentProbe, Poller, ProbeError, ProbeTarget};
use crate::{create_router, AppState};

const ADMIN_KEY: &str = "test-admin-key";
const USER_KEY: &str = "test-user-key";

/// Remote credential the fake Cognos servers accept.
const GOOD_CREDENTIAL: &str = "cognos-good";

/// Probe that accepts only `GOOD_CREDENTIAL`.
struct CredentialProbe;

#[async_trait]
impl ContentProbe for CredentialProbe {
    async fn fetch_inventory(&self, target: &ProbeTarget) -> Result<ContentInventory, ProbeError> {
        if target.api_key.expose() == GOOD_CREDENTIAL {
            Ok(ContentInventory {
                report_count: 3,
                dashboard_count: 2,
                data_module_count: 2,
            })
        } else {
            Err(ProbeError::Unauthorized(401))
        }
    }
}

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    repo: Arc<Repository>,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_key(ADMIN_KEY).await
    }

    async fn with_key(key: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        // Create config
        let config = Config {
            admin_psk: Some(ADMIN_KEY.to_string()),
            user_psk: Some(USER_KEY.to_string()),
            db_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            log_format: LogFormat::Text,
            poll_timeout: Duration::from_secs(5),
            poll_concurrency: 4,
            poll_interval: None,
            demo_mode: false,
        };

        let poller = Poller::new(
            repo.clone(),
            Arc::new(CredentialProbe),
            config.poll_timeout,
            config.poll_concurrency,
        );

        let state = AppState {
            repo: repo.clone(),
            poller,
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-api-key", key.parse().unwrap());
        headers.insert("x-user-name", "alice".parse().unwrap());

        TestFixture {
            client: Client::builder().default_headers(headers).build().unwrap(),
            base_url,
            repo,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Enroll a server and return its JSON body.
    async fn enroll(&self, name: &str, credential: &str, active: bool) -> Value {
        let resp = self
            .client
            .post(self.url("/api/servers"))
            .json(&json!({
                "serverName": name,
                "baseUrl": "https://cognos.client1.com",
                "apiKey": credential,
                "prontoDebtorCode": "DC001",
                "prontoXiVersion": "11.2.5",
                "isActive": active
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        resp.json().await.unwrap()
    }

    async fn get_json(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn post_json(&self, path: &str) -> (u16, Value) {
        let resp = self.client.post(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth_missing_psk() {
    let fixture = TestFixture::new().await;

    // Request without API key
    let resp = Client::new()
        .get(fixture.url("/api/servers"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_invalid_psk() {
    let fixture = TestFixture::with_key("wrong-key").await;

    let (status, _) = fixture.get_json("/api/servers").await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_user_role_can_read_and_poll_but_not_enroll() {
    let admin = TestFixture::new().await;
    let server = admin.enroll("Prod 1", GOOD_CREDENTIAL, true).await;
    let id = server["id"].as_str().unwrap();

    // Second client against the same server with the user key
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("x-api-key", USER_KEY.parse().unwrap());
    let user = Client::builder().default_headers(headers).build().unwrap();

    let resp = user.get(admin.url("/api/servers")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let resp = user
        .post(admin.url(&format!("/api/servers/{}/poll", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = user
        .post(admin.url("/api/servers"))
        .json(&json!({ "serverName": "Nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let resp = user
        .delete(admin.url(&format!("/api/servers/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_enroll_and_get_hides_api_key() {
    let fixture = TestFixture::new().await;

    let created = fixture.enroll("Prod 1", GOOD_CREDENTIAL, true).await;
    assert_eq!(created["serverName"], "Prod 1");
    assert_eq!(created["pollStatus"], "NEVER_POLLED");
    assert_eq!(created["enrolledBy"], "alice");
    assert!(created["lastPollTime"].is_null());
    assert!(created.get("apiKey").is_none());

    let id = created["id"].as_str().unwrap();
    let resp = fixture
        .client
        .get(fixture.url(&format!("/api/servers/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(!text.contains(GOOD_CREDENTIAL));
    assert!(!text.contains("apiKey"));

    let fetched: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(fetched["pollStatus"], "NEVER_POLLED");
    assert_eq!(fetched["enrollmentDate"], created["enrollmentDate"]);
}

#[tokio::test]
async fn test_enroll_rejects_bad_base_url() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/servers"))
        .json(&json!({
            "serverName": "Broken",
            "baseUrl": "not-a-url",
            "apiKey": GOOD_CREDENTIAL,
            "prontoDebtorCode": "DC001",
            "prontoXiVersion": "11.2.5"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    let fields = body["error"]["details"]["fields"].as_array().unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0]["field"], "baseUrl");

    // No record created
    let (_, list) = fixture.get_json("/api/servers").await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_enroll_reports_all_missing_fields() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/servers"))
        .json(&json!({ "serverName": "Only a name" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    let fields: Vec<&str> = body["error"]["details"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert_eq!(
        fields,
        vec!["baseUrl", "apiKey", "prontoDebtorCode", "prontoXiVersion"]
    );
}

#[tokio::test]
async fn test_duplicate_server_name() {
    let fixture = TestFixture::new().await;
    fixture.enroll("Prod 1", GOOD_CREDENTIAL, true).await;

    let resp = fixture
        .client
        .post(fixture.url("/api/servers"))
        .json(&json!({
            "serverName": "Prod 1",
            "baseUrl": "https://other.example.com",
            "apiKey": "k",
            "prontoDebtorCode": "DC002",
            "prontoXiVersion": "11.2.5"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "DUPLICATE_SERVER_NAME");
}

#[tokio::test]
async fn test_update_with_blank_api_key_keeps_credential() {
    let fixture = TestFixture::new().await;
    let created = fixture.enroll("Prod 1", GOOD_CREDENTIAL, true).await;
    let id = created["id"].as_str().unwrap();

    let resp = fixture
        .client
        .put(fixture.url(&format!("/api/servers/{}", id)))
        .json(&json!({
            "serverName": "Prod 1 (renamed)",
            "baseUrl": "https://cognos.client1.com/",
            "apiKey": "   "
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["serverName"], "Prod 1 (renamed)");
    assert_eq!(updated["baseUrl"], "https://cognos.client1.com");
    assert_eq!(updated["prontoDebtorCode"], "DC001");
    assert!(updated.get("apiKey").is_none());

    // The old credential still works
    let (status, result) = fixture.post_json(&format!("/api/servers/{}/poll", id)).await;
    assert_eq!(status, 200);
    assert_eq!(result["pollStatus"], "SUCCESS");
}

#[tokio::test]
async fn test_patch_rotates_credential() {
    let fixture = TestFixture::new().await;
    let created = fixture.enroll("Prod 1", GOOD_CREDENTIAL, true).await;
    let id = created["id"].as_str().unwrap();

    let resp = fixture
        .client
        .patch(fixture.url(&format!("/api/servers/{}", id)))
        .json(&json!({ "apiKey": "revoked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let (_, result) = fixture.post_json(&format!("/api/servers/{}/poll", id)).await;
    assert_eq!(result["pollStatus"], "FAILED");
    assert_eq!(result["outcome"], "FAILED");
}

#[tokio::test]
async fn test_update_unknown_server() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .put(fixture.url("/api/servers/non-existent-id"))
        .json(&json!({ "serverName": "Ghost" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_failed_then_successful_poll_clears_error() {
    let fixture = TestFixture::new().await;
    let created = fixture.enroll("Prod 1", "stale-credential", true).await;
    let id = created["id"].as_str().unwrap();

    let (status, failed) = fixture.post_json(&format!("/api/servers/{}/poll", id)).await;
    assert_eq!(status, 200);
    assert_eq!(failed["pollStatus"], "FAILED");
    assert!(failed["lastError"].as_str().unwrap().contains("401"));
    assert!(failed["lastPollTime"].is_string());

    fixture
        .client
        .put(fixture.url(&format!("/api/servers/{}", id)))
        .json(&json!({ "apiKey": GOOD_CREDENTIAL }))
        .send()
        .await
        .unwrap();

    let (_, ok) = fixture.post_json(&format!("/api/servers/{}/poll", id)).await;
    assert_eq!(ok["pollStatus"], "SUCCESS");
    assert!(ok["lastError"].is_null());
    assert_eq!(ok["inventory"]["reportCount"], 3);

    let (_, fetched) = fixture.get_json(&format!("/api/servers/{}", id)).await;
    assert_eq!(fetched["pollStatus"], "SUCCESS");
    assert!(fetched["lastError"].is_null());

    let (status, snapshots) = fixture
        .get_json(&format!("/api/servers/{}/metadata", id))
        .await;
    assert_eq!(status, 200);
    let snapshots = snapshots.as_array().unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0]["dashboardCount"], 2);
}

#[tokio::test]
async fn test_poll_in_progress_is_conflict() {
    let fixture = TestFixture::new().await;
    let created = fixture.enroll("Prod 1", GOOD_CREDENTIAL, true).await;
    let id = created["id"].as_str().unwrap();

    // Simulate a poll already in flight
    fixture.repo.begin_poll(id).await.unwrap();

    let (status, body) = fixture.post_json(&format!("/api/servers/{}/poll", id)).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "POLL_IN_PROGRESS");

    let (_, fetched) = fixture.get_json(&format!("/api/servers/{}", id)).await;
    assert_eq!(fetched["pollStatus"], "IN_PROGRESS");
}

#[tokio::test]
async fn test_poll_unknown_server() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture.post_json("/api/servers/non-existent-id/poll").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_poll_all_only_polls_active_servers() {
    let fixture = TestFixture::new().await;
    let a = fixture.enroll("A", GOOD_CREDENTIAL, true).await;
    let b = fixture.enroll("B", GOOD_CREDENTIAL, false).await;
    let c = fixture.enroll("C", "stale-credential", true).await;

    let (status, results) = fixture.post_json("/api/servers/poll-all").await;
    assert_eq!(status, 200);
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["serverId"], a["id"]);
    assert_eq!(results[0]["pollStatus"], "SUCCESS");
    assert_eq!(results[1]["serverId"], c["id"]);
    assert_eq!(results[1]["pollStatus"], "FAILED");

    let (_, fetched_b) = fixture
        .get_json(&format!("/api/servers/{}", b["id"].as_str().unwrap()))
        .await;
    assert_eq!(fetched_b["pollStatus"], "NEVER_POLLED");
}

#[tokio::test]
async fn test_list_filters() {
    let fixture = TestFixture::new().await;
    fixture.enroll("Alpha", GOOD_CREDENTIAL, true).await;
    fixture.enroll("Beta", GOOD_CREDENTIAL, false).await;

    let (_, all) = fixture.get_json("/api/servers").await;
    let names: Vec<&str> = all
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["serverName"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Alpha", "Beta"]);

    let (_, active) = fixture.get_json("/api/servers?active=true").await;
    let active = active.as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["serverName"], "Alpha");

    let (_, found) = fixture.get_json("/api/servers?q=bet").await;
    assert_eq!(found.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_summary_counts() {
    let fixture = TestFixture::new().await;
    let a = fixture.enroll("A", GOOD_CREDENTIAL, true).await;
    let b = fixture.enroll("B", "stale-credential", true).await;
    fixture.enroll("C", GOOD_CREDENTIAL, false).await;

    fixture
        .post_json(&format!("/api/servers/{}/poll", a["id"].as_str().unwrap()))
        .await;
    fixture
        .post_json(&format!("/api/servers/{}/poll", b["id"].as_str().unwrap()))
        .await;

    let (status, summary) = fixture.get_json("/api/servers/summary").await;
    assert_eq!(status, 200);
    assert_eq!(summary["total"], 3);
    assert_eq!(summary["active"], 2);
    assert_eq!(summary["success"], 1);
    assert_eq!(summary["failed"], 1);
    assert_eq!(summary["neverPolled"], 1);
    assert_eq!(summary["inProgress"], 0);
}

#[tokio::test]
async fn test_delete_server() {
    let fixture = TestFixture::new().await;
    let created = fixture.enroll("Prod 1", GOOD_CREDENTIAL, true).await;
    let id = created["id"].as_str().unwrap();

    let resp = fixture
        .client
        .delete(fixture.url(&format!("/api/servers/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let (status, _) = fixture.get_json(&format!("/api/servers/{}", id)).await;
    assert_eq!(status, 404);

    let resp = fixture
        .client
        .delete(fixture.url(&format!("/api/servers/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_metadata_unknown_server() {
    let fixture = TestFixture::new().await;

    let (status, _) = fixture.get_json("/api/servers/non-existent-id/metadata").await;
    assert_eq!(status, 404);
}

//! Remote content probe against a Cognos server's REST API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::models::{ApiKey, ContentInventory, ServerRecord};

/// Path of the content listing endpoint, relative to the server's base URL.
pub const CONTENT_PATH: &str = "/api/v1/content";

/// What a probe needs to reach one server.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub server_name: String,
    pub base_url: String,
    pub api_key: ApiKey,
}

impl From<&ServerRecord> for ProbeTarget {
    fn from(record: &ServerRecord) -> Self {
        Self {
            server_name: record.server_name.clone(),
            base_url: record.base_url.clone(),
            api_key: record.api_key.clone(),
        }
    }
}

/// Why a remote check failed. Recorded on the server, never surfaced as an API error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Connection, DNS or TLS failure
    Network(String),
    /// The server rejected the credential
    Unauthorized(u16),
    /// Any other non-success HTTP status
    Status(u16),
    /// The body was not the expected JSON
    InvalidResponse(String),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Network(msg) => write!(f, "Network error: {}", msg),
            ProbeError::Unauthorized(code) => {
                write!(f, "Authentication rejected by server (HTTP {})", code)
            }
            ProbeError::Status(code) => write!(f, "Unexpected HTTP status {}", code),
            ProbeError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Capability to verify a remote server and read its content counts.
#[async_trait]
pub trait ContentProbe: Send + Sync {
    async fn fetch_inventory(&self, target: &ProbeTarget) -> Result<ContentInventory, ProbeError>;
}

/// HTTP probe for Cognos Analytics servers.
pub struct CognosProbe {
    client: Client,
    demo_mode: bool,
}

impl CognosProbe {
    pub fn new(demo_mode: bool) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("cognos-registry/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, demo_mode })
    }
}

#[async_trait]
impl ContentProbe for CognosProbe {
    async fn fetch_inventory(&self, target: &ProbeTarget) -> Result<ContentInventory, ProbeError> {
        if self.demo_mode {
            tracing::debug!("Demo mode: returning canned inventory for {}", target.server_name);
            return Ok(demo_inventory());
        }

        let url = format!("{}{}", target.base_url, CONTENT_PATH);
        let response = self
            .client
            .get(&url)
            .bearer_auth(target.api_key.expose())
            .send()
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProbeError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProbeError::InvalidResponse(e.to_string()))?;

        inventory_from_body(&body)
    }
}

/// Count the content arrays in a `/api/v1/content` body.
pub fn inventory_from_body(body: &Value) -> Result<ContentInventory, ProbeError> {
    let Some(object) = body.as_object() else {
        return Err(ProbeError::InvalidResponse(
            "expected a JSON object".to_string(),
        ));
    };

    let count = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.len() as i64)
            .unwrap_or(0)
    };

    Ok(ContentInventory {
        report_count: count("reports"),
        dashboard_count: count("dashboards"),
        data_module_count: count("dataModules"),
    })
}

/// Inventory served in demo mode: three reports, two dashboards, two data modules.
fn demo_inventory() -> ContentInventory {
    ContentInventory {
        report_count: 3,
        dashboard_count: 2,
        data_module_count: 2,
    }
}

//! Server record model and the enrollment/edit payloads.

use serde::{Deserialize, Serialize};

use super::PollStatus;

/// Secret credential for a remote Cognos server.
///
/// Never serialized and redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// An enrolled Cognos/Pronto integration server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: String,
    pub server_name: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: ApiKey,
    pub pronto_debtor_code: String,
    pub pronto_xi_version: String,
    pub is_active: bool,
    pub poll_status: PollStatus,
    pub last_poll_time: Option<String>,
    pub last_error: Option<String>,
    pub enrolled_by: String,
    pub enrollment_date: String,
    pub updated_at: String,
}

/// Request body for enrolling a server.
///
/// Every field is optional at the serde level so missing fields surface as
/// field-level validation errors instead of a generic decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollServerRequest {
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub pronto_debtor_code: Option<String>,
    #[serde(default)]
    pub pronto_xi_version: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Request body for editing a server. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServerRequest {
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub pronto_debtor_code: Option<String>,
    #[serde(default)]
    pub pronto_xi_version: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// A validated, normalized enrollment ready to be committed.
#[derive(Debug, Clone)]
pub struct NewServer {
    pub server_name: String,
    pub base_url: String,
    pub api_key: ApiKey,
    pub pronto_debtor_code: String,
    pub pronto_xi_version: String,
    pub is_active: bool,
}

/// A validated partial edit. `None` means "leave as is".
#[derive(Debug, Clone, Default)]
pub struct ServerChanges {
    pub server_name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<ApiKey>,
    pub pronto_debtor_code: Option<String>,
    pub pronto_xi_version: Option<String>,
    pub is_active: Option<bool>,
}

impl ServerChanges {
    pub fn is_empty(&self) -> bool {
        self.server_name.is_none()
            && self.base_url.is_none()
            && self.api_key.is_none()
            && self.pronto_debtor_code.is_none()
            && self.pronto_xi_version.is_none()
            && self.is_active.is_none()
    }
}

/// Query parameters accepted by `GET /api/servers`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFilter {
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub debtor_code: Option<String>,
    #[serde(default)]
    pub xi_version: Option<String>,
    /// Substring over server name and debtor code, ignoring ASCII case
    #[serde(default)]
    pub q: Option<String>,
}

impl ServerFilter {
    pub fn active_only() -> Self {
        Self {
            active: Some(true),
            ..Self::default()
        }
    }
}

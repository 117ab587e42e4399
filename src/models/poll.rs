//! Poll lifecycle types: status, per-server results and content snapshots.

use serde::{Deserialize, Serialize};

/// Poll state of a server record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollStatus {
    NeverPolled,
    InProgress,
    Success,
    Failed,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::NeverPolled => "NEVER_POLLED",
            PollStatus::InProgress => "IN_PROGRESS",
            PollStatus::Success => "SUCCESS",
            PollStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEVER_POLLED" => Some(PollStatus::NeverPolled),
            "IN_PROGRESS" => Some(PollStatus::InProgress),
            "SUCCESS" => Some(PollStatus::Success),
            "FAILED" => Some(PollStatus::Failed),
            _ => None,
        }
    }
}

/// How a single poll request ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollOutcome {
    Success,
    Failed,
    /// A sweep found the server already being polled and left it alone
    SkippedInProgress,
}

/// Content counts reported by a Cognos server.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContentInventory {
    pub report_count: i64,
    pub dashboard_count: i64,
    pub data_module_count: i64,
}

/// Result of polling one server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    pub server_id: String,
    pub server_name: String,
    pub outcome: PollOutcome,
    pub poll_status: PollStatus,
    pub last_poll_time: Option<String>,
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<ContentInventory>,
}

/// Content counts captured by one successful poll.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSnapshot {
    pub server_id: String,
    #[serde(flatten)]
    pub inventory: ContentInventory,
    pub captured_at: String,
}

/// Dashboard counts derived from the registry.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub total: usize,
    pub active: usize,
    pub success: usize,
    pub failed: usize,
    pub never_polled: usize,
    pub in_progress: usize,
}

/// Query parameters for the metadata history endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataQuery {
    #[serde(default = "default_metadata_limit")]
    pub limit: i64,
}

fn default_metadata_limit() -> i64 {
    20
}

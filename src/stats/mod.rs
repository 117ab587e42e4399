//! Dashboard status aggregation over the registry.

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{PollStatus, ServerFilter, ServerRecord, StatusSummary};

/// Count servers by activity and poll status in a single pass.
///
/// Every server lands in exactly one status bucket.
pub fn summarize(servers: &[ServerRecord]) -> StatusSummary {
    servers
        .iter()
        .fold(StatusSummary::default(), |mut summary, server| {
            summary.total += 1;
            if server.is_active {
                summary.active += 1;
            }
            match server.poll_status {
                PollStatus::Success => summary.success += 1,
                PollStatus::Failed => summary.failed += 1,
                PollStatus::NeverPolled => summary.never_polled += 1,
                PollStatus::InProgress => summary.in_progress += 1,
            }
            summary
        })
}

/// Summarize the registry's current snapshot. Nothing is cached.
pub async fn summarize_registry(repo: &Repository) -> Result<StatusSummary, AppError> {
    let servers = repo.list_servers(&ServerFilter::default()).await?;
    Ok(summarize(&servers))
}

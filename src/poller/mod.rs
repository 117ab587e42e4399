//! Poll orchestrator.
//!
//! Drives a server through NEVER_POLLED/SUCCESS/FAILED -> IN_PROGRESS ->
//! SUCCESS/FAILED. The store's compare-and-set on IN_PROGRESS keeps at most
//! one poll in flight per server; the probe is bounded by a timeout so a
//! record always reaches a terminal state.

mod probe;

pub use probe::*;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    ContentInventory, PollOutcome, PollResult, PollStatus, ServerFilter, ServerRecord,
};

/// Runs polls against enrolled servers and records their outcome.
#[derive(Clone)]
pub struct Poller {
    repo: Arc<Repository>,
    probe: Arc<dyn ContentProbe>,
    timeout: Duration,
    concurrency: usize,
}

impl Poller {
    pub fn new(
        repo: Arc<Repository>,
        probe: Arc<dyn ContentProbe>,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            repo,
            probe,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Poll one server and wait for its terminal state.
    ///
    /// Fails with `Conflict` if the server is already being polled. A remote
    /// failure is not an error here: it is carried inside the `PollResult`.
    /// The poll runs in its own task, so a caller that goes away mid-poll
    /// never leaves the record IN_PROGRESS.
    pub async fn poll_one(&self, id: &str) -> Result<PollResult, AppError> {
        self.spawn_poll(id.to_string(), None).await
    }

    /// Poll every active server.
    ///
    /// Each server is polled independently; one failure never aborts the
    /// sweep. Servers already in flight are reported as skipped and servers
    /// deleted mid-sweep are left out. Results follow enrollment order.
    pub async fn poll_all(&self) -> Result<Vec<PollResult>, AppError> {
        let servers = self.repo.list_servers(&ServerFilter::active_only()).await?;
        tracing::info!("Polling {} active servers", servers.len());

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, server) in servers.into_iter().enumerate() {
            let poller = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let permit = semaphore.acquire_owned().await.ok();
                let result = poller.spawn_poll(server.id.clone(), permit).await;
                (index, server, result)
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(result))) => results.push((index, result)),
                Ok((index, server, Err(AppError::Conflict { .. }))) => {
                    tracing::debug!(server_id = %server.id, "Skipping server already being polled");
                    match self.repo.get_server(&server.id).await {
                        Ok(Some(current)) => results.push((index, skipped_result(&current))),
                        Ok(None) => {
                            tracing::debug!(server_id = %server.id, "Server removed during sweep")
                        }
                        Err(e) => {
                            tracing::error!(server_id = %server.id, "Sweep could not read server: {}", e)
                        }
                    }
                }
                Ok((_, server, Err(AppError::NotFound(_)))) => {
                    tracing::debug!(server_id = %server.id, "Server removed during sweep");
                }
                Ok((_, server, Err(e))) => {
                    tracing::error!(server_id = %server.id, "Sweep could not poll server: {}", e);
                }
                Err(e) => tracing::error!("Sweep task aborted: {}", e),
            }
        }

        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, result)| result).collect())
    }

    /// Run one poll in a detached task and wait for it.
    ///
    /// Dropping the returned future only stops the wait. The task keeps
    /// `permit` until the record is terminal.
    async fn spawn_poll(
        &self,
        id: String,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<PollResult, AppError> {
        let poller = self.clone();
        let handle = tokio::spawn(async move {
            let result = poller.run_poll(&id).await;
            drop(permit);
            result
        });

        handle.await.map_err(|e| {
            tracing::error!("Poll task failed: {}", e);
            AppError::Storage(format!("Poll task failed: {}", e))
        })?
    }

    /// Move a server to IN_PROGRESS, probe it and persist the terminal state.
    async fn run_poll(&self, id: &str) -> Result<PollResult, AppError> {
        let record = self.repo.begin_poll(id).await?;
        tracing::info!(server_id = %id, server = %record.server_name, "Poll started");

        let outcome = self.run_probe(&record).await;

        let finished = self
            .repo
            .finish_poll(id, &outcome)
            .await
            .map_err(|e| {
                tracing::error!(server_id = %id, "Failed to persist poll result: {}", e);
                e
            })?
            .ok_or_else(|| {
                tracing::warn!(server_id = %id, "Server deleted while it was being polled");
                AppError::server_not_found(id)
            })?;

        match &outcome {
            Ok(inventory) => {
                tracing::info!(
                    server_id = %id,
                    server = %finished.server_name,
                    reports = inventory.report_count,
                    dashboards = inventory.dashboard_count,
                    data_modules = inventory.data_module_count,
                    "Poll succeeded"
                );
                Ok(poll_result(&finished, PollOutcome::Success, Some(*inventory)))
            }
            Err(message) => {
                tracing::warn!(
                    server_id = %id,
                    server = %finished.server_name,
                    "Poll failed: {}",
                    message
                );
                Ok(poll_result(&finished, PollOutcome::Failed, None))
            }
        }
    }

    /// Run the probe in its own task, bounded by the poll timeout.
    ///
    /// A timeout, panic or remote error all come back as `Err(message)`.
    async fn run_probe(&self, record: &ServerRecord) -> Result<ContentInventory, String> {
        let probe = Arc::clone(&self.probe);
        let target = ProbeTarget::from(record);
        let mut handle = tokio::spawn(async move { probe.fetch_inventory(&target).await });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(inventory))) => Ok(inventory),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join_err)) => Err(format!("Poll task failed: {}", join_err)),
            Err(_) => {
                handle.abort();
                Err(format!("Poll timed out after {:?}", self.timeout))
            }
        }
    }

    /// Start the background sweep. It polls all active servers every
    /// `interval`; failures wait for the next sweep.
    pub fn spawn_sweeper(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match self.poll_all().await {
                    Ok(results) => {
                        let failed = results
                            .iter()
                            .filter(|r| r.outcome == PollOutcome::Failed)
                            .count();
                        tracing::info!(
                            "Scheduled sweep finished: {} polled, {} failed",
                            results.len(),
                            failed
                        );
                    }
                    Err(e) => tracing::error!("Scheduled sweep failed: {}", e),
                }
            }
        })
    }
}

fn poll_result(
    record: &ServerRecord,
    outcome: PollOutcome,
    inventory: Option<ContentInventory>,
) -> PollResult {
    PollResult {
        server_id: record.id.clone(),
        server_name: record.server_name.clone(),
        outcome,
        poll_status: record.poll_status,
        last_poll_time: record.last_poll_time.clone(),
        last_error: record.last_error.clone(),
        inventory,
    }
}

/// Result for a server a sweep left alone; `record` is its current row.
fn skipped_result(record: &ServerRecord) -> PollResult {
    poll_result(record, PollOutcome::SkippedInProgress, None)
}

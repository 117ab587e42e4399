//! Registry store: CRUD and poll-state transitions for enrolled servers.
//!
//! Every mutation of a server row is a single statement (or a transaction),
//! so readers never observe a half-applied edit.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    ApiKey, ContentInventory, MetadataSnapshot, NewServer, PollStatus, ServerChanges,
    ServerFilter, ServerRecord,
};

const SERVER_COLUMNS: &str = "id, server_name, base_url, api_key, pronto_debtor_code, pronto_xi_version, is_active, poll_status, last_poll_time, last_error, enrolled_by, enrollment_date, updated_at";

/// Message recorded on records left in flight by a previous process.
pub const INTERRUPTED_POLL_ERROR: &str = "Poll interrupted by service restart";

/// Database repository for all registry operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== SERVER OPERATIONS ====================

    /// List servers matching the filter, in enrollment order.
    pub async fn list_servers(&self, filter: &ServerFilter) -> Result<Vec<ServerRecord>, AppError> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM servers WHERE 1 = 1", SERVER_COLUMNS));

        if let Some(active) = filter.active {
            query.push(" AND is_active = ").push_bind(active as i32);
        }
        if let Some(code) = filter.debtor_code.as_deref().filter(|c| !c.is_empty()) {
            query.push(" AND pronto_debtor_code = ").push_bind(code.to_string());
        }
        if let Some(version) = filter.xi_version.as_deref().filter(|v| !v.is_empty()) {
            query.push(" AND pronto_xi_version = ").push_bind(version.to_string());
        }
        if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let pattern = like_pattern(q);
            query
                .push(" AND (server_name LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR pronto_debtor_code LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        query.push(" ORDER BY seq");

        let rows = query.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(server_from_row).collect())
    }

    /// Get a server by ID.
    pub async fn get_server(&self, id: &str) -> Result<Option<ServerRecord>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM servers WHERE id = ?", SERVER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(server_from_row))
    }

    /// Check whether another server already uses `name`.
    async fn name_taken(&self, name: &str, exclude_id: Option<&str>) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM servers WHERE server_name = ? AND id <> ?")
            .bind(name)
            .bind(exclude_id.unwrap_or(""))
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n > 0)
    }

    /// Enroll a new server. The store assigns the ID.
    pub async fn create_server(
        &self,
        server: &NewServer,
        enrolled_by: &str,
    ) -> Result<ServerRecord, AppError> {
        if self.name_taken(&server.server_name, None).await? {
            return Err(AppError::duplicate_name(&server.server_name));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO servers (id, server_name, base_url, api_key, pronto_debtor_code, pronto_xi_version, is_active, poll_status, enrolled_by, enrollment_date, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&id)
        .bind(&server.server_name)
        .bind(&server.base_url)
        .bind(server.api_key.expose())
        .bind(&server.pronto_debtor_code)
        .bind(&server.pronto_xi_version)
        .bind(server.is_active as i32)
        .bind(PollStatus::NeverPolled.as_str())
        .bind(enrolled_by)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_name_violation(e, &server.server_name))?;

        Ok(ServerRecord {
            id,
            server_name: server.server_name.clone(),
            base_url: server.base_url.clone(),
            api_key: server.api_key.clone(),
            pronto_debtor_code: server.pronto_debtor_code.clone(),
            pronto_xi_version: server.pronto_xi_version.clone(),
            is_active: server.is_active,
            poll_status: PollStatus::NeverPolled,
            last_poll_time: None,
            last_error: None,
            enrolled_by: enrolled_by.to_string(),
            enrollment_date: now.clone(),
            updated_at: now,
        })
    }

    /// Apply a partial edit. Fields absent from `changes` keep their stored value.
    pub async fn update_server(
        &self,
        id: &str,
        changes: &ServerChanges,
    ) -> Result<ServerRecord, AppError> {
        if let Some(name) = changes.server_name.as_deref() {
            if self.name_taken(name, Some(id)).await? {
                return Err(AppError::duplicate_name(name));
            }
        }

        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE servers SET server_name = COALESCE(?, server_name), base_url = COALESCE(?, base_url), api_key = COALESCE(?, api_key), pronto_debtor_code = COALESCE(?, pronto_debtor_code), pronto_xi_version = COALESCE(?, pronto_xi_version), is_active = COALESCE(?, is_active), updated_at = ? WHERE id = ?"
        )
        .bind(&changes.server_name)
        .bind(&changes.base_url)
        .bind(changes.api_key.as_ref().map(ApiKey::expose))
        .bind(&changes.pronto_debtor_code)
        .bind(&changes.pronto_xi_version)
        .bind(changes.is_active.map(|b| b as i32))
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_name_violation(e, changes.server_name.as_deref().unwrap_or_default()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::server_not_found(id));
        }

        self.get_server(id)
            .await?
            .ok_or_else(|| AppError::server_not_found(id))
    }

    /// Delete a server and its content snapshots.
    pub async fn delete_server(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM servers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::server_not_found(id));
        }

        Ok(())
    }

    // ==================== POLL STATE ====================

    /// Move a server into IN_PROGRESS.
    ///
    /// Compare-and-set on `poll_status`: of two racing callers only one sees
    /// a row updated, the other gets a conflict.
    pub async fn begin_poll(&self, id: &str) -> Result<ServerRecord, AppError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE servers SET poll_status = ?, updated_at = ? WHERE id = ? AND poll_status <> ?",
        )
        .bind(PollStatus::InProgress.as_str())
        .bind(&now)
        .bind(id)
        .bind(PollStatus::InProgress.as_str())
        .execute(&self.pool)
        .await?;

        match self.get_server(id).await? {
            Some(record) if result.rows_affected() == 1 => Ok(record),
            Some(_) => Err(AppError::poll_in_progress(id)),
            None => Err(AppError::server_not_found(id)),
        }
    }

    /// Persist the terminal state of a poll.
    ///
    /// A success clears `last_error` and appends a content snapshot; a
    /// failure overwrites `last_error`. Returns `None` if the server was
    /// deleted while the poll was running.
    pub async fn finish_poll(
        &self,
        id: &str,
        outcome: &Result<ContentInventory, String>,
    ) -> Result<Option<ServerRecord>, AppError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let (status, last_error) = match outcome {
            Ok(_) => (PollStatus::Success, None),
            Err(message) => (PollStatus::Failed, Some(message.as_str())),
        };

        let result = sqlx::query(
            "UPDATE servers SET poll_status = ?, last_poll_time = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(&now)
        .bind(last_error)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        if let Ok(inventory) = outcome {
            sqlx::query(
                "INSERT INTO server_metadata (server_id, report_count, dashboard_count, data_module_count, captured_at) VALUES (?, ?, ?, ?, ?)"
            )
            .bind(id)
            .bind(inventory.report_count)
            .bind(inventory.dashboard_count)
            .bind(inventory.data_module_count)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.get_server(id).await
    }

    /// Fail every record a previous process left IN_PROGRESS.
    pub async fn recover_interrupted_polls(&self) -> Result<u64, AppError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE servers SET poll_status = ?, last_poll_time = ?, last_error = ?, updated_at = ? WHERE poll_status = ?",
        )
        .bind(PollStatus::Failed.as_str())
        .bind(&now)
        .bind(INTERRUPTED_POLL_ERROR)
        .bind(&now)
        .bind(PollStatus::InProgress.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ==================== CONTENT SNAPSHOTS ====================

    /// Content snapshots for a server, newest first.
    pub async fn list_metadata(
        &self,
        server_id: &str,
        limit: i64,
    ) -> Result<Vec<MetadataSnapshot>, AppError> {
        let rows = sqlx::query(
            "SELECT server_id, report_count, dashboard_count, data_module_count, captured_at FROM server_metadata WHERE server_id = ? ORDER BY id DESC LIMIT ?"
        )
        .bind(server_id)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| MetadataSnapshot {
                server_id: row.get("server_id"),
                inventory: ContentInventory {
                    report_count: row.get("report_count"),
                    dashboard_count: row.get("dashboard_count"),
                    data_module_count: row.get("data_module_count"),
                },
                captured_at: row.get("captured_at"),
            })
            .collect())
    }
}

/// Map a UNIQUE violation on `server_name` to a conflict; other errors pass through.
fn unique_name_violation(err: sqlx::Error, name: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::duplicate_name(name),
        _ => err.into(),
    }
}

/// Build a LIKE pattern matching `needle` anywhere.
///
/// SQLite's LIKE folds ASCII case only, so the needle keeps its case and
/// non-ASCII characters match exactly on both sides.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn server_from_row(row: &SqliteRow) -> ServerRecord {
    let status: String = row.get("poll_status");
    let is_active: i32 = row.get("is_active");
    let api_key: String = row.get("api_key");

    ServerRecord {
        id: row.get("id"),
        server_name: row.get("server_name"),
        base_url: row.get("base_url"),
        api_key: ApiKey::new(api_key),
        pronto_debtor_code: row.get("pronto_debtor_code"),
        pronto_xi_version: row.get("pronto_xi_version"),
        is_active: is_active != 0,
        poll_status: PollStatus::parse(&status).unwrap_or_else(|| {
            tracing::warn!("Unknown poll status {:?} in store, treating as FAILED", status);
            PollStatus::Failed
        }),
        last_poll_time: row.get("last_poll_time"),
        last_error: row.get("last_error"),
        enrolled_by: row.get("enrolled_by"),
        enrollment_date: row.get("enrollment_date"),
        updated_at: row.get("updated_at"),
    }
}

//! SQLite persistence for broadcast run records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use crate::broadcast::model::{BroadcastPayload, BroadcastRun, Counts, NewRun, Pagination, RunStatus, RunUpdate};
use crate::broadcast::store::RunStore;
use crate::storage::db::{get_connection, DbPool};
use crate::storage::StoreError;

const RUN_COLUMNS: &str = "id, channel, target_selector, email_selector, payload, status, \
     total, sent, failed, blocked, error, created_at, completed_at";

const INTERRUPTED_ERROR: &str = "interrupted by process restart";

/// Row as stored, before decoding enums, JSON and timestamps.
struct RawRun {
    id: i64,
    channel: String,
    target_selector: String,
    email_selector: Option<String>,
    payload: String,
    status: String,
    total: i64,
    sent: i64,
    failed: i64,
    blocked: i64,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            channel: row.get(1)?,
            target_selector: row.get(2)?,
            email_selector: row.get(3)?,
            payload: row.get(4)?,
            status: row.get(5)?,
            total: row.get(6)?,
            sent: row.get(7)?,
            failed: row.get(8)?,
            blocked: row.get(9)?,
            error: row.get(10)?,
            created_at: row.get(11)?,
            completed_at: row.get(12)?,
        })
    }

    fn decode(self) -> Result<BroadcastRun, StoreError> {
        let id = self.id;
        let corrupt = |what: &str, detail: String| StoreError::Corrupt(format!("run {}: {} ({})", id, what, detail));

        let payload: BroadcastPayload =
            serde_json::from_str(&self.payload).map_err(|e| corrupt("payload", e.to_string()))?;
        let completed_at = match self.completed_at {
            Some(raw) => Some(parse_timestamp(&raw).map_err(|e| corrupt("completed_at", e))?),
            None => None,
        };

        Ok(BroadcastRun {
            id,
            channel: self.channel.parse().map_err(|_| corrupt("channel", self.channel.clone()))?,
            target_selector: self.target_selector,
            email_selector: self.email_selector,
            payload,
            status: self.status.parse().map_err(|_| corrupt("status", self.status.clone()))?,
            counts: Counts {
                total: to_count(self.total),
                sent: to_count(self.sent),
                failed: to_count(self.failed),
                blocked: to_count(self.blocked),
            },
            error: self.error,
            created_at: parse_timestamp(&self.created_at).map_err(|e| corrupt("created_at", e))?,
            completed_at,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("{}: {}", raw, e))
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct SqliteRunStore {
    pool: DbPool,
}

impl SqliteRunStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create(&self, run: NewRun) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(&run.payload).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let conn = get_connection(&self.pool)?;
        conn.execute(
            "INSERT INTO broadcast_runs (channel, target_selector, email_selector, payload, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.channel.as_ref(),
                run.target_selector,
                run.email_selector,
                payload,
                RunStatus::Queued.as_ref(),
                run.created_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn update(&self, id: i64, update: RunUpdate) -> Result<(), StoreError> {
        let mut assignments: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = update.status {
            assignments.push("status");
            values.push(Value::Text(status.as_ref().to_string()));
        }
        if let Some(counts) = update.counts {
            for (column, value) in [
                ("total", counts.total),
                ("sent", counts.sent),
                ("failed", counts.failed),
                ("blocked", counts.blocked),
            ] {
                assignments.push(column);
                values.push(Value::Integer(to_db(value)));
            }
        }
        if let Some(error) = update.error {
            assignments.push("error");
            values.push(Value::Text(error));
        }
        if let Some(completed_at) = update.completed_at {
            assignments.push("completed_at");
            values.push(Value::Text(completed_at.to_rfc3339()));
        }

        if assignments.is_empty() {
            return Ok(());
        }

        let set_clause = assignments
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        values.push(Value::Integer(id));
        let sql = format!("UPDATE broadcast_runs SET {} WHERE id = ?{}", set_clause, values.len());

        let conn = get_connection(&self.pool)?;
        let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<BroadcastRun>, StoreError> {
        let conn = get_connection(&self.pool)?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM broadcast_runs WHERE id = ?1", RUN_COLUMNS),
                [id],
                RawRun::from_row,
            )
            .optional()?;
        raw.map(RawRun::decode).transpose()
    }

    async fn list(&self, page: Pagination) -> Result<Vec<BroadcastRun>, StoreError> {
        let conn = get_connection(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM broadcast_runs ORDER BY id DESC LIMIT ?1 OFFSET ?2",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![page.limit, page.offset], RawRun::from_row)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?.decode()?);
        }
        Ok(runs)
    }

    async fn fail_interrupted(&self) -> Result<usize, StoreError> {
        let conn = get_connection(&self.pool)?;
        let touched = conn.execute(
            "UPDATE broadcast_runs SET status = ?1, error = ?2, completed_at = ?3
             WHERE status IN (?4, ?5, ?6)",
            params![
                RunStatus::Failed.as_ref(),
                INTERRUPTED_ERROR,
                Utc::now().to_rfc3339(),
                RunStatus::Queued.as_ref(),
                RunStatus::InProgress.as_ref(),
                RunStatus::Cancelling.as_ref(),
            ],
        )?;
        Ok(touched)
    }
}

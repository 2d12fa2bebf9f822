//! Per-tenant workflow history collection.
//!
//! Holds the merged report documents produced when a workflow execution
//! reaches a terminal state. Documents are stored whole as JSON, with a few
//! fields lifted into columns for querying.

use crate::error::{Error, Result};
use crate::event::{parse_timestamp, timestamp};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

/// Query over the workflow history of one tenant.
#[derive(Debug, Clone, Default)]
pub struct InstanceQuery {
    /// Only workflows started at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Terminal state filter (`end` or `error`)
    pub state: Option<String>,
    /// Substring match on the template title
    pub search: Option<String>,
    /// Pagination offset
    pub offset: Option<i64>,
    /// Pagination limit
    pub limit: Option<i64>,
}

/// One page of history results.
#[derive(Debug, Clone)]
pub struct InstancePage {
    /// Total matches regardless of offset/limit
    pub total: i64,
    /// Report documents, most recently finished first
    pub documents: Vec<Value>,
}

/// Workflow history for a single tenant database.
#[derive(Clone)]
pub struct InstanceCollection {
    pool: SqlitePool,
}

impl InstanceCollection {
    /// Wrap a tenant connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent schema/index setup for this tenant.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workflow_instances (
                id           TEXT PRIMARY KEY,
                state        TEXT NOT NULL,
                requester    TEXT,
                title        TEXT,
                started_at   TEXT NOT NULL,
                completed_at TEXT,
                document     TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_instances_state ON workflow_instances(state)",
            "CREATE INDEX IF NOT EXISTS idx_instances_requester ON workflow_instances(requester)",
            "CREATE INDEX IF NOT EXISTS idx_instances_title ON workflow_instances(title)",
            "CREATE INDEX IF NOT EXISTS idx_instances_started ON workflow_instances(started_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_instances_completed ON workflow_instances(completed_at DESC)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Insert one finished-workflow report document.
    ///
    /// The document must carry the shape produced by the runtime registry:
    /// `{id, organization, requester, state, start, end, template, tasks}`.
    pub async fn insert(&self, report: &Value) -> Result<()> {
        let id = report
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Internal("report document missing 'id'".into()))?;
        let state = report
            .get("state")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Internal("report document missing 'state'".into()))?;
        let start = report
            .get("start")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Internal("report document missing 'start'".into()))?;
        let requester = report.get("requester").and_then(Value::as_str);
        let title = report.pointer("/template/title").and_then(Value::as_str);
        let end = report.get("end").and_then(Value::as_str);

        sqlx::query(
            "INSERT OR REPLACE INTO workflow_instances
                (id, state, requester, title, started_at, completed_at, document)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(id)
        .bind(state)
        .bind(requester)
        .bind(title)
        .bind(start)
        .bind(end)
        .bind(serde_json::to_string(report)?)
        .execute(&self.pool)
        .await?;

        debug!(%id, %state, "workflow report stored");
        Ok(())
    }

    /// Fetch one finished workflow by execution id.
    pub async fn get_one(&self, execution_id: Uuid) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT document FROM workflow_instances WHERE id = ?1")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let document: String = row.try_get("document")?;
                Ok(Some(serde_json::from_str(&document)?))
            }
            None => Ok(None),
        }
    }

    /// Filtered history listing, most recently finished first.
    pub async fn get(&self, query: &InstanceQuery) -> Result<InstancePage> {
        let total = {
            let mut builder =
                sqlx::QueryBuilder::new("SELECT COUNT(*) AS total FROM workflow_instances");
            Self::push_predicates(&mut builder, query);
            let row = builder.build().fetch_one(&self.pool).await?;
            row.try_get::<i64, _>("total")?
        };

        let mut builder = sqlx::QueryBuilder::new("SELECT document FROM workflow_instances");
        Self::push_predicates(&mut builder, query);
        builder.push(" ORDER BY completed_at DESC");
        if let Some(limit) = query.limit.filter(|l| *l > 0) {
            builder.push(" LIMIT ").push_bind(limit);
            if let Some(offset) = query.offset.filter(|o| *o >= 0) {
                builder.push(" OFFSET ").push_bind(offset);
            }
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        let documents = rows
            .iter()
            .map(|row| {
                let document: String = row.try_get("document")?;
                Ok(serde_json::from_str(&document)?)
            })
            .collect::<Result<Vec<Value>>>()?;

        Ok(InstancePage { total, documents })
    }

    fn push_predicates(builder: &mut sqlx::QueryBuilder<'_, sqlx::Sqlite>, query: &InstanceQuery) {
        builder.push(" WHERE 1=1");
        if let Some(since) = query.since {
            builder.push(" AND started_at >= ").push_bind(timestamp(since));
        }
        if let Some(state) = &query.state {
            builder.push(" AND state = ").push_bind(state.clone());
        }
        if let Some(search) = &query.search {
            builder
                .push(" AND title LIKE ")
                .push_bind(format!("%{search}%"));
        }
    }

    /// Parse the `start` field of a stored document (used by tests and
    /// report consumers that need a typed timestamp back).
    pub fn started_at(document: &Value) -> Result<DateTime<Utc>> {
        let raw = document
            .get("start")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Internal("report document missing 'start'".into()))?;
        parse_timestamp(raw)
    }
}

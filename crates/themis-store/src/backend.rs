//! Durable backend contract for bus events, plus its SQLite implementation.
//!
//! The coordinator in `themis-core` only ever talks to [`EventBackend`], so
//! backends can be swapped (SQLite, in-memory test doubles, etc.) without
//! touching the buffering logic.

use crate::error::{Error, Result};
use crate::event::{parse_timestamp, timestamp, BusEvent, EventFilter, EventStatus};

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

/// Contract every durable bus-event backend implements.
///
/// All write/read operations are fallible with [`Error::Unavailable`] as the
/// distinguishable "store unreachable" kind; `ping` is the health probe the
/// durability layer gates every decision on.
#[async_trait::async_trait]
pub trait EventBackend: Send + Sync {
    /// Idempotent schema/index setup, safe to repeat.
    async fn init(&self) -> Result<()>;

    /// Health probe; `false` means every write must go to the fallback.
    async fn ping(&self) -> bool;

    /// Persist one event.
    async fn store(&self, event: &BusEvent) -> Result<()>;

    /// Overwrite the status of a stored event.
    async fn update(&self, id: Uuid, status: EventStatus) -> Result<()>;

    /// Fetch stored events matching `filter`, oldest first.
    async fn retrieve(&self, filter: &EventFilter) -> Result<Vec<BusEvent>>;

    /// Backend name, for logging.
    fn name(&self) -> &str;
}

/// SQLite-backed durable store for bus events.
#[derive(Clone)]
pub struct SqliteEventBackend {
    pool: SqlitePool,
}

impl SqliteEventBackend {
    /// Open (or create) the event store at the given path.
    pub async fn from_path(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Unavailable(format!("mkdir {}: {e}", parent.display())))?;
        }
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| Error::Unavailable(format!("open {}: {e}", db_path.display())))?;

        // Enable WAL for read/write concurrency
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        let backend = Self { pool };
        backend.init().await?;
        info!("event backend initialized at {}", db_path.display());
        Ok(backend)
    }

    /// In-memory event store (for tests).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let backend = Self { pool };
        backend.init().await?;
        debug!("in-memory event backend initialized");
        Ok(backend)
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<BusEvent> {
        let id: String = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(BusEvent {
            id: Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("bad event id: {e}")))?,
            status: EventStatus::parse(&status)
                .ok_or_else(|| Error::Internal(format!("unknown event status '{status}'")))?,
            topic: row.try_get("topic")?,
            payload: row.try_get("payload")?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

#[async_trait::async_trait]
impl EventBackend for SqliteEventBackend {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS bus_events (
                id         TEXT PRIMARY KEY,
                status     TEXT NOT NULL,
                topic      TEXT NOT NULL,
                payload    TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_bus_events_status ON bus_events(status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_bus_events_created ON bus_events(created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn store(&self, event: &BusEvent) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO bus_events (id, status, topic, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(event.id.to_string())
        .bind(event.status.as_str())
        .bind(&event.topic)
        .bind(&event.payload)
        .bind(timestamp(event.created_at))
        .execute(&self.pool)
        .await?;

        debug!(id = %event.id, topic = %event.topic, "bus event stored");
        Ok(())
    }

    async fn update(&self, id: Uuid, status: EventStatus) -> Result<()> {
        let result = sqlx::query("UPDATE bus_events SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("bus event {id}")));
        }
        Ok(())
    }

    async fn retrieve(&self, filter: &EventFilter) -> Result<Vec<BusEvent>> {
        let mut builder = sqlx::QueryBuilder::new(
            "SELECT id, status, topic, payload, created_at FROM bus_events WHERE 1=1",
        );
        if let Some(since) = filter.since {
            builder.push(" AND created_at >= ").push_bind(timestamp(since));
        }
        if !filter.statuses.is_empty() {
            builder.push(" AND status IN (");
            let mut separated = builder.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            builder.push(")");
        }
        builder.push(" ORDER BY created_at ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_event).collect()
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

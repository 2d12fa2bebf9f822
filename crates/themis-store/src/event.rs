//! Bus event records handled by the durability layer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery status of a bus event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Handed to the bus, outcome unknown yet
    Pending,
    /// Acknowledged by the bus
    Sent,
    /// Delivery failed
    Failed,
}

impl EventStatus {
    /// Stable string form used in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parse the stored string form back into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bus event awaiting (or having received) durable storage.
///
/// Identity is `id`; the durability layer only ever mutates `status` and
/// `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Event identity
    pub id: Uuid,
    /// Current delivery status
    pub status: EventStatus,
    /// Bus topic the event was published on
    pub topic: String,
    /// Serialized message body
    pub payload: String,
    /// When the durability layer first saw the event
    pub created_at: DateTime<Utc>,
}

impl BusEvent {
    /// Create a new pending event stamped with the current time.
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: EventStatus::Pending,
            topic: topic.into(),
            payload: payload.into(),
            created_at: Utc::now(),
        }
    }
}

/// Predicate over stored events, evaluated identically by the durable
/// backend and by the in-memory fallback buffer.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events created at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Status set membership; empty means any status
    pub statuses: Vec<EventStatus>,
}

impl EventFilter {
    /// Filter matching events created at or after `since`.
    #[must_use]
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            statuses: Vec::new(),
        }
    }

    /// Filter matching events whose status is one of `statuses`.
    #[must_use]
    pub fn with_status(statuses: impl Into<Vec<EventStatus>>) -> Self {
        Self {
            since: None,
            statuses: statuses.into(),
        }
    }

    /// Whether `event` satisfies this filter.
    #[must_use]
    pub fn matches(&self, event: &BusEvent) -> bool {
        let since_ok = self.since.is_none_or(|since| event.created_at >= since);
        let status_ok = self.statuses.is_empty() || self.statuses.contains(&event.status);
        since_ok && status_ok
    }
}

/// Fixed-width RFC 3339 rendering used for stored timestamps.
///
/// Constant precision keeps lexicographic order equal to chronological
/// order inside SQLite text columns.
#[must_use]
pub fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp stored by [`timestamp`].
pub fn parse_timestamp(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Internal(format!("bad stored timestamp '{value}': {e}")))
}

//! Lifecycle events consumed from the workflow engine.
//!
//! This layer is a pure consumer: it never mutates engine-owned execution
//! objects, it only mirrors what the engine reports.

use crate::workflow::instance::TemplateSnapshot;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Overall state of a workflow execution (also used per task).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecState {
    /// Execution has started
    Begin,
    /// Execution is making progress
    Progress,
    /// Execution finished successfully
    End,
    /// Execution finished in error
    Error,
}

impl ExecState {
    /// Whether this state ends an execution's life in the registry.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Error)
    }

    /// Stable string form used in broadcast frames and stored reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Progress => "progress",
            Self::End => "end",
            Self::Error => "error",
        }
    }
}

/// Caller-supplied execution metadata, restricted to an explicit
/// allow-list. Anything else a caller passes is discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecMetadata {
    /// Who asked for this execution
    pub requester: Option<String>,
    /// Correlation track supplied by the caller
    pub track: Option<String>,
}

impl ExecMetadata {
    /// Build metadata from a free-form map, keeping only allow-listed keys.
    #[must_use]
    pub fn from_map(fields: &HashMap<String, String>) -> Self {
        Self {
            requester: fields.get("requester").cloned(),
            track: fields.get("track").cloned(),
        }
    }
}

/// Per-task delta carried by progress events.
///
/// `None` fields are "no change"; only present fields are merged into the
/// record's task state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    /// Task this delta applies to
    pub task_id: String,
    /// New task state, if it changed
    pub status: Option<ExecState>,
    /// Task start time
    pub start: Option<DateTime<Utc>>,
    /// Task end time
    pub end: Option<DateTime<Utc>>,
    /// Data the task consumed
    pub inputs: Option<Value>,
    /// Data the task produced
    pub outputs: Option<Value>,
}

/// A lifecycle event emitted by the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineEvent {
    /// A new execution has begun.
    Begin {
        /// Execution identity
        execution_id: Uuid,
        /// Owning organization; `None` maps to the default tenant
        organization: Option<String>,
        /// Full template snapshot for this execution
        template: TemplateSnapshot,
        /// Allow-listed caller metadata
        metadata: ExecMetadata,
        /// When the engine emitted the event
        timestamp: DateTime<Utc>,
    },
    /// A task-level update for a running execution.
    Progress {
        /// Execution identity
        execution_id: Uuid,
        /// The task delta
        task: TaskUpdate,
        /// When the engine emitted the event
        timestamp: DateTime<Utc>,
    },
    /// The execution finished successfully.
    End {
        /// Execution identity
        execution_id: Uuid,
        /// Engine-supplied completion details
        content: Value,
        /// When the engine emitted the event
        timestamp: DateTime<Utc>,
    },
    /// The execution finished in error.
    Error {
        /// Execution identity
        execution_id: Uuid,
        /// Engine-supplied failure details
        content: Value,
        /// When the engine emitted the event
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// The execution this event refers to.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::Begin { execution_id, .. }
            | Self::Progress { execution_id, .. }
            | Self::End { execution_id, .. }
            | Self::Error { execution_id, .. } => *execution_id,
        }
    }

    /// The lifecycle state this event reports.
    #[must_use]
    pub fn state(&self) -> ExecState {
        match self {
            Self::Begin { .. } => ExecState::Begin,
            Self::Progress { .. } => ExecState::Progress,
            Self::End { .. } => ExecState::End,
            Self::Error { .. } => ExecState::Error,
        }
    }
}

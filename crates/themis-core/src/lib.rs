//! Themis Core - Event Durability and Workflow Runtime
//!
//! This crate provides the reliability layer of the Themis service:
//! - Durability: a bounded in-memory buffer and a persistence coordinator
//!   that writes bus events through to a durable backend when it is healthy
//!   and falls back to the buffer (drained later) when it is not
//! - Workflow: a tenant-scoped registry of running workflow executions,
//!   finalized to per-tenant storage and fanned out to live subscribers
//! - Fault: a process-wide sink for failures on background and
//!   fire-and-forget paths

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod durability;
pub mod error;
pub mod fault;
pub mod workflow;

pub use config::DurabilityConfig;
pub use durability::{BusPersistence, EventQueue};
pub use error::{Error, Result};
pub use fault::{FaultReport, FaultSink};
pub use workflow::{
    EngineEvent, ExecMetadata, ExecState, ExecutionState, LiveHub, Subscription, TaskDef,
    TaskExecution, TaskUpdate, TemplateSnapshot, TemplateState, WorkflowInstance,
    WorkflowRegistry,
};

//! Themis Store - Tenant-Scoped Durable Storage
//!
//! This crate provides the storage layer for the Themis runtime:
//! - Event: bus event records and retrieval filters
//! - Backend: the durable backend contract and its SQLite implementation
//! - Tenant: one isolated SQLite database per organization, lazily created
//! - Instances: the per-tenant workflow history collection

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod event;
pub mod instances;
pub mod tenant;

pub use backend::{EventBackend, SqliteEventBackend};
pub use error::{Error, Result};
pub use event::{BusEvent, EventFilter, EventStatus};
pub use instances::{InstanceCollection, InstancePage, InstanceQuery};
pub use tenant::{organization_key, TenantHandle, TenantRegistry, DEFAULT_ORGANIZATION};

//! Tenant-scoped registry of running workflow executions.
//!
//! Holds exactly one live record per (organization, execution id), mirrors
//! every lifecycle event to live subscribers, and finalizes terminal
//! executions into the tenant's workflow history.

use crate::error::{Error, Result};
use crate::fault::FaultSink;
use crate::workflow::event::{EngineEvent, ExecMetadata, ExecState, TaskUpdate};
use crate::workflow::instance::{ExecutionState, TemplateSnapshot, WorkflowInstance};
use crate::workflow::live::{LiveHub, Subscription};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use themis_store::event::timestamp;
use themis_store::{organization_key, TenantRegistry};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

type RecordMap = HashMap<String, HashMap<Uuid, WorkflowInstance>>;

/// In-memory view of running workflow executions, keyed organization
/// first, execution id second.
pub struct WorkflowRegistry {
    running: RwLock<RecordMap>,
    tenants: Arc<TenantRegistry>,
    hub: Arc<LiveHub>,
    faults: FaultSink,
}

impl WorkflowRegistry {
    /// Registry finalizing into `tenants` and reporting background
    /// failures to `faults`.
    #[must_use]
    pub fn new(tenants: Arc<TenantRegistry>, faults: FaultSink) -> Arc<Self> {
        Arc::new(Self {
            running: RwLock::new(HashMap::new()),
            tenants,
            hub: Arc::new(LiveHub::new()),
            faults,
        })
    }

    /// The live subscriber hub (for connection plumbing).
    #[must_use]
    pub fn hub(&self) -> &Arc<LiveHub> {
        &self.hub
    }

    /// Connect a live subscriber for an organization.
    ///
    /// The subscriber immediately receives the current report of every live
    /// record of its organization as catch-up state, then all future frames.
    pub async fn subscribe(&self, organization: Option<&str>) -> Subscription {
        let subscription = self.hub.subscribe(organization).await;
        let running = self.running.read().await;
        if let Some(records) = running.get(&subscription.organization) {
            for record in records.values() {
                self.hub.send_to(subscription.id, &record.report()).await;
            }
        }
        subscription
    }

    /// Disconnect a live subscriber.
    pub async fn unsubscribe(&self, id: Uuid) {
        self.hub.unsubscribe(id).await;
    }

    /// Total number of live records across all organizations.
    pub async fn count(&self) -> usize {
        self.running.read().await.values().map(HashMap::len).sum()
    }

    /// Current reports of an organization's live records.
    pub async fn reports(&self, organization: Option<&str>) -> Vec<Value> {
        let key = organization_key(organization);
        let running = self.running.read().await;
        running
            .get(&key)
            .map(|records| records.values().map(WorkflowInstance::report).collect())
            .unwrap_or_default()
    }

    /// Process one engine lifecycle event.
    ///
    /// Events for executions this process does not own are logged and
    /// dropped; the returned [`Error::UnknownExecution`] is informational,
    /// never fatal.
    pub async fn handle_event(self: &Arc<Self>, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::Begin {
                execution_id,
                organization,
                template,
                metadata,
                timestamp,
            } => {
                self.on_begin(execution_id, organization, template, metadata, timestamp)
                    .await
            }
            EngineEvent::Progress {
                execution_id,
                task,
                timestamp,
            } => self.on_progress(execution_id, task, timestamp).await,
            EngineEvent::End {
                execution_id,
                content,
                timestamp,
            } => {
                self.on_terminal(ExecState::End, execution_id, content, timestamp)
                    .await
            }
            EngineEvent::Error {
                execution_id,
                content,
                timestamp,
            } => {
                self.on_terminal(ExecState::Error, execution_id, content, timestamp)
                    .await
            }
        }
    }

    async fn on_begin(
        &self,
        execution_id: Uuid,
        organization: Option<String>,
        template: TemplateSnapshot,
        metadata: ExecMetadata,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let key = organization_key(organization.as_deref());
        let frame;
        {
            let mut running = self.running.write().await;
            let records = running.entry(key.clone()).or_default();
            if records.contains_key(&execution_id) {
                warn!(%execution_id, organization = %key, "duplicate begin for live execution dropped");
                return Ok(());
            }

            let execution = ExecutionState::begin(execution_id, organization, at);
            let record = WorkflowInstance::new(template, execution, metadata);

            // Begin frames carry the full template so a subscriber that
            // just connected can reconstruct state from this frame alone.
            frame = broadcast_frame(
                ExecState::Begin,
                json!({}),
                source_of(&record),
                at,
                Some(serde_json::to_value(record.template())?),
            );
            records.insert(execution_id, record);
            debug!(%execution_id, organization = %key, "workflow execution registered");
        }

        self.hub.broadcast(Some(&key), &frame).await;
        Ok(())
    }

    async fn on_progress(
        &self,
        execution_id: Uuid,
        task: TaskUpdate,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let frame;
        let key;
        {
            let mut running = self.running.write().await;
            let Some((found_key, record)) = find_record(&mut running, execution_id) else {
                warn!(%execution_id, "progress for unknown execution dropped");
                return Err(Error::UnknownExecution(execution_id));
            };
            key = found_key;
            record.apply_task(&task);

            // Incremental frames carry only the delta.
            frame = broadcast_frame(
                ExecState::Progress,
                serde_json::to_value(&task)?,
                source_of(record),
                at,
                None,
            );
        }

        self.hub.broadcast(Some(&key), &frame).await;
        Ok(())
    }

    async fn on_terminal(
        self: &Arc<Self>,
        state: ExecState,
        execution_id: Uuid,
        content: Value,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let frame;
        let key;
        let report;
        {
            let mut running = self.running.write().await;
            let Some((found_key, record)) = find_record(&mut running, execution_id) else {
                warn!(%execution_id, state = state.as_str(), "terminal event for unknown execution dropped");
                return Err(Error::UnknownExecution(execution_id));
            };
            key = found_key;
            record.mark_terminal(state, at);
            report = record.report();
            frame = broadcast_frame(state, content, source_of(record), at, None);
        }

        self.hub.broadcast(Some(&key), &frame).await;

        // Fire-and-forget from the event path's point of view, but the
        // spawned task commits the durable write attempt before evicting
        // the record, so visibility is never lost ahead of durability.
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry.finalize(key, execution_id, report).await;
        });
        Ok(())
    }

    /// Persist a terminal report into the tenant's history, then evict the
    /// record. Write failures go to the fault sink; eviction happens
    /// regardless, or the registry would leak finished executions.
    async fn finalize(&self, key: String, execution_id: Uuid, report: Value) {
        match self.tenants.scoped(Some(&key)).await {
            Ok(handle) => {
                if let Err(err) = handle.instances().insert(&report).await {
                    self.faults.report(
                        "workflow finalize",
                        format!("storing report for {execution_id}: {err}"),
                    );
                } else {
                    debug!(%execution_id, organization = %key, "terminal report stored");
                }
            }
            Err(err) => {
                self.faults.report(
                    "workflow finalize",
                    format!("tenant store for {execution_id}: {err}"),
                );
            }
        }

        let mut running = self.running.write().await;
        if let Some(records) = running.get_mut(&key) {
            records.remove(&execution_id);
            if records.is_empty() {
                running.remove(&key);
            }
        }
    }
}

/// Scan all organizations for a live execution id.
fn find_record(
    running: &mut RecordMap,
    execution_id: Uuid,
) -> Option<(String, &mut WorkflowInstance)> {
    running.iter_mut().find_map(|(key, records)| {
        records
            .get_mut(&execution_id)
            .map(|record| (key.clone(), record))
    })
}

fn source_of(record: &WorkflowInstance) -> Value {
    json!({
        "workflow_template_id": record.template().id.to_string(),
        "workflow_template_version": record.template().version,
        "workflow_exec_id": record.execution().id.to_string(),
        "workflow_exec_requester": record.metadata().requester,
        "organization": record.execution().organization,
    })
}

fn broadcast_frame(
    state: ExecState,
    data: Value,
    source: Value,
    at: DateTime<Utc>,
    template: Option<Value>,
) -> Value {
    let mut frame = json!({
        "type": state.as_str(),
        "data": data,
        "source": source,
        "timestamp": timestamp(at),
    });
    if let (Some(object), Some(template)) = (frame.as_object_mut(), template) {
        object.insert("template".into(), template);
    }
    frame
}

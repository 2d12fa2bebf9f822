//! Live workflow records and report merging.

use crate::workflow::event::{ExecMetadata, ExecState, TaskUpdate};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use themis_store::event::timestamp;
use uuid::Uuid;

/// Lifecycle state of a stored template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateState {
    /// Still being edited, not triggerable
    Draft,
    /// Live and triggerable
    Active,
    /// Retired, kept for history
    Archived,
}

/// Static task definition within a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDef {
    /// Task identity within the template
    pub id: String,
    /// Registered task kind
    pub name: String,
    /// Human-readable title
    pub title: Option<String>,
    /// Task configuration
    #[serde(default)]
    pub config: Value,
}

/// Static snapshot of a workflow template, frozen when the execution
/// begins so later template edits cannot skew running reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    /// Template identity
    pub id: Uuid,
    /// Template version the execution runs
    pub version: u32,
    /// Human-readable title
    pub title: String,
    /// Template lifecycle state
    pub state: TemplateState,
    /// Ordered task definitions
    pub tasks: Vec<TaskDef>,
}

/// Dynamic per-task execution state, merged from progress deltas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Last reported task state
    pub status: Option<ExecState>,
    /// When the task started
    pub start: Option<DateTime<Utc>>,
    /// When the task finished
    pub end: Option<DateTime<Utc>>,
    /// Data the task consumed
    pub inputs: Option<Value>,
    /// Data the task produced
    pub outputs: Option<Value>,
}

impl TaskExecution {
    /// Merge a progress delta; `None` fields leave current values alone.
    pub fn apply(&mut self, update: &TaskUpdate) {
        if update.status.is_some() {
            self.status = update.status;
        }
        if update.start.is_some() {
            self.start = update.start;
        }
        if update.end.is_some() {
            self.end = update.end;
        }
        if let Some(inputs) = &update.inputs {
            self.inputs = Some(inputs.clone());
        }
        if let Some(outputs) = &update.outputs {
            self.outputs = Some(outputs.clone());
        }
    }
}

/// Mutable runtime state of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    /// Execution identity
    pub id: Uuid,
    /// Owning organization; `None` maps to the default tenant
    pub organization: Option<String>,
    /// Overall state
    pub state: ExecState,
    /// Per-task dynamic state, keyed by task id
    pub tasks: HashMap<String, TaskExecution>,
    /// When the execution began
    pub start: DateTime<Utc>,
    /// When the execution reached a terminal state
    pub end: Option<DateTime<Utc>>,
}

impl ExecutionState {
    /// Fresh state for an execution that just began.
    #[must_use]
    pub fn begin(id: Uuid, organization: Option<String>, start: DateTime<Utc>) -> Self {
        Self {
            id,
            organization,
            state: ExecState::Begin,
            tasks: HashMap::new(),
            start,
            end: None,
        }
    }
}

/// One live (template, execution) pair held by the runtime registry.
///
/// Allows retrieving a merged execution report at any moment without
/// mutating the stored template.
#[derive(Debug, Clone)]
pub struct WorkflowInstance {
    template: TemplateSnapshot,
    execution: ExecutionState,
    metadata: ExecMetadata,
}

impl WorkflowInstance {
    /// Pair a template snapshot with fresh execution state.
    #[must_use]
    pub fn new(template: TemplateSnapshot, execution: ExecutionState, metadata: ExecMetadata) -> Self {
        Self {
            template,
            execution,
            metadata,
        }
    }

    /// The frozen template snapshot.
    #[must_use]
    pub fn template(&self) -> &TemplateSnapshot {
        &self.template
    }

    /// Current execution state.
    #[must_use]
    pub fn execution(&self) -> &ExecutionState {
        &self.execution
    }

    /// Allow-listed caller metadata.
    #[must_use]
    pub fn metadata(&self) -> &ExecMetadata {
        &self.metadata
    }

    /// Organization owning this execution.
    #[must_use]
    pub fn organization(&self) -> Option<&str> {
        self.execution.organization.as_deref()
    }

    /// Merge a task delta into the execution state.
    pub fn apply_task(&mut self, update: &TaskUpdate) {
        self.execution.state = ExecState::Progress;
        self.execution
            .tasks
            .entry(update.task_id.clone())
            .or_default()
            .apply(update);
    }

    /// Mark the execution terminal.
    pub fn mark_terminal(&mut self, state: ExecState, at: DateTime<Utc>) {
        debug_assert!(state.is_terminal());
        self.execution.state = state;
        self.execution.end = Some(at);
    }

    /// Merged execution report: template task definitions (by task id)
    /// overlaid with dynamic per-task state.
    ///
    /// Tasks without dynamic state keep their static fields only; dynamic
    /// state for ids the template does not know is appended at the end.
    /// This is also the document shape persisted to workflow history.
    #[must_use]
    pub fn report(&self) -> Value {
        let mut tasks: Vec<Value> = Vec::with_capacity(self.template.tasks.len());
        let mut seen: Vec<&str> = Vec::with_capacity(self.template.tasks.len());

        for def in &self.template.tasks {
            let mut entry = to_object(json!({
                "id": def.id,
                "name": def.name,
                "title": def.title,
                "config": def.config,
            }));
            if let Some(dynamic) = self.execution.tasks.get(&def.id) {
                merge_dynamic(&mut entry, dynamic);
            }
            seen.push(&def.id);
            tasks.push(Value::Object(entry));
        }

        let mut orphans: Vec<(&String, &TaskExecution)> = self
            .execution
            .tasks
            .iter()
            .filter(|(id, _)| !seen.contains(&id.as_str()))
            .collect();
        orphans.sort_by_key(|(id, _)| id.as_str());
        for (id, dynamic) in orphans {
            let mut entry = to_object(json!({ "id": id }));
            merge_dynamic(&mut entry, dynamic);
            tasks.push(Value::Object(entry));
        }

        json!({
            "id": self.execution.id.to_string(),
            "organization": self.execution.organization,
            "requester": self.metadata.requester,
            "track": self.metadata.track,
            "state": self.execution.state.as_str(),
            "start": timestamp(self.execution.start),
            "end": self.execution.end.map(timestamp),
            "template": {
                "id": self.template.id.to_string(),
                "version": self.template.version,
                "title": self.template.title,
                "state": self.template.state,
                "tasks": self.template.tasks,
            },
            "tasks": tasks,
        })
    }
}

fn to_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Overlay the dynamic fields of a task onto its report entry. Static
/// fields stay untouched; absent dynamic fields are not injected.
fn merge_dynamic(entry: &mut Map<String, Value>, dynamic: &TaskExecution) {
    if let Some(status) = dynamic.status {
        entry.insert("status".into(), json!(status.as_str()));
    }
    if let Some(start) = dynamic.start {
        entry.insert("start".into(), json!(timestamp(start)));
    }
    if let Some(end) = dynamic.end {
        entry.insert("end".into(), json!(timestamp(end)));
    }
    if let Some(inputs) = &dynamic.inputs {
        entry.insert("inputs".into(), inputs.clone());
    }
    if let Some(outputs) = &dynamic.outputs {
        entry.insert("outputs".into(), outputs.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> TemplateSnapshot {
        TemplateSnapshot {
            id: Uuid::new_v4(),
            version: 2,
            title: "on-call escalation".into(),
            state: TemplateState::Active,
            tasks: vec![
                TaskDef {
                    id: "t1".into(),
                    name: "sms".into(),
                    title: Some("Send SMS".into()),
                    config: json!({"recipient": "oncall"}),
                },
                TaskDef {
                    id: "t2".into(),
                    name: "call".into(),
                    title: Some("Place call".into()),
                    config: json!({}),
                },
            ],
        }
    }

    fn instance() -> WorkflowInstance {
        let template = template();
        let execution = ExecutionState::begin(Uuid::new_v4(), Some("acme".into()), Utc::now());
        WorkflowInstance::new(
            template,
            execution,
            ExecMetadata {
                requester: Some("alice".into()),
                track: None,
            },
        )
    }

    #[test]
    fn test_report_merges_static_and_dynamic() {
        let mut instance = instance();
        instance.apply_task(&TaskUpdate {
            task_id: "t1".into(),
            status: Some(ExecState::End),
            outputs: Some(json!({"delivered": true})),
            ..Default::default()
        });

        let report = instance.report();
        let tasks = report["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 2);

        // t1 carries static and dynamic fields
        assert_eq!(tasks[0]["id"], "t1");
        assert_eq!(tasks[0]["title"], "Send SMS");
        assert_eq!(tasks[0]["status"], "end");
        assert_eq!(tasks[0]["outputs"]["delivered"], true);

        // t2 has no dynamic state: static fields only, nothing injected
        assert_eq!(tasks[1]["id"], "t2");
        assert_eq!(tasks[1]["title"], "Place call");
        assert!(tasks[1].get("status").is_none());
        assert!(tasks[1].get("outputs").is_none());
    }

    #[test]
    fn test_report_does_not_mutate_template() {
        let mut instance = instance();
        instance.apply_task(&TaskUpdate {
            task_id: "t1".into(),
            status: Some(ExecState::Begin),
            ..Default::default()
        });

        let before = serde_json::to_value(instance.template()).unwrap();
        let _ = instance.report();
        let after = serde_json::to_value(instance.template()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_report_document_shape() {
        let mut instance = instance();
        instance.mark_terminal(ExecState::End, Utc::now());

        let report = instance.report();
        assert_eq!(report["organization"], "acme");
        assert_eq!(report["requester"], "alice");
        assert_eq!(report["state"], "end");
        assert!(report["end"].is_string());
        assert_eq!(report["template"]["version"], 2);
        assert_eq!(report["template"]["tasks"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_task_ids_are_appended() {
        let mut instance = instance();
        instance.apply_task(&TaskUpdate {
            task_id: "ghost".into(),
            status: Some(ExecState::Begin),
            ..Default::default()
        });

        let report = instance.report();
        let tasks = report["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[2]["id"], "ghost");
    }

    #[test]
    fn test_progress_marks_execution_in_progress() {
        let mut instance = instance();
        assert_eq!(instance.execution().state, ExecState::Begin);

        instance.apply_task(&TaskUpdate {
            task_id: "t1".into(),
            ..Default::default()
        });
        assert_eq!(instance.execution().state, ExecState::Progress);
    }
}

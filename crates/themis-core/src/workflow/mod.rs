//! Workflow runtime: tenant-scoped registry of running executions with
//! finalize-and-broadcast on terminal state.

mod event;
mod instance;
mod live;
mod registry;

pub use event::{EngineEvent, ExecMetadata, ExecState, TaskUpdate};
pub use instance::{
    ExecutionState, TaskDef, TaskExecution, TemplateSnapshot, TemplateState, WorkflowInstance,
};
pub use live::{LiveHub, Subscription};
pub use registry::WorkflowRegistry;

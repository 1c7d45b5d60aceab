//! Dispatch seam between the scheduler and the task execution backend
//!
//! The scheduler decides *when* a task fires; a [`TaskDispatcher`] decides
//! *how* the fire is delivered. [`MemoryDispatcher`] records dispatches
//! in memory and backs the integration tests.

use crate::types::{DispatchOptions, PeriodicTask, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything the execution backend needs about a single fire.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    /// Name of the schedule entry that fired
    pub entry_name: String,
    /// Target task identifier
    pub task: String,
    pub args: Vec<serde_json::Value>,
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    pub options: DispatchOptions,
}

impl DispatchRequest {
    pub fn from_task(task: &PeriodicTask) -> Self {
        let mut options = task.options.clone();
        // Backends display the entry name unless the task overrides it.
        if options.shadow_name.is_none() {
            options.shadow_name = Some(task.name.clone());
        }
        Self {
            entry_name: task.name.clone(),
            task: task.task.clone(),
            args: task.args.clone(),
            kwargs: task.kwargs.clone(),
            options,
        }
    }
}

/// Submission interface to the task execution backend.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Submit one fire. An `Err` means the fire was not delivered and the
    /// scheduler will leave the entry's bookkeeping untouched.
    async fn dispatch(&self, request: DispatchRequest) -> Result<()>;
}

/// In-memory dispatcher that records every request it receives.
#[derive(Debug, Clone, Default)]
pub struct MemoryDispatcher {
    sent: Arc<RwLock<Vec<DispatchRequest>>>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything dispatched so far.
    pub async fn sent(&self) -> Vec<DispatchRequest> {
        self.sent.read().await.clone()
    }

    pub async fn clear(&self) {
        self.sent.write().await.clear();
    }
}

#[async_trait]
impl TaskDispatcher for MemoryDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<()> {
        self.sent.write().await.push(request);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScheduleRef;

    #[tokio::test]
    async fn test_memory_dispatcher_records() {
        let dispatcher = MemoryDispatcher::new();
        let task = PeriodicTask::new("hb", "app.hb", ScheduleRef::Interval("i".into()));
        dispatcher
            .dispatch(DispatchRequest::from_task(&task))
            .await
            .unwrap();

        let sent = dispatcher.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].entry_name, "hb");
        assert_eq!(sent[0].task, "app.hb");

        dispatcher.clear().await;
        assert!(dispatcher.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_shadow_name_defaults_to_entry_name() {
        let task = PeriodicTask::new("hb", "app.hb", ScheduleRef::Interval("i".into()));
        let request = DispatchRequest::from_task(&task);
        assert_eq!(request.options.shadow_name.as_deref(), Some("hb"));

        // An explicit override wins.
        let task = task.with_options(crate::types::DispatchOptions {
            shadow_name: Some("display".into()),
            ..Default::default()
        });
        let request = DispatchRequest::from_task(&task);
        assert_eq!(request.options.shadow_name.as_deref(), Some("display"));
    }
}

//! Bounded polling for asynchronous task completion.

use std::sync::Arc;
use std::time::Duration;

use mythic_core::{ClientError, StatusResponse};
use serde::Deserialize;
use serde_json::{Map, json};

use crate::executor::{OperationDescriptor, OperationKind, RequestExecutor};

/// Fixed polling interval. Small against typical task durations, large
/// enough not to hammer the backend.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

const TASK_STATUS_ERROR: &str = "error";

const TASK_STATUS: OperationDescriptor = OperationDescriptor {
    name: "task",
    document: "query TaskStatus($display_id: Int!) {\n  task(where: {display_id: {_eq: $display_id}}, limit: 1) {\n    id\n    display_id\n    status\n    completed\n    stderr\n    opsec_pre_blocked\n    opsec_pre_bypassed\n    opsec_post_blocked\n    opsec_post_bypassed\n  }\n}",
};

const OPSEC_BYPASS: OperationDescriptor = OperationDescriptor {
    name: "requestOpsecBypass",
    document: "mutation RequestOpsecBypass($task_id: Int!) {\n  requestOpsecBypass(task_id: $task_id) {\n    status\n    error\n  }\n}",
};

/// The slice of task state the poller needs. Deliberately minimal; the
/// per-entity task wrappers own the full model.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskState {
    pub id: i32,
    pub display_id: i32,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub opsec_pre_blocked: Option<bool>,
    #[serde(default)]
    pub opsec_pre_bypassed: bool,
    #[serde(default)]
    pub opsec_post_blocked: Option<bool>,
    #[serde(default)]
    pub opsec_post_bypassed: bool,
}

impl TaskState {
    /// Whether the task reached the error terminal status.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == TASK_STATUS_ERROR
    }

    /// Blocked on the pre-execution OPSEC gate.
    #[must_use]
    pub const fn blocked_pre(&self) -> bool {
        matches!(self.opsec_pre_blocked, Some(true)) && !self.opsec_pre_bypassed
    }

    /// Blocked on the post-execution OPSEC gate.
    #[must_use]
    pub const fn blocked_post(&self) -> bool {
        matches!(self.opsec_post_blocked, Some(true)) && !self.opsec_post_bypassed
    }
}

/// Converts the backend's asynchronous task lifecycle into a blocking
/// wait with a deadline.
pub struct TaskMonitor {
    executor: Arc<RequestExecutor>,
}

impl TaskMonitor {
    /// Create a monitor over the given executor.
    #[must_use]
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    /// Fetch the current state of a task.
    ///
    /// # Errors
    /// `NotFound` when no task with that display ID exists; executor
    /// errors pass through.
    pub async fn task_state(&self, display_id: i32) -> Result<TaskState, ClientError> {
        let mut variables = Map::new();
        variables.insert("display_id".to_string(), json!(display_id));

        let tasks: Vec<TaskState> = self
            .executor
            .execute(OperationKind::Query, &TASK_STATUS, variables)
            .await?;
        tasks
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("task {display_id}")))
    }

    /// Force approval of a task held at an OPSEC gate.
    ///
    /// # Errors
    /// `InvalidInput` for non-positive IDs; `OperationFailed` with the
    /// backend's message when the bypass is refused.
    pub async fn request_opsec_bypass(&self, task_id: i32) -> Result<(), ClientError> {
        if task_id <= 0 {
            return Err(ClientError::InvalidInput(
                "task_id must be positive".to_string(),
            ));
        }
        let mut variables = Map::new();
        variables.insert("task_id".to_string(), json!(task_id));

        let response: StatusResponse = self
            .executor
            .execute(OperationKind::Mutation, &OPSEC_BYPASS, variables)
            .await?;
        response.into_result("requestOpsecBypass")
    }

    /// Poll a task until it reaches a terminal status or the timeout
    /// elapses.
    ///
    /// While the task sits at an OPSEC gate: with `auto_bypass_block`
    /// the monitor issues one bypass request per gate and keeps
    /// polling; without it the monitor keeps waiting for an operator to
    /// approve. The deadline never cancels the task itself.
    ///
    /// # Errors
    /// - `InvalidInput` for a zero timeout, before the first poll
    /// - `NotFound` when the task disappears between polls (fatal)
    /// - `OperationFailed` with the task's stderr on the error status
    /// - `Timeout` when the deadline elapses
    pub async fn wait_for_complete(
        &self,
        display_id: i32,
        timeout: Duration,
        auto_bypass_block: bool,
    ) -> Result<(), ClientError> {
        if timeout.is_zero() {
            return Err(ClientError::InvalidInput(
                "timeout must be positive".to_string(),
            ));
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(POLL_INTERVAL);

        let mut bypassed_pre = false;
        let mut bypassed_post = false;

        loop {
            tokio::select! {
                () = &mut deadline => {
                    return Err(ClientError::Timeout(format!(
                        "task {display_id} did not complete within {}s",
                        timeout.as_secs()
                    )));
                }
                _ = ticker.tick() => {
                    let task = self.task_state(display_id).await?;

                    if task.completed {
                        return Ok(());
                    }
                    if task.is_error() {
                        return Err(ClientError::OperationFailed(format!(
                            "task {display_id} failed: {}",
                            task.stderr
                        )));
                    }

                    if auto_bypass_block {
                        // One bypass per gate; the backend flips the
                        // bypassed flag asynchronously.
                        if task.blocked_pre() && !bypassed_pre {
                            tracing::info!(display_id, "bypassing pre-execution OPSEC gate");
                            self.request_opsec_bypass(task.id).await?;
                            bypassed_pre = true;
                        } else if task.blocked_post() && !bypassed_post {
                            tracing::info!(display_id, "bypassing post-execution OPSEC gate");
                            self.request_opsec_bypass(task.id).await?;
                            bypassed_post = true;
                        }
                    }
                }
            }
        }
    }
}

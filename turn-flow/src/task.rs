use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{context::Context, error::Result};

/// Outcome of one task step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Message for the caller
    pub response: Option<String>,
    pub next_action: NextAction,
    /// Short progress description stored on the session
    pub status_message: Option<String>,
    /// Filled in by the graph
    pub task_id: String,
}

impl TaskResult {
    pub fn new(response: Option<String>, next_action: NextAction) -> Self {
        Self::new_with_status(response, next_action, None)
    }

    pub fn new_with_status(
        response: Option<String>,
        next_action: NextAction,
        status_message: Option<String>,
    ) -> Self {
        Self {
            response,
            next_action,
            status_message,
            task_id: String::new(),
        }
    }
}

/// What the graph does once a task step returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextAction {
    /// Stay on this task and hand control back until the next input arrives
    WaitForInput,
    /// Follow the outgoing edge and run the next task within the same step
    ContinueAndExecute,
    /// The workflow is finished
    End,
}

#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, context: Context) -> Result<TaskResult>;
}

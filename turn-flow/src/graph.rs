use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    context::Context,
    error::{FlowError, Result},
    storage::Session,
    task::{NextAction, Task, TaskResult},
};

/// Predicate deciding which branch of a conditional edge is taken
pub type EdgeCondition = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

#[derive(Clone)]
enum Edge {
    Always {
        to: String,
    },
    Conditional {
        condition: EdgeCondition,
        yes: String,
        no: String,
    },
}

/// Tasks wired together by outgoing edges. Each task has at most one outgoing edge.
pub struct Graph {
    pub id: String,
    tasks: HashMap<String, Arc<dyn Task>>,
    edges: HashMap<String, Edge>,
    start_task_id: Option<String>,
}

impl Graph {
    /// Execute the session's current task, following `ContinueAndExecute` chains.
    ///
    /// The session's `current_task_id` and `status_message` are updated in place; persisting the
    /// session is the caller's job (see [`crate::FlowRunner`]).
    pub async fn execute_session(&self, session: &mut Session) -> Result<ExecutionResult> {
        loop {
            let result = self
                .execute_single_task(&session.current_task_id, session.context.clone())
                .await?;

            session.status_message = result.status_message.clone();
            session.current_task_id = result.task_id.clone();

            match result.next_action {
                NextAction::WaitForInput => {
                    return Ok(ExecutionResult {
                        response: result.response,
                        status: ExecutionStatus::WaitingForInput,
                    });
                }
                NextAction::End => {
                    return Ok(ExecutionResult {
                        response: result.response,
                        status: ExecutionStatus::Completed,
                    });
                }
                NextAction::ContinueAndExecute => {
                    match self.find_next_task(&result.task_id, &session.context) {
                        Some(next_task_id) => {
                            debug!(from = %result.task_id, to = %next_task_id, "following edge");
                            session.current_task_id = next_task_id;
                        }
                        None => {
                            return Ok(ExecutionResult {
                                response: result.response,
                                status: ExecutionStatus::WaitingForInput,
                            });
                        }
                    }
                }
            }
        }
    }

    async fn execute_single_task(&self, task_id: &str, context: Context) -> Result<TaskResult> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| FlowError::TaskNotFound(task_id.to_string()))?;

        let mut result = task.run(context).await?;
        result.task_id = task_id.to_string();
        Ok(result)
    }

    pub fn find_next_task(&self, current_task_id: &str, context: &Context) -> Option<String> {
        match self.edges.get(current_task_id)? {
            Edge::Always { to } => Some(to.clone()),
            Edge::Conditional { condition, yes, no } => {
                if condition(context) {
                    Some(yes.clone())
                } else {
                    Some(no.clone())
                }
            }
        }
    }

    pub fn start_task_id(&self) -> Option<&str> {
        self.start_task_id.as_deref()
    }

    pub fn has_task(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }
}

pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            graph: Graph {
                id: id.into(),
                tasks: HashMap::new(),
                edges: HashMap::new(),
                start_task_id: None,
            },
        }
    }

    /// The first task added becomes the start task.
    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        let task_id = task.id().to_string();
        if self.graph.start_task_id.is_none() {
            self.graph.start_task_id = Some(task_id.clone());
        }
        self.graph.tasks.insert(task_id, task);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.graph
            .edges
            .insert(from.into(), Edge::Always { to: to.into() });
        self
    }

    pub fn add_conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        condition: F,
        yes: impl Into<String>,
        no: impl Into<String>,
    ) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.graph.edges.insert(
            from.into(),
            Edge::Conditional {
                condition: Arc::new(condition),
                yes: yes.into(),
                no: no.into(),
            },
        );
        self
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub response: Option<String>,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Waiting for the next input
    WaitingForInput,
    /// Reached a task that ended the workflow
    Completed,
}

//! `FlowRunner` wraps the load → execute one step → save cycle that every request-driven caller
//! needs.
//!
//! Steps of one session never overlap: each takes the session's lock before loading it, and input
//! handed to `run_with_input` is written into the context only once that lock is held. Deleting
//! through the runner waits for a running step to finish.
//!
//! A session can still be deleted straight from storage while one of its steps is running. The
//! final save only replaces a session that still exists, so the step's outcome is dropped instead
//! of bringing the deleted session back.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::{FlowError, Result},
    graph::{ExecutionResult, Graph},
    storage::SessionStorage,
};

#[derive(Clone)]
pub struct FlowRunner {
    graph: Arc<Graph>,
    storage: Arc<dyn SessionStorage>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl FlowRunner {
    pub fn new(graph: Arc<Graph>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            graph,
            storage,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Execute one step of `session_id` and persist the updated session.
    pub async fn run(&self, session_id: &str) -> Result<ExecutionResult> {
        self.step(session_id, None).await
    }

    /// Store `input` under `key` and execute one step, with no other step of the session in between.
    pub async fn run_with_input<T: Serialize>(
        &self,
        session_id: &str,
        key: &str,
        input: T,
    ) -> Result<ExecutionResult> {
        let value = serde_json::to_value(input)
            .map_err(|e| FlowError::ContextError(format!("input for {key}: {e}")))?;
        self.step(session_id, Some((key, value))).await
    }

    /// Clear and delete `session_id` once any running step of it has finished.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let session = self
            .storage
            .get(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))?;
        session.context.clear().await;
        self.storage.delete(session_id).await?;
        self.locks.remove(session_id);

        info!(session_id = %session_id, "session deleted");
        Ok(())
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    async fn step(
        &self,
        session_id: &str,
        input: Option<(&str, Value)>,
    ) -> Result<ExecutionResult> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let mut session = self
            .storage
            .get(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))?;

        if let Some((key, value)) = input {
            debug!(session_id = %session_id, key = %key, "input stored for step");
            session.context.set(key, value).await?;
        }

        let result = self.graph.execute_session(&mut session).await?;
        let current_task = session.current_task_id.clone();

        if !self.storage.save_if_exists(session).await? {
            warn!(session_id = %session_id, "session removed while a step was running, dropping result");
            return Err(FlowError::SessionNotFound(session_id.to_string()));
        }

        info!(
            session_id = %session_id,
            current_task = %current_task,
            status = ?result.status,
            "step executed"
        );
        Ok(result)
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use turn_flow::{Context, NextAction, Task, TaskResult};

use super::types::session_keys;
use crate::{aggregator::PreferenceAggregator, error::RunError, models::Configuration};

/// Builds the candidate pools from every saved turn.
pub struct AggregationTask {
    aggregator: Arc<PreferenceAggregator>,
}

impl AggregationTask {
    pub fn new(aggregator: Arc<PreferenceAggregator>) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl Task for AggregationTask {
    async fn run(&self, context: Context) -> turn_flow::Result<TaskResult> {
        let config: Configuration = context
            .get(session_keys::CONFIG_DATA)
            .await
            .ok_or(RunError::MissingConfiguration)?;

        let pools = self.aggregator.aggregate(&config).await?;
        info!(
            primary = pools.primary.len(),
            secondary = pools.secondary.len(),
            "pools stored"
        );
        context.set(session_keys::CANDIDATE_POOLS, &pools).await?;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            Some("Finding movies for the group".to_string()),
        ))
    }
}

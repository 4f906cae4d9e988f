use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use turn_flow::{Context, NextAction, Task, TaskResult};

use super::types::session_keys;
use crate::{aggregator::CandidatePools, error::RunError, resolver::RecommendationResolver};

pub struct RecommendationTask {
    resolver: Arc<RecommendationResolver>,
}

impl RecommendationTask {
    pub fn new(resolver: Arc<RecommendationResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Task for RecommendationTask {
    async fn run(&self, context: Context) -> turn_flow::Result<TaskResult> {
        let pools: CandidatePools = context
            .get(session_keys::CANDIDATE_POOLS)
            .await
            .ok_or(RunError::NoValidSelections)?;

        let picked = self
            .resolver
            .resolve(&pools.primary, &pools.secondary, &pools.moods_by_user)
            .await?;

        context.set(session_keys::RECOMMENDATIONS, &picked).await?;
        context.remove(session_keys::CANDIDATE_POOLS).await;
        info!(count = picked.len(), "recommendations stored");

        let titles = picked
            .iter()
            .map(|item| item.title.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Ok(TaskResult::new_with_status(
            Some(titles),
            NextAction::End,
            Some(format!("{} recommendations ready", picked.len())),
        ))
    }
}

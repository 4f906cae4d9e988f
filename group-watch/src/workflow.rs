use std::sync::Arc;

use turn_flow::{FlowRunner, Graph, GraphBuilder, Session, SessionStorage, Task};
use uuid::Uuid;

use crate::{
    aggregator::PreferenceAggregator,
    catalog::Catalog,
    error::RunResult,
    models::Configuration,
    resolver::RecommendationResolver,
    tasks::{AggregationTask, RecommendationTask, SelectionTask, session_keys},
};

pub const WORKFLOW_ID: &str = "group_watch";

pub fn build_workflow(
    catalog: Arc<dyn Catalog>,
    aggregator: Arc<PreferenceAggregator>,
    resolver: Arc<RecommendationResolver>,
) -> Graph {
    let selection_task = Arc::new(SelectionTask::new(catalog));
    let selection_id = selection_task.id().to_string();

    let aggregation_task = Arc::new(AggregationTask::new(aggregator));
    let aggregation_id = aggregation_task.id().to_string();

    let recommendation_task = Arc::new(RecommendationTask::new(resolver));
    let recommendation_id = recommendation_task.id().to_string();

    GraphBuilder::new(WORKFLOW_ID)
        .add_task(selection_task)
        .add_task(aggregation_task)
        .add_task(recommendation_task)
        .add_conditional_edge(
            &selection_id,
            |ctx| {
                ctx.get_sync::<Configuration>(session_keys::CONFIG_DATA)
                    .is_some_and(|config| config.all_turns_complete())
            },
            &aggregation_id,
            &selection_id,
        )
        .add_edge(&aggregation_id, &recommendation_id)
        .build()
}

/// A fresh session positioned on the first user's turn.
pub async fn create_run_session(config: &Configuration) -> RunResult<Session> {
    let session_id = Uuid::new_v4().to_string();
    let selection_id = std::any::type_name::<SelectionTask>();

    let session = Session::new_from_task(session_id, WORKFLOW_ID, selection_id);
    session.context.set(session_keys::CONFIG_DATA, config).await?;

    Ok(session)
}

pub fn create_flow_runner(graph: Graph, session_storage: Arc<dyn SessionStorage>) -> FlowRunner {
    FlowRunner::new(Arc::new(graph), session_storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregator::AggregatorSettings,
        catalog::MockCatalog,
        error::{FetchError, RunError},
        models::{Item, ItemId, Mood, PagedItems},
        oracle::MockOracle,
        tasks::TurnCommand,
        turn::TurnState,
    };
    use std::time::Duration;
    use turn_flow::{ExecutionStatus, InMemorySessionStorage};

    fn catalog() -> Arc<MockCatalog> {
        let mut catalog = MockCatalog::new();
        catalog.expect_fetch_random_batch().returning(|count| {
            Ok(PagedItems {
                page: 1,
                results: (1..=count as i64)
                    .map(|id| Item::new(id, format!("Movie {id}")))
                    .collect(),
                ..PagedItems::default()
            })
        });
        Arc::new(catalog)
    }

    fn runner(oracle: MockOracle) -> (FlowRunner, Arc<dyn SessionStorage>) {
        let catalog = catalog();
        let aggregator = Arc::new(PreferenceAggregator::new(
            catalog.clone(),
            AggregatorSettings {
                enrich: false,
                ..AggregatorSettings::default()
            },
        ));
        let resolver = Arc::new(RecommendationResolver::new(
            Arc::new(oracle),
            Duration::from_secs(5),
        ));
        let storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
        let graph = build_workflow(catalog, aggregator, resolver);
        (create_flow_runner(graph, storage.clone()), storage)
    }

    async fn send(
        runner: &FlowRunner,
        session_id: &str,
        command: TurnCommand,
    ) -> turn_flow::Result<turn_flow::ExecutionResult> {
        runner
            .run_with_input(session_id, session_keys::TURN_COMMAND, &command)
            .await
    }

    #[tokio::test]
    async fn test_two_users_reach_recommendations() {
        let mut oracle = MockOracle::new();
        oracle
            .expect_invoke()
            .times(1)
            .returning(|_, _| Ok(r#"["Movie 2"]"#.to_string()));
        let (runner, storage) = runner(oracle);

        let config = Configuration::new(2, 5, 1, true).unwrap();
        let session = create_run_session(&config).await.unwrap();
        let id = session.id.clone();
        storage.save(session).await.unwrap();

        let first = runner.run(&id).await.unwrap();
        assert_eq!(first.status, ExecutionStatus::WaitingForInput);

        for user in 0..2 {
            send(&runner, &id, TurnCommand::Toggle { item_id: ItemId::Number(user + 1) })
                .await
                .unwrap();
            send(&runner, &id, TurnCommand::Mood { mood: Some(Mood::Calm) })
                .await
                .unwrap();
            let result = send(&runner, &id, TurnCommand::Advance)
                .await
                .unwrap();
            if user == 0 {
                assert_eq!(result.status, ExecutionStatus::WaitingForInput);
            } else {
                assert_eq!(result.status, ExecutionStatus::Completed);
            }
        }

        let session = storage.get(&id).await.unwrap().unwrap();
        let picked: Vec<Item> = session
            .context
            .get(session_keys::RECOMMENDATIONS)
            .await
            .unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, ItemId::Number(2));
        assert!(!session.context.contains_key(session_keys::CANDIDATE_POOLS));
    }

    #[tokio::test]
    async fn test_failed_resolution_can_be_retried() {
        let mut oracle = MockOracle::new();
        oracle
            .expect_invoke()
            .returning(|_, _| Err(FetchError::Oracle("down".into())));
        let (runner, storage) = runner(oracle);

        // every saved turn is empty, so aggregation finds nothing
        let mut config = Configuration::new(1, 5, 1, false).unwrap();
        config.current_user_index = 1;
        let session = create_run_session(&config).await.unwrap();
        let id = session.id.clone();
        storage.save(session).await.unwrap();

        let err: RunError = runner.run(&id).await.unwrap_err().into();
        assert!(matches!(err, RunError::NoValidSelections));

        let err: RunError = send(&runner, &id, TurnCommand::Advance)
            .await
            .unwrap_err()
            .into();
        assert!(matches!(err, RunError::RunComplete));

        let err: RunError = send(&runner, &id, TurnCommand::Enter)
            .await
            .unwrap_err()
            .into();
        assert!(matches!(err, RunError::NoValidSelections));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_toggles_all_land() {
        let (runner, storage) = runner(MockOracle::new());
        let config = Configuration::new(1, 20, 10, true).unwrap();
        let session = create_run_session(&config).await.unwrap();
        let id = session.id.clone();
        storage.save(session).await.unwrap();
        runner.run(&id).await.unwrap();

        let mut toggles = tokio::task::JoinSet::new();
        for item in 1..=10 {
            let runner = runner.clone();
            let id = id.clone();
            toggles.spawn(async move {
                send(&runner, &id, TurnCommand::Toggle { item_id: ItemId::Number(item) }).await
            });
        }
        while let Some(joined) = toggles.join_next().await {
            joined.unwrap().unwrap();
        }

        let session = storage.get(&id).await.unwrap().unwrap();
        let state: TurnState = session.context.get(session_keys::TURN_STATE).await.unwrap();
        let mut selected: Vec<ItemId> = state.selected.clone();
        selected.sort_by_key(|id| match id {
            ItemId::Number(n) => *n,
            ItemId::Text(_) => i64::MAX,
        });
        assert_eq!(selected, (1..=10).map(ItemId::Number).collect::<Vec<_>>());
        assert_eq!(state.candidates.len(), 20);
    }

    #[tokio::test]
    async fn test_step_without_command_keeps_the_entered_turn() {
        let (runner, storage) = runner(MockOracle::new());
        let config = Configuration::new(1, 5, 2, true).unwrap();
        let session = create_run_session(&config).await.unwrap();
        let id = session.id.clone();
        storage.save(session).await.unwrap();

        runner.run(&id).await.unwrap();
        send(&runner, &id, TurnCommand::Toggle { item_id: ItemId::Number(3) })
            .await
            .unwrap();

        let result = runner.run(&id).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::WaitingForInput);
        assert!(result.response.is_none());

        let session = storage.get(&id).await.unwrap().unwrap();
        let state: TurnState = session.context.get(session_keys::TURN_STATE).await.unwrap();
        assert_eq!(state.selected, vec![ItemId::Number(3)]);
        assert_eq!(state.candidates.len(), 5);
    }
}

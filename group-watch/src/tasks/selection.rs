use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use turn_flow::{Context, NextAction, Task, TaskResult};

use super::types::{TurnCommand, session_keys};
use crate::{
    catalog::Catalog,
    error::RunError,
    turn::{TurnController, TurnOutcome, TurnPhase},
};

/// Applies the `TurnCommand` handed to the step and waits for the next one until every user is done.
pub struct SelectionTask {
    catalog: Arc<dyn Catalog>,
}

impl SelectionTask {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Task for SelectionTask {
    async fn run(&self, context: Context) -> turn_flow::Result<TaskResult> {
        let command: Option<TurnCommand> = context.get(session_keys::TURN_COMMAND).await;
        context.remove(session_keys::TURN_COMMAND).await;

        let mut controller = TurnController::load(&context).await?;

        if controller.config().all_turns_complete() {
            if context.contains_key(session_keys::RECOMMENDATIONS) {
                return Err(RunError::RunComplete.into());
            }
            return match command {
                None | Some(TurnCommand::Enter) => {
                    info!("all turns saved, resolving recommendations");
                    Ok(TaskResult::new_with_status(
                        None,
                        NextAction::ContinueAndExecute,
                        Some("All turns complete".to_string()),
                    ))
                }
                Some(_) => Err(RunError::RunComplete.into()),
            };
        }

        info!(command = ?command, user_index = controller.state().user_index, "selection step");
        let outcome = match command {
            Some(command) => {
                controller
                    .apply(command, &context, self.catalog.as_ref())
                    .await
            }
            // a step without a command only enters a turn that has no candidates yet
            None if controller.phase() != TurnPhase::AwaitingInput => Ok(TurnOutcome::Selecting),
            None => Ok(controller.start_turn(self.catalog.as_ref()).await),
        };
        // the controller resets its state on some failures, keep the store in line with it
        controller.save(&context).await?;

        let config = controller.config();
        let status = Some(format!(
            "User {} of {} choosing",
            (config.current_user_index + 1).min(config.num_users),
            config.num_users
        ));

        match outcome? {
            TurnOutcome::AllTurnsComplete => Ok(TaskResult::new_with_status(
                None,
                NextAction::ContinueAndExecute,
                Some("All turns complete".to_string()),
            )),
            TurnOutcome::TurnStarted { load_error, .. } => Ok(TaskResult::new_with_status(
                load_error,
                NextAction::WaitForInput,
                status,
            )),
            TurnOutcome::Selecting => Ok(TaskResult::new_with_status(
                None,
                NextAction::WaitForInput,
                status,
            )),
        }
    }
}

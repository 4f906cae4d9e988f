use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use turn_flow::FlowError;

/// Failures talking to the catalog or the oracle
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Oracle request failed: {0}")]
    Oracle(String),

    #[error("Oracle did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Catalog returned {got} titles, at least {needed} are needed")]
    ShortBatch { got: usize, needed: usize },
}

/// Everything that can go wrong during a run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("No run configuration found, start a new run")]
    MissingConfiguration,

    #[error("Invalid run configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("No valid movie selections found, start over")]
    NoValidSelections,

    #[error("No candidate movies to recommend from")]
    NoCandidates,

    #[error("Turn incomplete: {selected} of {required} movies selected (mood missing: {mood_missing})")]
    TurnIncomplete {
        selected: usize,
        required: usize,
        mood_missing: bool,
    },

    #[error("Candidates for this turn have not been loaded yet")]
    CandidatesNotLoaded,

    #[error("Turn is stale: this view is for user {expected} but the run is at user {found}")]
    StaleTurn { expected: usize, found: usize },

    #[error("All turns are already complete")]
    RunComplete,

    #[error("Only {completed} of {num_users} turns are saved")]
    TurnsPending { completed: usize, num_users: usize },

    #[error(transparent)]
    Flow(FlowError),
}

impl From<FlowError> for RunError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::Task(inner) => match inner.downcast::<RunError>() {
                Ok(run_error) => run_error,
                Err(other) => RunError::Flow(FlowError::Task(other)),
            },
            FlowError::SessionNotFound(id) => RunError::RunNotFound(id),
            other => RunError::Flow(other),
        }
    }
}

impl From<RunError> for FlowError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Flow(inner) => inner,
            other => FlowError::Task(anyhow::Error::new(other)),
        }
    }
}

impl RunError {
    /// What the client should do next
    pub fn action(&self) -> &'static str {
        match self {
            RunError::MissingConfiguration
            | RunError::RunNotFound(_)
            | RunError::NoValidSelections
            | RunError::NoCandidates => "restart",
            RunError::StaleTurn { .. } => "reload",
            RunError::Fetch(_) => "retry",
            RunError::RunComplete => "view_results",
            RunError::InvalidConfiguration(_)
            | RunError::InvalidRequest(_)
            | RunError::TurnIncomplete { .. }
            | RunError::TurnsPending { .. }
            | RunError::CandidatesNotLoaded => "fix_input",
            RunError::Flow(_) => "retry",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RunError::MissingConfiguration
            | RunError::StaleTurn { .. }
            | RunError::RunComplete
            | RunError::TurnsPending { .. } => StatusCode::CONFLICT,
            RunError::RunNotFound(_) => StatusCode::NOT_FOUND,
            RunError::InvalidConfiguration(_)
            | RunError::InvalidRequest(_)
            | RunError::TurnIncomplete { .. }
            | RunError::CandidatesNotLoaded => StatusCode::BAD_REQUEST,
            RunError::NoValidSelections | RunError::NoCandidates => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            RunError::Fetch(_) => StatusCode::BAD_GATEWAY,
            RunError::Flow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RunError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
            "action": self.action(),
        }));

        (self.status_code(), body).into_response()
    }
}

pub type RunResult<T> = Result<T, RunError>;

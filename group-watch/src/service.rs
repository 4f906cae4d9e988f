use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode},
    middleware::{Next, from_fn},
    response::Response,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info};
use turn_flow::{ExecutionStatus, FlowRunner, InMemorySessionStorage, Session, SessionStorage};
use uuid::Uuid;

use crate::{
    aggregator::{AggregatorSettings, PreferenceAggregator},
    catalog::{Catalog, TmdbCatalog},
    config::ServiceConfig,
    error::{RunError, RunResult},
    models::{Configuration, Genre, Item, Mood, PagedItems, TagId},
    oracle::{OpenRouterOracle, Oracle},
    resolver::RecommendationResolver,
    tasks::{TurnCommand, session_keys},
    turn::{TurnController, TurnPhase, TurnView},
    workflow::{build_workflow, create_flow_runner, create_run_session},
};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

type ApiResult<T> = Result<Json<T>, RunError>;

#[derive(Clone)]
pub struct AppState {
    pub session_storage: Arc<dyn SessionStorage>,
    pub flow_runner: FlowRunner,
    pub catalog: Arc<dyn Catalog>,
}

impl AppState {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        oracle: Arc<dyn Oracle>,
        settings: AggregatorSettings,
        oracle_timeout: Duration,
    ) -> Self {
        let aggregator = Arc::new(PreferenceAggregator::new(catalog.clone(), settings));
        let resolver = Arc::new(RecommendationResolver::new(oracle, oracle_timeout));
        let graph = build_workflow(catalog.clone(), aggregator, resolver);

        let session_storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
        let flow_runner = create_flow_runner(graph, session_storage.clone());

        Self {
            session_storage,
            flow_runner,
            catalog,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        let catalog = Arc::new(TmdbCatalog::new(
            config.tmdb_api_key.clone(),
            config.tmdb_api_url.clone(),
            config.random_page_span,
        ));
        let oracle = Arc::new(OpenRouterOracle::new(
            &config.openrouter_api_key,
            config.oracle_model.clone(),
        ));
        Self::new(
            catalog,
            oracle,
            config.aggregator_settings(),
            config.oracle_timeout(),
        )
    }
}

pub fn create_app(config: &ServiceConfig) -> Router {
    build_router(AppState::from_config(config))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/genres", get(list_genres))
        .route("/movies", get(browse_movies))
        .route("/moods", get(list_moods))
        .route("/runs", post(start_run))
        .route("/runs/{run_id}", get(get_run).delete(delete_run))
        .route("/runs/{run_id}/turn", post(submit_turn))
        .route(
            "/runs/{run_id}/recommendations",
            get(get_recommendations).post(retry_recommendations),
        )
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(correlation_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state)
}

/// Runs every request inside a span carrying a fresh correlation id
async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&correlation_id).ok();

    if let Some(value) = header.clone() {
        request.headers_mut().insert(CORRELATION_HEADER, value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;

    if let Some(value) = header {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Group Watch",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Turn-based movie picking for a group, ending in shared recommendations",
        "endpoints": {
            "GET /genres": "Genre list",
            "GET /movies?genre=&page=": "Browse popular movies, optionally by genre",
            "GET /moods": "Mood list",
            "POST /runs": "Start a run",
            "GET /runs/{run_id}": "Current turn and progress",
            "POST /runs/{run_id}/turn": "Submit one turn command",
            "GET /runs/{run_id}/recommendations": "Recommendations for a finished run",
            "POST /runs/{run_id}/recommendations": "Retry recommendations for a finished run",
            "DELETE /runs/{run_id}": "Discard a run",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn list_genres(State(state): State<AppState>) -> ApiResult<Vec<Genre>> {
    Ok(Json(state.catalog.fetch_genres().await?))
}

#[derive(Debug, Deserialize)]
struct BrowseQuery {
    genre: Option<TagId>,
    page: Option<u32>,
}

async fn browse_movies(
    State(state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> ApiResult<PagedItems> {
    let page = query.page.unwrap_or(1).max(1);
    let items = match query.genre {
        Some(genre) => state.catalog.fetch_by_tag(genre, page).await?,
        None => state.catalog.fetch_popular(page).await?,
    };
    Ok(Json(items))
}

async fn list_moods() -> Json<[Mood; 6]> {
    Json(Mood::ALL)
}

#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub num_users: usize,
    pub movies_per_user: usize,
    pub selections_per_user: usize,
    #[serde(default = "default_require_mood")]
    pub require_mood: bool,
}

fn default_require_mood() -> bool {
    true
}

/// Everything a client needs to render the run
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: String,
    pub status: &'static str,
    pub status_message: Option<String>,
    pub turn: TurnView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<Item>>,
    /// Set when the step succeeded but something the user should know about failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub run_id: String,
    pub ready: bool,
    pub recommendations: Vec<Item>,
}

fn bad_request(rejection: JsonRejection) -> RunError {
    RunError::InvalidRequest(rejection.body_text())
}

async fn start_run(
    State(state): State<AppState>,
    payload: Result<Json<StartRunRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RunResponse>), RunError> {
    let Json(request) = payload.map_err(bad_request)?;
    let config = Configuration::new(
        request.num_users,
        request.movies_per_user,
        request.selections_per_user,
        request.require_mood,
    )?;

    let session = create_run_session(&config).await?;
    let run_id = session.id.clone();
    state.session_storage.save(session).await?;
    info!(run_id = %run_id, num_users = config.num_users, "run created");

    let response = step(&state, &run_id, None).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<RunResponse> {
    let session = load_session(&state, &run_id).await?;
    Ok(Json(run_response(&session, None).await?))
}

async fn submit_turn(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    payload: Result<Json<TurnCommand>, JsonRejection>,
) -> ApiResult<RunResponse> {
    let Json(command) = payload.map_err(bad_request)?;
    let session = load_session(&state, &run_id).await?;

    if session.context.contains_key(session_keys::RECOMMENDATIONS) {
        return Err(RunError::RunComplete);
    }

    Ok(Json(step(&state, &run_id, Some(&command)).await?))
}

async fn get_recommendations(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<RecommendationsResponse> {
    let session = load_session(&state, &run_id).await?;
    let recommendations: Option<Vec<Item>> =
        session.context.get(session_keys::RECOMMENDATIONS).await;

    Ok(Json(RecommendationsResponse {
        run_id,
        ready: recommendations.is_some(),
        recommendations: recommendations.unwrap_or_default(),
    }))
}

async fn retry_recommendations(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<RunResponse> {
    let session = load_session(&state, &run_id).await?;

    if !session.context.contains_key(session_keys::RECOMMENDATIONS) {
        let config: Configuration = session
            .context
            .get(session_keys::CONFIG_DATA)
            .await
            .ok_or(RunError::MissingConfiguration)?;
        if !config.all_turns_complete() {
            return Err(RunError::TurnsPending {
                completed: config.completed_turns(),
                num_users: config.num_users,
            });
        }
        return Ok(Json(step(&state, &run_id, None).await?));
    }

    Ok(Json(run_response(&session, None).await?))
}

async fn delete_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<StatusCode, RunError> {
    state.flow_runner.delete(&run_id).await?;

    info!(run_id = %run_id, "run discarded");
    Ok(StatusCode::NO_CONTENT)
}

async fn load_session(state: &AppState, run_id: &str) -> RunResult<Session> {
    state
        .session_storage
        .get(run_id)
        .await?
        .ok_or_else(|| RunError::RunNotFound(run_id.to_string()))
}

/// Execute one workflow step, handing it `command` when there is one, and describe where the run
/// ended up.
async fn step(
    state: &AppState,
    run_id: &str,
    command: Option<&TurnCommand>,
) -> RunResult<RunResponse> {
    let executed = match command {
        Some(command) => {
            state
                .flow_runner
                .run_with_input(run_id, session_keys::TURN_COMMAND, command)
                .await
        }
        None => state.flow_runner.run(run_id).await,
    };
    let result = executed.map_err(|e| {
        let err = RunError::from(e);
        error!(run_id = %run_id, error = %err, "workflow step failed");
        err
    })?;

    let session = load_session(state, run_id).await?;
    let notice = match result.status {
        ExecutionStatus::WaitingForInput => result.response,
        ExecutionStatus::Completed => None,
    };
    run_response(&session, notice).await
}

async fn run_response(session: &Session, notice: Option<String>) -> RunResult<RunResponse> {
    let controller = TurnController::load(&session.context).await?;
    let turn = controller.view();
    let recommendations: Option<Vec<Item>> =
        session.context.get(session_keys::RECOMMENDATIONS).await;

    let status = match (&recommendations, turn.phase) {
        (Some(_), _) => "completed",
        (None, TurnPhase::AllTurnsComplete) => "awaiting_recommendations",
        (None, _) => "selecting",
    };

    Ok(RunResponse {
        run_id: session.id.clone(),
        status,
        status_message: session.status_message.clone(),
        turn,
        recommendations,
        notice,
    })
}

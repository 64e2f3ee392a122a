use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::catalog::WorkoutCounts;
use crate::error::ChatError;
use crate::habits::{format_date, TaskItem, ValidationError, DATE_FORMAT};
use crate::llm_client::Message;
use crate::runtime::CoachRuntime;
use crate::scheduler::CoachEvent;

pub struct ServerState {
    pub runtime: CoachRuntime,
    /// In-memory chat transcript; not persisted
    pub chat: RwLock<Vec<Message>>,
    pub daily_status: RwLock<DailyStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyStatus {
    pub loading: bool,
    pub last_error: Option<String>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct CredentialRequest {
    api_key: String,
}

#[derive(Debug, Serialize)]
struct CredentialResponse {
    stored: bool,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    reply: String,
    tools_used: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DailyMessageResponse {
    text: String,
    generated_at: Option<DateTime<Utc>>,
    loading: bool,
    last_error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DateQuery {
    date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ToggleHabitRequest {
    date: Option<String>,
}

#[derive(Debug, Serialize)]
struct ToggleHabitResponse {
    habit_id: String,
    date: String,
    completed: bool,
}

#[derive(Debug, Deserialize)]
struct SetScoreRequest {
    date: Option<String>,
    score: u8,
}

#[derive(Debug, Serialize)]
struct SetScoreResponse {
    attribute: String,
    date: String,
    score: u8,
}

#[derive(Debug, Deserialize)]
struct AddTaskRequest {
    date: Option<String>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ReorderTasksRequest {
    date: Option<String>,
    from_id: String,
    to_id: String,
}

#[derive(Debug, Serialize)]
struct WorkoutResponse {
    last_completed_day: u32,
    plan: Vec<WorkoutCounts>,
}

pub async fn serve_backend(
    runtime: CoachRuntime,
    event_rx: flume::Receiver<CoachEvent>,
) -> Result<()> {
    let bind_addr = runtime
        .config
        .bind_addr
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid bind_addr '{}' (expected host:port)", runtime.config.bind_addr))?;

    runtime.spawn_daily_gate();
    let app = build_app(runtime, event_rx);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind backend server to {}", bind_addr))?;
    tracing::info!("DEF coach backend listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Backend server failed")?;
    Ok(())
}

/// Router plus the event bridge feeding `daily_status`. Needs a tokio runtime.
pub fn build_app(runtime: CoachRuntime, event_rx: flume::Receiver<CoachEvent>) -> Router {
    let state = Arc::new(ServerState {
        runtime,
        chat: RwLock::new(Vec::new()),
        daily_status: RwLock::new(DailyStatus::default()),
    });
    spawn_event_bridge(event_rx, state.clone());

    let api = Router::new()
        .route("/health", get(health))
        .route("/credential", put(set_credential))
        .route("/chat", post(send_chat))
        .route("/chat/history", get(chat_history))
        .route("/daily-message", get(get_daily_message))
        .route("/daily-message/refresh", post(refresh_daily_message))
        .route("/habits/:id/toggle", post(toggle_habit))
        .route("/scores/:attribute", put(set_score))
        .route("/tasks", get(list_tasks).post(add_task))
        .route("/tasks/reorder", post(reorder_tasks))
        .route("/tasks/:id/toggle", post(toggle_task))
        .route("/tasks/:id", delete(remove_task))
        .route("/workouts", get(get_workouts))
        .route("/workouts/complete", post(complete_workout))
        .route("/workouts/undo", post(undo_workout))
        .with_state(state);

    Router::new().nest("/v1", api)
}

fn spawn_event_bridge(event_rx: flume::Receiver<CoachEvent>, state: Arc<ServerState>) {
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            let mut status = state.daily_status.write().await;
            apply_event(&mut status, event);
        }
    });
}

fn apply_event(status: &mut DailyStatus, event: CoachEvent) {
    match event {
        CoachEvent::DailyMessageLoading(loading) => status.loading = loading,
        CoachEvent::DailyMessage(_) => status.last_error = None,
        CoachEvent::DailyMessageFailed(error) => status.last_error = Some(error),
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn set_credential(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<CredentialRequest>,
) -> ApiResult<CredentialResponse> {
    state
        .runtime
        .book
        .set_credential(&body.api_key)
        .map_err(mutation_error)?;
    Ok(Json(CredentialResponse { stored: true }))
}

async fn send_chat(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    let text = body.message.trim();
    if text.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message cannot be empty".to_string()));
    }

    let credentials = state.runtime.chat_credentials().map_err(internal_error)?;
    let history = state.chat.read().await.clone();

    let outcome = state
        .runtime
        .orchestrator
        .converse(&history, text, &credentials)
        .await
        .map_err(chat_error)?;

    state.chat.write().await.extend(outcome.transcript);

    Ok(Json(ChatResponse {
        reply: outcome.final_text,
        tools_used: outcome.tool_results.into_iter().map(|r| r.name).collect(),
    }))
}

async fn chat_history(State(state): State<Arc<ServerState>>) -> Json<Vec<Message>> {
    Json(state.chat.read().await.clone())
}

async fn get_daily_message(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<DailyMessageResponse> {
    let message = state
        .runtime
        .book
        .daily_message()
        .map_err(|e| internal_error(e.into()))?;
    let status = state.daily_status.read().await.clone();

    Ok(Json(DailyMessageResponse {
        text: message.text,
        generated_at: message.generated_at,
        loading: status.loading,
        last_error: status.last_error,
    }))
}

async fn refresh_daily_message(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<DailyMessageResponse> {
    state.runtime.scheduler.refresh().await.map_err(chat_error)?;
    get_daily_message(State(state)).await
}

async fn toggle_habit(
    State(state): State<Arc<ServerState>>,
    Path(habit_id): Path<String>,
    body: Option<Json<ToggleHabitRequest>>,
) -> ApiResult<ToggleHabitResponse> {
    let date = resolve_date(body.and_then(|Json(b)| b.date))?;
    let completed = state
        .runtime
        .book
        .toggle_completion(&habit_id, &date)
        .map_err(mutation_error)?;

    state.runtime.scheduler.schedule_refresh();
    Ok(Json(ToggleHabitResponse {
        habit_id,
        date,
        completed,
    }))
}

async fn set_score(
    State(state): State<Arc<ServerState>>,
    Path(attribute): Path<String>,
    Json(body): Json<SetScoreRequest>,
) -> ApiResult<SetScoreResponse> {
    let date = resolve_date(body.date)?;
    let score = state
        .runtime
        .book
        .set_score(&attribute, &date, body.score)
        .map_err(mutation_error)?;

    state.runtime.scheduler.schedule_refresh();
    Ok(Json(SetScoreResponse {
        attribute,
        date,
        score,
    }))
}

async fn list_tasks(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Vec<TaskItem>> {
    let date = resolve_date(query.date)?;
    state
        .runtime
        .book
        .tasks(&date)
        .map(Json)
        .map_err(|e| internal_error(e.into()))
}

async fn add_task(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<AddTaskRequest>,
) -> ApiResult<TaskItem> {
    let date = resolve_date(body.date)?;
    let task = state
        .runtime
        .book
        .add_task(&date, &body.text)
        .map_err(mutation_error)?;

    state.runtime.scheduler.refresh_now();
    Ok(Json(task))
}

async fn toggle_task(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
    Query(query): Query<DateQuery>,
) -> ApiResult<TaskItem> {
    let date = resolve_date(query.date)?;
    let task = state
        .runtime
        .book
        .toggle_task(&date, &task_id)
        .map_err(mutation_error)?;

    state.runtime.scheduler.refresh_now();
    Ok(Json(task))
}

async fn remove_task(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<String>,
    Query(query): Query<DateQuery>,
) -> Result<StatusCode, (StatusCode, String)> {
    let date = resolve_date(query.date)?;
    state
        .runtime
        .book
        .remove_task(&date, &task_id)
        .map_err(mutation_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reorder_tasks(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<ReorderTasksRequest>,
) -> ApiResult<Vec<TaskItem>> {
    let date = resolve_date(body.date)?;
    state
        .runtime
        .book
        .reorder_tasks(&date, &body.from_id, &body.to_id)
        .map(Json)
        .map_err(mutation_error)
}

async fn get_workouts(State(state): State<Arc<ServerState>>) -> ApiResult<WorkoutResponse> {
    workout_response(&state)
}

async fn complete_workout(State(state): State<Arc<ServerState>>) -> ApiResult<WorkoutResponse> {
    state
        .runtime
        .book
        .complete_workout()
        .map_err(mutation_error)?;
    workout_response(&state)
}

async fn undo_workout(State(state): State<Arc<ServerState>>) -> ApiResult<WorkoutResponse> {
    state.runtime.book.undo_workout().map_err(mutation_error)?;
    workout_response(&state)
}

fn workout_response(state: &ServerState) -> ApiResult<WorkoutResponse> {
    let book = &state.runtime.book;
    let last_completed_day = book
        .last_completed_workout_day()
        .map_err(|e| internal_error(e.into()))?;
    let plan = book.workout_plan().map_err(internal_error)?;
    Ok(Json(WorkoutResponse {
        last_completed_day,
        plan,
    }))
}

/// Validate an explicit `YYYY-MM-DD` date or fall back to today (local).
fn resolve_date(raw: Option<String>) -> Result<String, (StatusCode, String)> {
    match raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()) {
        None => Ok(format_date(Local::now().date_naive())),
        Some(date) => NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .map(format_date)
            .map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("invalid date '{}' (expected YYYY-MM-DD)", date),
                )
            }),
    }
}

fn chat_error(error: ChatError) -> (StatusCode, String) {
    let status = match error {
        ChatError::Configuration(_) => StatusCode::PRECONDITION_FAILED,
        ChatError::Request(_) => StatusCode::BAD_GATEWAY,
    };
    (status, error.user_message())
}

fn mutation_error(error: anyhow::Error) -> (StatusCode, String) {
    match error.downcast_ref::<ValidationError>() {
        Some(validation) => (StatusCode::BAD_REQUEST, validation.to_string()),
        None => internal_error(error),
    }
}

fn internal_error(error: anyhow::Error) -> (StatusCode, String) {
    tracing::error!("Request failed: {:#}", error);
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_errors_map_to_distinct_statuses() {
        let (status, body) = chat_error(ChatError::missing_credential());
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert!(body.contains("API key"));

        let (status, body) = chat_error(ChatError::Request("HTTP 500".to_string()));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, "HTTP 500");
    }

    #[test]
    fn validation_errors_are_bad_requests() {
        let (status, body) = mutation_error(ValidationError::TaskLimit(5).into());
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains('5'));

        let (status, _) = mutation_error(anyhow::anyhow!("disk full"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn resolve_date_normalizes_and_rejects_garbage() {
        assert_eq!(
            resolve_date(Some(" 2026-10-16 ".to_string())).unwrap(),
            "2026-10-16"
        );
        assert!(resolve_date(Some("yesterday".to_string())).is_err());
        assert_eq!(resolve_date(None).unwrap().len(), 10);
    }

    #[test]
    fn events_update_daily_status() {
        let mut status = DailyStatus::default();
        apply_event(&mut status, CoachEvent::DailyMessageLoading(true));
        apply_event(&mut status, CoachEvent::DailyMessageFailed("HTTP 401".to_string()));
        assert!(status.loading);
        assert_eq!(status.last_error.as_deref(), Some("HTTP 401"));

        apply_event(&mut status, CoachEvent::DailyMessage("Go.".to_string()));
        apply_event(&mut status, CoachEvent::DailyMessageLoading(false));
        assert!(!status.loading);
        assert!(status.last_error.is_none());
    }
}

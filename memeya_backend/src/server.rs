//! Read-only dashboard over the agent's state files.
//!
//! Every route reads straight from disk, so the dashboard never contends
//! with the agent for in-memory state. `POST /shutdown` is the only write,
//! and it requires `MEMEYA_DASHBOARD_TOKEN` as a bearer token when that is set.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::AgentConfig;
use crate::forum_heartbeat::{HeartbeatCounters, HeartbeatStore};
use crate::journal::{Journal, JournalEntry};
use crate::mode::{ModeSnapshot, SnapshotStore};
use crate::schedule::local_offset;
use crate::tasks::{PendingTask, TaskList};

pub struct DashboardState {
    pub journal: Journal,
    pub tasks: TaskList,
    pub snapshots: SnapshotStore,
    pub heartbeat: HeartbeatStore,
    pub shutdown: Arc<watch::Sender<bool>>,
    pub token: Option<String>,
}

impl DashboardState {
    pub fn from_config(config: &AgentConfig, shutdown: Arc<watch::Sender<bool>>) -> Self {
        let token = std::env::var("MEMEYA_DASHBOARD_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        if token.is_none() {
            tracing::warn!("MEMEYA_DASHBOARD_TOKEN is unset; POST /shutdown is unauthenticated");
        }

        Self {
            journal: Journal::new(&config.journal_dir, local_offset(&config.schedule)),
            tasks: TaskList::new(&config.pending_tasks_path),
            snapshots: SnapshotStore::new(&config.mode_snapshot_path),
            heartbeat: HeartbeatStore::new(&config.heartbeat_state_path),
            shutdown,
            token,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct JournalQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct JournalResponse {
    pub date: NaiveDate,
    pub content: Option<String>,
    pub entries: Vec<JournalEntry>,
    pub available_days: Vec<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct TasksResponse {
    pub raw: String,
    pub pending: Vec<PendingTask>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub raw: Option<String>,
    pub snapshot: Option<ModeSnapshot>,
}

#[derive(Debug, Serialize)]
struct ShutdownResponse {
    stopping: bool,
}

pub fn router(state: Arc<DashboardState>) -> Router {
    let read_only = Router::new()
        .route("/health", get(health))
        .route("/api/memeya/journal", get(get_journal_today))
        .route("/api/memeya/journal/:date", get(get_journal_day))
        .route("/api/memeya/tasks", get(get_tasks))
        .route("/api/memeya/snapshot", get(get_snapshot))
        .route("/api/memeya/heartbeat", get(get_heartbeat));

    let control = Router::new()
        .route("/shutdown", post(shutdown))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    read_only.merge(control).with_state(state)
}

/// Serve until something flips the shutdown channel.
pub async fn serve_dashboard(state: Arc<DashboardState>, bind: &str) -> Result<()> {
    let bind_addr = bind
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid dashboard bind '{}' (expected host:port)", bind))?;
    let mut stop = state.shutdown.subscribe();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind dashboard to {}", bind_addr))?;
    tracing::info!("Memeya dashboard listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop.wait_for(|stopping| *stopping).await;
        })
        .await
        .context("Dashboard server failed")?;
    Ok(())
}

async fn auth_middleware(
    State(state): State<Arc<DashboardState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    authorize(&headers, state.token.as_deref())?;
    Ok(next.run(request).await)
}

fn authorize(headers: &HeaderMap, token: Option<&str>) -> Result<(), StatusCode> {
    let Some(token) = token else {
        return Ok(());
    };
    let Some(auth_value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    if auth_value.trim() != format!("Bearer {}", token) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_journal_today(
    State(state): State<Arc<DashboardState>>,
    Query(query): Query<JournalQuery>,
) -> Result<Json<JournalResponse>, (StatusCode, String)> {
    let today = state.journal.local_date(Utc::now());
    journal_for(&state, today, query.limit).map(Json)
}

async fn get_journal_day(
    State(state): State<Arc<DashboardState>>,
    Path(date): Path<String>,
    Query(query): Query<JournalQuery>,
) -> Result<Json<JournalResponse>, (StatusCode, String)> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid date '{}' (expected YYYY-MM-DD)", date),
        )
    })?;
    let response = journal_for(&state, date, query.limit)?;
    if response.content.is_none() {
        return Err(not_found(format!("no journal for {}", date)));
    }
    Ok(Json(response))
}

fn journal_for(
    state: &DashboardState,
    date: NaiveDate,
    limit: Option<usize>,
) -> Result<JournalResponse, (StatusCode, String)> {
    let limit = clamp_limit(limit, 20, 1, 200);
    Ok(JournalResponse {
        date,
        content: state.journal.read_day(date).map_err(internal_error)?,
        entries: state
            .journal
            .recent_entries(date, limit)
            .map_err(internal_error)?,
        available_days: state.journal.list_days().map_err(internal_error)?,
    })
}

async fn get_tasks(
    State(state): State<Arc<DashboardState>>,
) -> Result<Json<TasksResponse>, (StatusCode, String)> {
    Ok(Json(TasksResponse {
        raw: state.tasks.list_tasks().map_err(internal_error)?,
        pending: state.tasks.pending().map_err(internal_error)?,
    }))
}

async fn get_snapshot(
    State(state): State<Arc<DashboardState>>,
) -> Result<Json<SnapshotResponse>, (StatusCode, String)> {
    let raw = state.snapshots.load().map_err(internal_error)?;
    let snapshot = raw.as_deref().map(ModeSnapshot::from_markdown);
    Ok(Json(SnapshotResponse { raw, snapshot }))
}

async fn get_heartbeat(
    State(state): State<Arc<DashboardState>>,
) -> Result<Json<HeartbeatCounters>, (StatusCode, String)> {
    state.heartbeat.load().map(Json).map_err(internal_error)
}

async fn shutdown(State(state): State<Arc<DashboardState>>) -> Json<ShutdownResponse> {
    tracing::info!("Shutdown requested via dashboard");
    state.shutdown.send_replace(true);
    Json(ShutdownResponse { stopping: true })
}

fn clamp_limit(value: Option<usize>, default: usize, min: usize, max: usize) -> usize {
    value.unwrap_or(default).clamp(min, max)
}

fn not_found(message: String) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, message)
}

fn internal_error(error: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalKind;
    use axum::http::HeaderValue;
    use chrono::TimeZone;

    fn state(dir: &std::path::Path, token: Option<&str>) -> Arc<DashboardState> {
        let (shutdown, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown);
        let offset = chrono::FixedOffset::east_opt(8 * 3600).unwrap();
        Arc::new(DashboardState {
            journal: Journal::new(dir.join("journal"), offset),
            tasks: TaskList::new(dir.join("pending_tasks.md")),
            snapshots: SnapshotStore::new(dir.join("mode_snapshot.md")),
            heartbeat: HeartbeatStore::new(dir.join("heartbeat_state.json")),
            shutdown,
            token: token.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn journal_day_reads_entries_and_rejects_bad_dates() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), None);
        let at = Utc.with_ymd_and_hms(2025, 4, 1, 3, 0, 0).unwrap();
        state.journal.append(JournalKind::News, "gm", at).unwrap();

        let Json(response) = get_journal_day(
            State(state.clone()),
            Path("2025-04-01".to_string()),
            Query(JournalQuery { limit: None }),
        )
        .await
        .unwrap();
        assert_eq!(response.entries.len(), 1);
        assert_eq!(response.entries[0].content, "gm");
        assert_eq!(response.available_days.len(), 1);

        let err = get_journal_day(
            State(state.clone()),
            Path("yesterday".to_string()),
            Query(JournalQuery { limit: None }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let err = get_journal_day(
            State(state),
            Path("2024-01-01".to_string()),
            Query(JournalQuery { limit: None }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tasks_and_snapshot_reflect_files() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), None);

        let Json(snapshot) = get_snapshot(State(state.clone())).await.unwrap();
        assert!(snapshot.raw.is_none());

        state
            .tasks
            .add_task("ship it", NaiveDate::from_ymd_opt(2025, 4, 1).unwrap())
            .unwrap();
        let Json(tasks) = get_tasks(State(state.clone())).await.unwrap();
        assert_eq!(tasks.pending.len(), 1);
        assert!(tasks.raw.contains("ship it"));

        let Json(counters) = get_heartbeat(State(state)).await.unwrap();
        assert_eq!(counters, HeartbeatCounters::default());
    }

    #[tokio::test]
    async fn shutdown_flips_channel() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), None);
        let rx = state.shutdown.subscribe();
        let Json(response) = shutdown(State(state)).await;
        assert!(response.stopping);
        assert!(*rx.borrow());
    }

    #[test]
    fn authorize_requires_matching_bearer_when_token_set() {
        let mut headers = HeaderMap::new();
        assert!(authorize(&headers, None).is_ok());
        assert_eq!(
            authorize(&headers, Some("secret")),
            Err(StatusCode::UNAUTHORIZED)
        );
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(authorize(&headers, Some("secret")).is_ok());
        assert!(authorize(&headers, Some("other")).is_err());
    }
}

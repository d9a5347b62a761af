use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::projection::{
    self, Criteria, Flag, FlagThresholds, Projection, Range, SortKey, StatusFilter,
};
use crate::snapshot::{self, Snapshot};

/// Shared server state. Readers clone the inner `Arc` and release the lock;
/// a reload swaps in a fully built snapshot.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    current: Arc<RwLock<Arc<Snapshot>>>,
}

impl AppState {
    pub fn new(config: Config, snapshot: Snapshot) -> Self {
        Self {
            config: Arc::new(config),
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().await.clone()
    }

    pub async fn reload(&self) -> anyhow::Result<Arc<Snapshot>> {
        let config = self.config.clone();
        let fresh = tokio::task::spawn_blocking(move || snapshot::initialize(&config))
            .await
            .context("reload task panicked")??;
        let fresh = Arc::new(fresh);
        *self.current.write().await = fresh.clone();
        info!(run_id = %fresh.run_id, "snapshot swapped");
        Ok(fresh)
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/dashboard", get(dashboard_handler))
        .route("/api/grades", get(grades_handler))
        .route("/api/reload", post(reload_handler))
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("dashboard api listening on {bind}");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server failed")
}

async fn healthz_handler() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct DashboardResponse {
    run_id: Uuid,
    loaded_at: DateTime<Utc>,
    rule_set: &'static str,
    #[serde(flatten)]
    projection: Projection,
}

async fn dashboard_handler(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Json<DashboardResponse> {
    let snapshot = state.snapshot().await;
    let query = DashboardQuery::from_params(&params, state.config.flags);
    let mut projection = snapshot.project(&query.criteria);
    if let Some(key) = query.sort {
        projection::sort_profiles(&mut projection.rows, key, query.descending);
    }
    Json(DashboardResponse {
        run_id: snapshot.run_id,
        loaded_at: snapshot.loaded_at,
        rule_set: snapshot.rule_set,
        projection,
    })
}

async fn grades_handler(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.snapshot().await.grade_options())
}

#[derive(Debug, Serialize)]
struct ReloadResponse {
    run_id: Uuid,
    students: usize,
}

async fn reload_handler(State(state): State<AppState>) -> Response {
    match state.reload().await {
        Ok(snapshot) => Json(ReloadResponse {
            run_id: snapshot.run_id,
            students: snapshot.profiles.len(),
        })
        .into_response(),
        Err(err) => {
            error!("reload failed: {err:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")).into_response()
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct DashboardQuery {
    pub criteria: Criteria,
    pub sort: Option<SortKey>,
    pub descending: bool,
}

impl DashboardQuery {
    /// Unknown keys and unparseable values are ignored; an unparseable value
    /// never clears one parsed earlier.
    pub fn from_params(params: &[(String, String)], flag_thresholds: FlagThresholds) -> Self {
        let mut query = DashboardQuery::default();
        query.criteria.flag_thresholds = flag_thresholds;
        let mut attendance = (None, None);
        let mut score = (None, None);
        let mut due = (None, None);

        for (key, value) in params {
            let value = value.trim();
            match key.as_str() {
                "search" => query.criteria.search = Some(value.to_string()),
                "status" => {
                    if let Some(status) = StatusFilter::parse(value) {
                        query.criteria.status = status;
                    }
                }
                "grade" if !value.is_empty() => query.criteria.grades.push(value.to_string()),
                "flag" => {
                    if let Some(flag) = Flag::parse(value) {
                        query.criteria.flag = Some(flag);
                    }
                }
                "min_attendance" => attendance.0 = number(value),
                "max_attendance" => attendance.1 = number(value),
                "min_score" => score.0 = number(value),
                "max_score" => score.1 = number(value),
                "min_due" => due.0 = number(value),
                "max_due" => due.1 = number(value),
                "sort" => query.sort = SortKey::from_str(value, true).ok(),
                "desc" => query.descending = matches!(value, "1" | "true" | "yes"),
                _ => {}
            }
        }

        query.criteria.attendance = Range::new(attendance.0, attendance.1);
        query.criteria.score = Range::new(score.0, score.1);
        query.criteria.due_amount = Range::new(due.0, due.1);
        query
    }
}

fn number(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

//! HTTP reporting API.

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::{info, warn, Level};

use crate::config::ApiConfig;
use crate::db::Database;
use crate::error::Result;
use crate::reports::{
    clamp_limit, ChannelActivity, MessageSearchResult, ProductMention, ReportError, ReportResult, VisualStat,
};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub api: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(db: Database, api: ApiConfig) -> Self {
        Self { db, api: Arc::new(api) }
    }
}

impl IntoResponse for ReportError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            warn!(error = %self, "Report query failed");
        }
        let body = Json(json!({ "error": self.kind(), "detail": self.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub limit: Option<i64>,
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/reports/top-products", get(top_products))
        .route("/api/channels/:channel/activity", get(channel_activity))
        .route("/api/search/messages", get(search_messages))
        .route("/api/reports/visual-content", get(visual_content))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(state: AppState, bind_address: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!(address = %listener.local_addr()?, "Reporting API listening");
    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Run a report query on the blocking pool
async fn query<T, F>(state: &AppState, f: F) -> ReportResult<Json<T>>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> ReportResult<T> + Send + 'static,
{
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| ReportError::Unavailable(e.to_string()))??;
    Ok(Json(rows))
}

async fn index() -> Json<Value> {
    Json(json!({ "message": "Welcome to the channel warehouse API" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn top_products(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ReportResult<Json<Vec<ProductMention>>> {
    let limit = clamp_limit(params.limit, state.api.default_limit, &state.api);
    query(&state, move |db| db.top_products(limit)).await
}

async fn channel_activity(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> ReportResult<Json<Vec<ChannelActivity>>> {
    query(&state, move |db| db.channel_activity(&channel)).await
}

async fn search_messages(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ReportResult<Json<Vec<MessageSearchResult>>> {
    let limit = clamp_limit(params.limit, state.api.search_default_limit, &state.api);
    query(&state, move |db| db.search_messages(&params.query, limit)).await
}

async fn visual_content(State(state): State<AppState>) -> ReportResult<Json<Vec<VisualStat>>> {
    query(&state, Database::visual_content).await
}

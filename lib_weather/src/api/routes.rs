use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use super::error::AppError;
use crate::connections::Store;
use crate::core::BroadcastHub;
use crate::ingestors::IngestCoordinator;
use crate::model::{parse_date, ProjectedReading, Reading, ReadingPayload};
use crate::query::{QueryParams, QueryService};

/// Shared state behind every route.
pub struct AppState<S> {
    pub coordinator: IngestCoordinator<Arc<S>, BroadcastHub>,
    pub queries: QueryService<Arc<S>>,
    pub hub: BroadcastHub,
}

impl<S: Store> AppState<S> {
    pub fn new(store: Arc<S>, hub: BroadcastHub) -> Self {
        Self {
            coordinator: IngestCoordinator::new(Arc::clone(&store), hub.clone()),
            queries: QueryService::new(store),
            hub,
        }
    }
}

/// Builds the HTTP surface:
///
/// | Route                        | Purpose                         |
/// |------------------------------|---------------------------------|
/// | `POST /api/v1/weather`       | submit one reading              |
/// | `GET /api/v1/weather`        | range query (`from`, `to`)      |
/// | `GET /api/v1/weather/{date}` | point query                     |
/// | `GET /api/v1/weather/ws`     | live subscriber feed            |
/// | `GET /api/v1/hub/stats`      | hub counters                    |
/// | `GET /health`                | liveness                        |
pub fn router<S: Store>(state: Arc<AppState<S>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/weather", get(by_range::<S>).post(submit::<S>))
        .route("/api/v1/weather/ws", get(subscribe::<S>))
        .route("/api/v1/weather/{date}", get(by_date::<S>))
        .route("/api/v1/hub/stats", get(hub_stats::<S>))
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn submit<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<ReadingPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Reading>), AppError> {
    let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let stored = state.coordinator.ingest_one(payload).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn by_date<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(date): Path<String>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Result<Json<Vec<ProjectedReading>>, AppError> {
    let Query(params) = params.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let date = parse_date(&date)?;
    let found = state.queries.by_date(date, &params).await?;
    if found.is_empty() {
        return Err(AppError::NotFound(format!("no reading for {date}")));
    }
    Ok(Json(found))
}

/// Range query string. Kept flat: `serde(flatten)` does not mix with
/// numeric fields in url-encoded input.
#[derive(Debug, Deserialize)]
struct RangeQuery {
    from: Option<String>,
    to: Option<String>,
    fields: Option<String>,
    page: Option<u64>,
    limit: Option<u64>,
}

async fn by_range<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> Result<Json<Vec<ProjectedReading>>, AppError> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (Some(from), Some(to)) = (query.from.as_deref(), query.to.as_deref()) else {
        return Err(AppError::BadRequest(
            "both from and to dates are required (YYYY-MM-DD)".to_string(),
        ));
    };
    let (from, to) = (parse_date(from)?, parse_date(to)?);
    let params = QueryParams {
        fields: query.fields,
        page: query.page,
        limit: query.limit,
    };

    let found = state.queries.by_range(from, to, &params).await?;
    if found.is_empty() {
        return Err(AppError::NotFound(format!("no readings between {from} and {to}")));
    }
    Ok(Json(found))
}

async fn subscribe<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.max_message_size(hub.config().max_message_size)
        .on_upgrade(move |socket| async move { hub.accept_subscriber(socket).await })
}

async fn hub_stats<S: Store>(State(state): State<Arc<AppState<S>>>) -> impl IntoResponse {
    Json(state.hub.stats())
}

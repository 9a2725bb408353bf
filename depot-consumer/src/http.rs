use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use depot_client::{ConsumerHealth, ConsumerState, ReceivedEvents};
use depot_core::DeploymentMessage;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub(crate) struct AppState {
    pub(crate) events: ReceivedEvents,
    pub(crate) health: ConsumerHealth,
}

#[derive(Debug, Serialize)]
struct HealthDto {
    status: &'static str,
    broker_connected: bool,
    state: ConsumerState,
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/deployments", get(list_deployments))
        .route("/deployments/{id}", get(get_deployment))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn list_deployments(State(state): State<Arc<AppState>>) -> Json<Vec<DeploymentMessage>> {
    Json(state.events.list())
}

async fn get_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<DeploymentMessage>, (StatusCode, Json<Value>)> {
    state.events.get(id).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Deployment not found" })),
        )
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthDto> {
    Json(HealthDto {
        status: "healthy",
        broker_connected: state.health.is_connected(),
        state: state.health.state(),
    })
}

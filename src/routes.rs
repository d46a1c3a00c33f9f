use std::{sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
    routing::{get, post},
    Json,
    Router,
};
use futures::Stream;
use metrics::tracer::Trace;
use reconciler::Notification;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    configurator::{Applied, Configurator},
    http_objects::{ApiError, ConfigResponse, DeleteRequest, UpdateRequest},
};

const NOTIFY_KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct RouteState {
    pub configurator: Arc<Configurator>,
}

pub fn create_routes(route_state: RouteState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/configurator/config", get(get_config))
        .route("/configurator/update", post(update_config))
        .route("/configurator/delete", post(delete_config))
        .route("/configurator/dump", get(dump_config))
        .route("/configurator/notify", get(notify))
        .route("/diagnostics/trace", get(get_trace).delete(clear_trace))
        .with_state(route_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Registered configuration, i.e. what the agent has applied.
async fn get_config(State(state): State<RouteState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        config: state.configurator.get(),
    })
}

async fn update_config(
    State(state): State<RouteState>,
    Json(request): Json<UpdateRequest>,
) -> Result<Applied, ApiError> {
    Ok(state
        .configurator
        .update(request.update, request.full_resync)
        .await?)
}

async fn delete_config(
    State(state): State<RouteState>,
    Json(request): Json<DeleteRequest>,
) -> Result<Applied, ApiError> {
    Ok(state.configurator.delete(request.delete).await?)
}

/// Actual dataplane state of every kind that supports dumping.
async fn dump_config(State(state): State<RouteState>) -> Result<Json<ConfigResponse>, ApiError> {
    let config = state.configurator.dump().await?;
    Ok(Json(ConfigResponse { config }))
}

fn notification_stream(
    mut rx: broadcast::Receiver<Notification>,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    yield Event::default().json_data(&notification);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "notification watcher fell behind");
                }
                Err(RecvError::Closed) => {
                    info!("notification channel closed, stopping stream");
                    return;
                }
            }
        }
    }
}

async fn notify(
    State(state): State<RouteState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.configurator.notify();
    Sse::new(notification_stream(rx)).keep_alive(KeepAlive::new().interval(NOTIFY_KEEP_ALIVE))
}

fn diagnostics_disabled() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "diagnostics are disabled")
}

async fn get_trace(State(state): State<RouteState>) -> Result<Json<Trace>, ApiError> {
    let tracer = state.configurator.tracer().ok_or_else(diagnostics_disabled)?;
    Ok(Json(tracer.get()))
}

async fn clear_trace(State(state): State<RouteState>) -> Result<StatusCode, ApiError> {
    let tracer = state.configurator.tracer().ok_or_else(diagnostics_disabled)?;
    tracer.clear();
    Ok(StatusCode::NO_CONTENT)
}

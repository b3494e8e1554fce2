//! HTTP surface
//!
//! Hosts the Compute-style REST collections, the EC2-style action endpoint
//! and a couple of housekeeping routes over one shared [`Engine`].

use crate::{compute, ec2};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use skymock_common::{id, Engine, Error, Surface};
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub enable_reset: bool,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            enable_reset: true,
        }
    }
}

/// Engine error bound to the surface that must render it
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub surface: Surface,
}

impl ApiError {
    pub fn gcp(error: Error) -> Self {
        Self {
            error,
            surface: Surface::Gcp,
        }
    }

    pub fn aws(error: Error) -> Self {
        Self {
            error,
            surface: Surface::Aws,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("Request failed: {}", self.error);
        } else {
            debug!("Request rejected: {}", self.error);
        }
        let envelope = self.error.envelope(self.surface, &id::new_request_id());
        (status, Json(envelope)).into_response()
    }
}

pub type ApiResult = std::result::Result<Response, ApiError>;

/// Build the router over `state`
pub fn router(state: AppState) -> Router {
    let compute_routes = [
        "/compute/v1/projects/:project/global",
        "/compute/v1/projects/:project/regions/:region",
        "/compute/v1/projects/:project/zones/:zone",
    ]
    .into_iter()
    .fold(Router::<AppState>::new(), |router, scope| {
        router
            .route(
                &format!("{}/:collection", scope),
                get(compute::list).post(compute::insert),
            )
            .route(
                &format!("{}/:collection/:name", scope),
                get(compute::get)
                    .patch(compute::patch)
                    .put(compute::update)
                    .delete(compute::delete),
            )
            .route(
                &format!("{}/:collection/:name/:verb", scope),
                post(compute::verb),
            )
    });

    compute_routes
        .route("/ec2", post(ec2::handle))
        .route("/_reset", post(reset))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the listener fails
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Skymock listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "version": skymock_common::VERSION })),
    )
}

async fn reset(State(state): State<AppState>) -> impl IntoResponse {
    if !state.enable_reset {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.engine.reset();
    info!("Store reset");
    StatusCode::NO_CONTENT.into_response()
}

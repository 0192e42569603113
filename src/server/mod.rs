mod handlers;
mod state;

use axum::routing::{delete, get};
use axum::Router;
use state::AppState;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::location::LocationService;

pub fn build_router(service: LocationService) -> Router {
    let state = Arc::new(AppState { service });

    Router::new()
        .route("/api/location", get(handlers::current_location))
        .route("/api/location/retry", get(handlers::location_with_retry))
        .route("/api/location/user", get(handlers::user_location))
        .route("/api/location/cached", get(handlers::cached_location))
        .route("/api/location/cache", delete(handlers::clear_cache))
        .route("/api/address", get(handlers::address))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(host: &str, port: u16, service: LocationService) -> std::io::Result<()> {
    let app = build_router(service);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(%addr, "Location API listening");
    axum::serve(listener, app).await
}

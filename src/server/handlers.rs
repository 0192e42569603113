use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::location::types::{LocationError, ResolvedLocation};
use crate::location::validate;

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
    retryable: bool,
}

#[derive(Debug)]
pub(super) struct ApiError {
    status: StatusCode,
    message: String,
    retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.message,
            code: self.status.as_u16(),
            retryable: self.retryable,
        };
        (self.status, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError {
        status,
        message: msg.into(),
        retryable: false,
    }
}

impl From<LocationError> for ApiError {
    fn from(e: LocationError) -> Self {
        let status = match e {
            LocationError::InvalidCoordinates(..) => StatusCode::BAD_REQUEST,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        ApiError {
            status,
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

fn log_request(route: &str, outcome: &str, start: Instant) {
    info!(
        route,
        outcome,
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Request served"
    );
}

fn outcome<T>(result: &Result<T, ApiError>) -> String {
    match result {
        Ok(_) => "OK".to_string(),
        Err(e) => e.status.as_u16().to_string(),
    }
}

// ─── GET /api/location ───────────────────────────────────────────

pub async fn current_location(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResolvedLocation>, ApiError> {
    let start = Instant::now();
    let result = state
        .service
        .get_current_location()
        .await
        .map(Json)
        .map_err(ApiError::from);
    log_request("/api/location", &outcome(&result), start);
    result
}

// ─── GET /api/location/retry ─────────────────────────────────────

#[derive(Deserialize)]
pub struct RetryQuery {
    pub attempts: Option<u32>,
}

pub async fn location_with_retry(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RetryQuery>,
) -> Result<Json<ResolvedLocation>, ApiError> {
    let start = Instant::now();
    let attempts = params.attempts.unwrap_or_else(|| state.service.max_attempts());
    if !(1..=10).contains(&attempts) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "'attempts' must be between 1 and 10",
        ));
    }

    let result = state
        .service
        .get_location_with_retry(attempts)
        .await
        .map(Json)
        .map_err(ApiError::from);
    log_request("/api/location/retry", &outcome(&result), start);
    result
}

// ─── GET /api/location/user ──────────────────────────────────────

#[derive(Deserialize)]
pub struct CoordinateQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

pub async fn user_location(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CoordinateQuery>,
) -> Result<Json<ResolvedLocation>, ApiError> {
    let start = Instant::now();
    let result = match (params.lat, params.lon) {
        (Some(lat), Some(lon)) => state.service.user_location_at(lat, lon).await,
        (None, None) => state.service.get_user_location().await,
        _ => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "Provide both 'lat' and 'lon', or neither",
            ))
        }
    }
    .map(Json)
    .map_err(ApiError::from);
    log_request("/api/location/user", &outcome(&result), start);
    result
}

// ─── GET /api/location/cached, DELETE /api/location/cache ────────

pub async fn cached_location(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResolvedLocation>, ApiError> {
    state
        .service
        .get_cached_location()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "No cached location"))
}

pub async fn clear_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    state.service.clear_cache();
    StatusCode::NO_CONTENT
}

// ─── GET /api/address ────────────────────────────────────────────

#[derive(Serialize)]
pub struct AddressResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

pub async fn address(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CoordinateQuery>,
) -> Result<Json<AddressResponse>, ApiError> {
    let start = Instant::now();
    let (Some(lat), Some(lon)) = (params.lat, params.lon) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing 'lat' or 'lon' parameter"));
    };
    if !validate::is_valid_coordinates(lat, lon) {
        return Err(LocationError::InvalidCoordinates(lat, lon).into());
    }

    let address = state.service.get_detailed_address(lat, lon).await;
    log_request("/api/address", "OK", start);
    Ok(Json(AddressResponse {
        latitude: lat,
        longitude: lon,
        address,
    }))
}

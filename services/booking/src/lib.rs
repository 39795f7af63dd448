//! Class booking service: member bookings against capacity-limited gym classes.

pub mod config;
pub mod handlers;
pub mod manager;
pub mod memory;
pub mod models;
pub mod notifications;
pub mod postgres;
pub mod reconciler;
pub mod routes;
pub mod store;

use axum::{
    http::{HeaderValue, Method, StatusCode},
    response::Json,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use gymflow_common::ApiError;

pub use manager::BookingManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: BookingManager,
}

/// `*` allows any origin; otherwise only the listed origins that parse as header values.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(allowed))
}

pub fn build_app(state: AppState, cors: CorsLayer) -> Router {
    routes::create_routes()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
        .fallback(handler_404)
}

async fn handler_404() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new("NOT_FOUND".to_string(), "Endpoint not found".to_string())),
    )
}

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers;
use crate::AppState;

pub fn create_routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))

        // Member routes
        .route("/members", post(handlers::create_member).get(handlers::find_member))
        .route("/members/:member_id", get(handlers::get_member))
        .route("/members/:member_id/sessions", post(handlers::grant_sessions))
        .route("/members/:member_id/bookings", get(handlers::get_member_bookings))

        // Class routes
        .route("/classes", post(handlers::create_class).get(handlers::list_classes))
        .route("/classes/:class_id", get(handlers::get_class))
        .route("/classes/:class_id/bookings", get(handlers::get_class_bookings))
        .route("/classes/:class_id/reconcile", post(handlers::reconcile_class))

        // Maintenance routes
        .route("/maintenance/reconcile", post(handlers::reconcile_upcoming))

        // Booking routes
        .route("/bookings", post(handlers::create_booking))
        .route("/bookings/:booking_id", get(handlers::get_booking).delete(handlers::delete_booking))
        .route("/bookings/:booking_id/cancel", post(handlers::cancel_booking))
        .route("/bookings/:booking_id/attendance", put(handlers::record_attendance))
}

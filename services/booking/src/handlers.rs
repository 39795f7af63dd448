use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use gymflow_common::{ApiError, ApiResponse, Booking, GymClass, Member};

use crate::models::*;
use crate::AppState;

type HandlerError = (StatusCode, Json<ApiError>);
type HandlerResult<T> = Result<Json<ApiResponse<T>>, HandlerError>;

fn booking_error(err: BookingError) -> HandlerError {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!("Booking request failed: {}", err);
    } else {
        tracing::debug!("Booking request rejected: {}", err);
    }

    let body = ApiError::new(err.error_code().to_string(), err.user_message())
        .with_details(serde_json::json!({ "retryable": err.is_retryable() }));
    (status, Json(body))
}

fn bad_request(message: String) -> HandlerError {
    let body = ApiError::new("VALIDATION_ERROR".to_string(), message)
        .with_details(serde_json::json!({ "retryable": false }));
    (StatusCode::BAD_REQUEST, Json(body))
}

fn validation_error(errors: ValidationErrors) -> HandlerError {
    bad_request(format!("Validation error: {}", errors))
}

#[derive(Debug, Deserialize)]
pub struct MemberLookupQuery {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ClassListQuery {
    pub after: Option<NaiveDate>,
}

// Health check
pub async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::success("Booking Service is healthy".to_string()))
}

// Members
pub async fn create_member(
    State(state): State<AppState>,
    Json(request): Json<CreateMemberRequest>,
) -> HandlerResult<Member> {
    request.validate().map_err(validation_error)?;

    let member = state.manager.create_member(request.into()).await.map_err(booking_error)?;
    Ok(Json(ApiResponse::success(member)))
}

pub async fn find_member(
    State(state): State<AppState>,
    Query(query): Query<MemberLookupQuery>,
) -> HandlerResult<Member> {
    let member = state
        .manager
        .find_member_by_email(&query.email)
        .await
        .map_err(booking_error)?;
    Ok(Json(ApiResponse::success(member)))
}

pub async fn get_member(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
) -> HandlerResult<Member> {
    let member = state.manager.get_member(member_id).await.map_err(booking_error)?;
    Ok(Json(ApiResponse::success(member)))
}

pub async fn grant_sessions(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Json(request): Json<GrantSessionsRequest>,
) -> HandlerResult<BalanceResponse> {
    request.validate().map_err(validation_error)?;

    let remaining_sessions = state
        .manager
        .grant_sessions(member_id, request.sessions)
        .await
        .map_err(booking_error)?;

    Ok(Json(ApiResponse::success(BalanceResponse {
        member_id,
        remaining_sessions,
    })))
}

pub async fn get_member_bookings(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
) -> HandlerResult<Vec<Booking>> {
    let bookings = state.manager.member_bookings(member_id).await.map_err(booking_error)?;
    Ok(Json(ApiResponse::success(bookings)))
}

// Classes
pub async fn create_class(
    State(state): State<AppState>,
    Json(request): Json<CreateClassRequest>,
) -> HandlerResult<GymClass> {
    request.validate().map_err(validation_error)?;

    let class = state.manager.create_class(request.into()).await.map_err(booking_error)?;
    Ok(Json(ApiResponse::success(class)))
}

pub async fn list_classes(
    State(state): State<AppState>,
    Query(query): Query<ClassListQuery>,
) -> HandlerResult<Vec<GymClass>> {
    let classes = state
        .manager
        .list_upcoming_classes(query.after)
        .await
        .map_err(booking_error)?;
    Ok(Json(ApiResponse::success(classes)))
}

pub async fn get_class(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
) -> HandlerResult<GymClass> {
    let class = state.manager.get_class(class_id).await.map_err(booking_error)?;
    Ok(Json(ApiResponse::success(class)))
}

pub async fn get_class_bookings(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
) -> HandlerResult<Vec<Booking>> {
    let bookings = state.manager.class_bookings(class_id).await.map_err(booking_error)?;
    Ok(Json(ApiResponse::success(bookings)))
}

pub async fn reconcile_class(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
) -> HandlerResult<ReconcileResponse> {
    let enrolled = state
        .manager
        .reconcile_enrollment(class_id)
        .await
        .map_err(booking_error)?;
    Ok(Json(ApiResponse::success(ReconcileResponse { class_id, enrolled })))
}

pub async fn reconcile_upcoming(State(state): State<AppState>) -> HandlerResult<ReconcileSummary> {
    let summary = state
        .manager
        .reconcile_upcoming(Utc::now().date_naive())
        .await
        .map_err(booking_error)?;
    Ok(Json(ApiResponse::success(summary)))
}

// Bookings
pub async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> HandlerResult<Booking> {
    let booking = state
        .manager
        .create_booking(request.member_id, request.class_id)
        .await
        .map_err(booking_error)?;
    Ok(Json(ApiResponse::success(booking)))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> HandlerResult<Booking> {
    let booking = state.manager.get_booking(booking_id).await.map_err(booking_error)?;
    Ok(Json(ApiResponse::success(booking)))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    request: Result<Json<CancelBookingRequest>, JsonRejection>,
) -> HandlerResult<Booking> {
    // A bodyless cancel comes from the member; a body that is sent must parse.
    let cancelled_by = match request {
        Ok(Json(request)) => request.cancelled_by,
        Err(JsonRejection::MissingJsonContentType(_)) => CancelledBy::default(),
        Err(rejection) => return Err(bad_request(format!("Invalid request body: {}", rejection.body_text()))),
    };

    state
        .manager
        .cancel_booking(booking_id, cancelled_by)
        .await
        .map_err(booking_error)?;

    let booking = state.manager.get_booking(booking_id).await.map_err(booking_error)?;
    Ok(Json(ApiResponse::success(booking)))
}

pub async fn delete_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> HandlerResult<String> {
    state
        .manager
        .delete_booking(booking_id)
        .await
        .map_err(booking_error)?;
    Ok(Json(ApiResponse::success("Booking deleted".to_string())))
}

pub async fn record_attendance(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<AttendanceRequest>,
) -> HandlerResult<Booking> {
    let booking = state
        .manager
        .record_attendance(booking_id, request.attended)
        .await
        .map_err(booking_error)?;
    Ok(Json(ApiResponse::success(booking)))
}

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use gymflow_common::{AppError, BookingStatus, ClassGender, Gender, NewClass, NewMember};

// Request/Response DTOs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub member_id: Uuid,
    pub class_id: Uuid,
}

/// Who asked for the cancellation. Staff cancellations ignore the member cutoff window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    #[default]
    Member,
    Staff,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelBookingRequest {
    #[serde(default)]
    pub cancelled_by: CancelledBy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRequest {
    pub attended: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GrantSessionsRequest {
    #[validate(range(min = 1, max = 500))]
    pub sessions: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateMemberRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub gender: Option<Gender>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub remaining_sessions: i32,
}

impl From<CreateMemberRequest> for NewMember {
    fn from(request: CreateMemberRequest) -> Self {
        NewMember {
            email: request.email.trim().to_lowercase(),
            name: request.name.trim().to_string(),
            gender: request.gender,
            remaining_sessions: request.remaining_sessions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_class_times"))]
pub struct CreateClassRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub schedule: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[validate(range(min = 1, max = 500))]
    pub capacity: i32,
    #[serde(default)]
    pub gender: ClassGender,
    #[serde(default)]
    pub trainers: Vec<String>,
}

fn validate_class_times(request: &CreateClassRequest) -> Result<(), ValidationError> {
    if request.end_time <= request.start_time {
        return Err(ValidationError::new("end_time_before_start_time"));
    }
    Ok(())
}

impl From<CreateClassRequest> for NewClass {
    fn from(request: CreateClassRequest) -> Self {
        NewClass {
            name: request.name.trim().to_string(),
            schedule: request.schedule,
            start_time: request.start_time,
            end_time: request.end_time,
            capacity: request.capacity,
            gender: request.gender,
            trainers: request.trainers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub member_id: Uuid,
    pub remaining_sessions: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub class_id: Uuid,
    pub enrolled: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub classes_checked: usize,
    pub classes_repaired: usize,
    pub classes_failed: usize,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Member {0} not found")]
    MemberNotFound(Uuid),

    #[error("Member {0} is not active")]
    MemberInactive(Uuid),

    #[error("Member {0} has no remaining sessions")]
    InsufficientBalance(Uuid),

    #[error("Class {0} not found")]
    ClassNotFound(Uuid),

    #[error("Class {0} is not open for booking")]
    ClassUnavailable(Uuid),

    #[error("Class {class_id} is restricted to {restriction} members")]
    EligibilityViolation { class_id: Uuid, restriction: ClassGender },

    #[error("Member {member_id} already has a confirmed booking for class {class_id}")]
    AlreadyBooked { member_id: Uuid, class_id: Uuid },

    #[error("Class {0} is full")]
    ClassFull(Uuid),

    #[error("Booking {0} not found")]
    NotFound(Uuid),

    #[error("Booking {booking_id} is {status}")]
    InvalidState { booking_id: Uuid, status: BookingStatus },

    #[error("Booking {booking_id} is within the {cutoff_hours}h cancellation window")]
    CancellationWindowClosed { booking_id: Uuid, cutoff_hours: i64 },

    #[error("Booking {booking_id} still has {remaining} row(s) after delete retries")]
    DeleteUnverified { booking_id: Uuid, remaining: i64 },

    #[error(transparent)]
    Store(#[from] AppError),
}

impl BookingError {
    pub fn status_code(&self) -> u16 {
        match self {
            BookingError::MemberNotFound(_)
            | BookingError::ClassNotFound(_)
            | BookingError::NotFound(_) => 404,
            BookingError::AlreadyBooked { .. } | BookingError::ClassFull(_) => 409,
            BookingError::MemberInactive(_)
            | BookingError::InsufficientBalance(_)
            | BookingError::ClassUnavailable(_)
            | BookingError::EligibilityViolation { .. }
            | BookingError::InvalidState { .. }
            | BookingError::CancellationWindowClosed { .. } => 422,
            BookingError::DeleteUnverified { .. } => 503,
            BookingError::Store(err) => err.status_code(),
        }
    }

    pub fn error_code(&self) -> &str {
        match self {
            BookingError::MemberNotFound(_) => "MEMBER_NOT_FOUND",
            BookingError::MemberInactive(_) => "MEMBER_INACTIVE",
            BookingError::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            BookingError::ClassNotFound(_) => "CLASS_NOT_FOUND",
            BookingError::ClassUnavailable(_) => "CLASS_UNAVAILABLE",
            BookingError::EligibilityViolation { .. } => "ELIGIBILITY_VIOLATION",
            BookingError::AlreadyBooked { .. } => "ALREADY_BOOKED",
            BookingError::ClassFull(_) => "CLASS_FULL",
            BookingError::NotFound(_) => "BOOKING_NOT_FOUND",
            BookingError::InvalidState { .. } => "INVALID_STATE",
            BookingError::CancellationWindowClosed { .. } => "CANCELLATION_WINDOW_CLOSED",
            BookingError::DeleteUnverified { .. } => "STORE_ERROR",
            BookingError::Store(err) => err.error_code(),
        }
    }

    /// Message shown to the member or staff user.
    pub fn user_message(&self) -> String {
        match self {
            BookingError::MemberNotFound(_) => "Member not found".to_string(),
            BookingError::MemberInactive(_) => "Your membership is not active".to_string(),
            BookingError::InsufficientBalance(_) => "No sessions remaining".to_string(),
            BookingError::ClassNotFound(_) => "Class not found".to_string(),
            BookingError::ClassUnavailable(_) => "This class is no longer open for booking".to_string(),
            BookingError::EligibilityViolation { .. } => "This class is for women only".to_string(),
            BookingError::AlreadyBooked { .. } => "You have already booked this class".to_string(),
            BookingError::ClassFull(_) => "This class is full".to_string(),
            BookingError::NotFound(_) => "Booking not found".to_string(),
            BookingError::InvalidState { status: BookingStatus::Confirmed, .. } => {
                "Cancel the booking before deleting it".to_string()
            }
            BookingError::InvalidState { .. } => "This booking has been cancelled".to_string(),
            BookingError::CancellationWindowClosed { cutoff_hours, .. } => format!(
                "Bookings can no longer be cancelled within {} hours of the class",
                cutoff_hours
            ),
            BookingError::Store(AppError::Conflict(msg))
            | BookingError::Store(AppError::Validation(msg))
            | BookingError::Store(AppError::NotFound(msg)) => msg.clone(),
            BookingError::DeleteUnverified { .. } | BookingError::Store(_) => {
                "Something went wrong, please try again".to_string()
            }
        }
    }

    /// Store failures may be retried by the caller; validation failures may not.
    pub fn is_retryable(&self) -> bool {
        match self {
            BookingError::DeleteUnverified { .. } => true,
            BookingError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_have_actionable_messages() {
        let id = Uuid::new_v4();
        let female_only = BookingError::EligibilityViolation {
            class_id: id,
            restriction: ClassGender::Female,
        };
        assert_eq!(female_only.user_message(), "This class is for women only");
        assert_eq!(female_only.status_code(), 422);
        assert!(!female_only.is_retryable());

        assert_eq!(BookingError::InsufficientBalance(id).user_message(), "No sessions remaining");
        assert_eq!(BookingError::ClassFull(id).status_code(), 409);

        let still_confirmed = BookingError::InvalidState {
            booking_id: id,
            status: BookingStatus::Confirmed,
        };
        assert_eq!(still_confirmed.user_message(), "Cancel the booking before deleting it");
    }

    #[test]
    fn store_errors_ask_the_user_to_retry() {
        let err = BookingError::from(AppError::Timeout("insert booking".to_string()));
        assert!(err.is_retryable());
        assert_eq!(err.user_message(), "Something went wrong, please try again");
        assert_eq!(err.status_code(), 504);

        let unverified = BookingError::DeleteUnverified {
            booking_id: Uuid::new_v4(),
            remaining: 1,
        };
        assert!(unverified.is_retryable());
        assert_eq!(unverified.error_code(), "STORE_ERROR");
    }

    #[test]
    fn class_request_rejects_inverted_times() {
        let request = CreateClassRequest {
            name: "Late Spin".to_string(),
            schedule: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            start_time: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            capacity: 10,
            gender: ClassGender::All,
            trainers: vec![],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn cancel_request_defaults_to_member() {
        let request: CancelBookingRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.cancelled_by, CancelledBy::Member);
    }
}

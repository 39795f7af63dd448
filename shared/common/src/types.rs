use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberStatus {
    Active,
    Inactive,
}

/// Which members a class admits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ClassGender {
    #[default]
    All,
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClassStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "Active",
            MemberStatus::Inactive => "Inactive",
        }
    }
}

impl ClassGender {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassGender::All => "All",
            ClassGender::Male => "Male",
            ClassGender::Female => "Female",
        }
    }
}

impl ClassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassStatus::Active => "Active",
            ClassStatus::Inactive => "Inactive",
        }
    }
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for Gender {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Male" => Ok(Gender::Male),
            "Female" => Ok(Gender::Female),
            other => Err(AppError::Internal(format!("Unknown gender: {}", other))),
        }
    }
}

impl FromStr for MemberStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(MemberStatus::Active),
            "Inactive" => Ok(MemberStatus::Inactive),
            other => Err(AppError::Internal(format!("Unknown member status: {}", other))),
        }
    }
}

impl FromStr for ClassGender {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "All" => Ok(ClassGender::All),
            "Male" => Ok(ClassGender::Male),
            "Female" => Ok(ClassGender::Female),
            other => Err(AppError::Internal(format!("Unknown class gender: {}", other))),
        }
    }
}

impl FromStr for ClassStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(ClassStatus::Active),
            "Inactive" => Ok(ClassStatus::Inactive),
            other => Err(AppError::Internal(format!("Unknown class status: {}", other))),
        }
    }
}

impl FromStr for BookingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(AppError::Internal(format!("Unknown booking status: {}", other))),
        }
    }
}

impl fmt::Display for ClassGender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub gender: Option<Gender>,
    pub remaining_sessions: i32,
    pub status: MemberStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GymClass {
    pub id: Uuid,
    pub name: String,
    pub schedule: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: i32,
    pub enrolled: i32,
    pub gender: ClassGender,
    pub trainers: Vec<String>,
    pub status: ClassStatus,
    pub created_at: DateTime<Utc>,
}

impl GymClass {
    pub fn has_free_seat(&self) -> bool {
        self.enrolled < self.capacity
    }

    /// Start of the class, with the schedule read as UTC.
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.schedule.and_time(self.start_time).and_utc()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub class_id: Uuid,
    pub status: BookingStatus,
    pub booking_date: DateTime<Utc>,
    pub attendance: Option<bool>,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMember {
    pub email: String,
    pub name: String,
    pub gender: Option<Gender>,
    pub remaining_sessions: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClass {
    pub name: String,
    pub schedule: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: i32,
    pub gender: ClassGender,
    pub trainers: Vec<String>,
}

// Common response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip_through_database_text() {
        for status in [BookingStatus::Confirmed, BookingStatus::Cancelled] {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        for gender in [ClassGender::All, ClassGender::Male, ClassGender::Female] {
            assert_eq!(gender.as_str().parse::<ClassGender>().unwrap(), gender);
        }
        assert!("CONFIRMED".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn booking_status_serializes_lowercase() {
        let json = serde_json::to_string(&BookingStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn class_seat_and_start_helpers() {
        let class = GymClass {
            id: Uuid::new_v4(),
            name: "Spin".to_string(),
            schedule: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            start_time: NaiveTime::from_hms_opt(18, 30, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(19, 30, 0).unwrap(),
            capacity: 2,
            enrolled: 2,
            gender: ClassGender::All,
            trainers: vec![],
            status: ClassStatus::Active,
            created_at: Utc::now(),
        };

        assert!(!class.has_free_seat());
        assert_eq!(class.starts_at().to_rfc3339(), "2026-03-14T18:30:00+00:00");
    }
}

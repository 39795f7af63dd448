use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use gymflow_common::*;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MemberRow {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub gender: Option<String>,
    pub remaining_sessions: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClassRow {
    pub id: Uuid,
    pub name: String,
    pub schedule: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: i32,
    pub enrolled: i32,
    pub gender: String,
    pub trainers: Vec<String>, // PostgreSQL text array
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BookingRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub class_id: Uuid,
    pub status: String,
    pub booking_date: DateTime<Utc>,
    pub attendance: Option<bool>,
}

impl TryFrom<MemberRow> for Member {
    type Error = AppError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        Ok(Member {
            id: row.id,
            email: row.email,
            name: row.name,
            gender: row.gender.as_deref().map(str::parse::<Gender>).transpose()?,
            remaining_sessions: row.remaining_sessions,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<ClassRow> for GymClass {
    type Error = AppError;

    fn try_from(row: ClassRow) -> Result<Self, Self::Error> {
        Ok(GymClass {
            id: row.id,
            name: row.name,
            schedule: row.schedule,
            start_time: row.start_time,
            end_time: row.end_time,
            capacity: row.capacity,
            enrolled: row.enrolled,
            gender: row.gender.parse()?,
            trainers: row.trainers,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<BookingRow> for Booking {
    type Error = AppError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            user_id: row.user_id,
            class_id: row.class_id,
            status: row.status.parse()?,
            booking_date: row.booking_date,
            attendance: row.attendance,
        })
    }
}

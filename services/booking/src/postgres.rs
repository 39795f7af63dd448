use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use gymflow_common::{AppError, Booking, GymClass, Member, NewClass, NewMember};
use gymflow_database::{BookingRow, ClassRow, MemberRow};

use crate::store::{BookingStore, ClassCatalog, MemberDirectory};

const UNIQUE_VIOLATION: &str = "23505";

const MEMBER_COLUMNS: &str = "id, email, name, gender, remaining_sessions, status, created_at";
const CLASS_COLUMNS: &str =
    "id, name, schedule, start_time, end_time, capacity, enrolled, gender, trainers, status, created_at";
const BOOKING_COLUMNS: &str = "id, user_id, class_id, status, booking_date, attendance";

/// Postgres-backed member directory, class catalog and booking table.
#[derive(Clone)]
pub struct PgStore {
    db_pool: PgPool,
}

impl PgStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

fn into_bookings(rows: Vec<BookingRow>) -> Result<Vec<Booking>, AppError> {
    rows.into_iter().map(Booking::try_from).collect()
}

#[async_trait]
impl MemberDirectory for PgStore {
    async fn create_member(&self, member: NewMember) -> Result<Member, AppError> {
        let query = format!(
            r#"
            INSERT INTO members (id, email, name, gender, remaining_sessions, status)
            VALUES ($1, $2, $3, $4, $5, 'Active')
            RETURNING {}
            "#,
            MEMBER_COLUMNS
        );

        let row = sqlx::query_as::<_, MemberRow>(&query)
            .bind(Uuid::new_v4())
            .bind(&member.email)
            .bind(&member.name)
            .bind(member.gender.map(|g| g.as_str()))
            .bind(member.remaining_sessions)
            .fetch_one(&self.db_pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict(format!("A member with email {} already exists", member.email))
                } else {
                    AppError::Database(e)
                }
            })?;

        tracing::info!("Member created: {} ({})", row.id, row.email);
        Member::try_from(row)
    }

    async fn get_member(&self, member_id: Uuid) -> Result<Option<Member>, AppError> {
        let query = format!("SELECT {} FROM members WHERE id = $1", MEMBER_COLUMNS);
        sqlx::query_as::<_, MemberRow>(&query)
            .bind(member_id)
            .fetch_optional(&self.db_pool)
            .await?
            .map(Member::try_from)
            .transpose()
    }

    async fn get_member_by_email(&self, email: &str) -> Result<Option<Member>, AppError> {
        let query = format!("SELECT {} FROM members WHERE lower(email) = lower($1)", MEMBER_COLUMNS);
        sqlx::query_as::<_, MemberRow>(&query)
            .bind(email.trim())
            .fetch_optional(&self.db_pool)
            .await?
            .map(Member::try_from)
            .transpose()
    }

    async fn update_remaining_sessions(&self, member_id: Uuid, delta: i32) -> Result<Option<i32>, AppError> {
        let balance = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE members
            SET remaining_sessions = remaining_sessions + $2
            WHERE id = $1 AND remaining_sessions + $2 >= 0
            RETURNING remaining_sessions
            "#
        )
        .bind(member_id)
        .bind(delta)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(balance)
    }
}

#[async_trait]
impl ClassCatalog for PgStore {
    async fn create_class(&self, class: NewClass) -> Result<GymClass, AppError> {
        let query = format!(
            r#"
            INSERT INTO classes (id, name, schedule, start_time, end_time, capacity, enrolled, gender, trainers, status)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, 'Active')
            RETURNING {}
            "#,
            CLASS_COLUMNS
        );

        let row = sqlx::query_as::<_, ClassRow>(&query)
            .bind(Uuid::new_v4())
            .bind(&class.name)
            .bind(class.schedule)
            .bind(class.start_time)
            .bind(class.end_time)
            .bind(class.capacity)
            .bind(class.gender.as_str())
            .bind(&class.trainers)
            .fetch_one(&self.db_pool)
            .await?;

        tracing::info!("Class created: {} ({} on {})", row.id, row.name, row.schedule);
        GymClass::try_from(row)
    }

    async fn get_class(&self, class_id: Uuid) -> Result<Option<GymClass>, AppError> {
        let query = format!("SELECT {} FROM classes WHERE id = $1", CLASS_COLUMNS);
        sqlx::query_as::<_, ClassRow>(&query)
            .bind(class_id)
            .fetch_optional(&self.db_pool)
            .await?
            .map(GymClass::try_from)
            .transpose()
    }

    async fn list_active(&self, after: NaiveDate) -> Result<Vec<GymClass>, AppError> {
        let query = format!(
            "SELECT {} FROM classes WHERE status = 'Active' AND schedule >= $1 ORDER BY schedule, start_time",
            CLASS_COLUMNS
        );
        sqlx::query_as::<_, ClassRow>(&query)
            .bind(after)
            .fetch_all(&self.db_pool)
            .await?
            .into_iter()
            .map(GymClass::try_from)
            .collect()
    }

    async fn update_enrolled(&self, class_id: Uuid, delta: i32) -> Result<Option<i32>, AppError> {
        let enrolled = sqlx::query_scalar::<_, i32>(
            "UPDATE classes SET enrolled = GREATEST(enrolled + $2, 0) WHERE id = $1 RETURNING enrolled"
        )
        .bind(class_id)
        .bind(delta)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(enrolled)
    }

    async fn try_reserve_seat(&self, class_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE classes SET enrolled = enrolled + 1 WHERE id = $1 AND enrolled < capacity"
        )
        .bind(class_id)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_enrolled(&self, class_id: Uuid, enrolled: i32) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE classes SET enrolled = $2 WHERE id = $1")
            .bind(class_id)
            .bind(enrolled.max(0))
            .execute(&self.db_pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn insert_booking(&self, member_id: Uuid, class_id: Uuid) -> Result<Booking, AppError> {
        let query = format!(
            r#"
            INSERT INTO bookings (id, user_id, class_id, status, booking_date)
            VALUES ($1, $2, $3, 'confirmed', NOW())
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        );

        let row = sqlx::query_as::<_, BookingRow>(&query)
            .bind(Uuid::new_v4())
            .bind(member_id)
            .bind(class_id)
            .fetch_one(&self.db_pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict(format!(
                        "Member {} already has a confirmed booking for class {}",
                        member_id, class_id
                    ))
                } else {
                    AppError::Database(e)
                }
            })?;

        Booking::try_from(row)
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, AppError> {
        let query = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        sqlx::query_as::<_, BookingRow>(&query)
            .bind(booking_id)
            .fetch_optional(&self.db_pool)
            .await?
            .map(Booking::try_from)
            .transpose()
    }

    async fn find_confirmed(&self, member_id: Uuid, class_id: Uuid) -> Result<Option<Booking>, AppError> {
        let query = format!(
            "SELECT {} FROM bookings WHERE user_id = $1 AND class_id = $2 AND status = 'confirmed'",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, BookingRow>(&query)
            .bind(member_id)
            .bind(class_id)
            .fetch_optional(&self.db_pool)
            .await?
            .map(Booking::try_from)
            .transpose()
    }

    async fn mark_cancelled(&self, booking_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE bookings SET status = 'cancelled' WHERE id = $1 AND status = 'confirmed'"
        )
        .bind(booking_id)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_attendance(&self, booking_id: Uuid, attended: bool) -> Result<Option<Booking>, AppError> {
        let query = format!(
            "UPDATE bookings SET attendance = $2 WHERE id = $1 AND status = 'confirmed' RETURNING {}",
            BOOKING_COLUMNS
        );
        sqlx::query_as::<_, BookingRow>(&query)
            .bind(booking_id)
            .bind(attended)
            .fetch_optional(&self.db_pool)
            .await?
            .map(Booking::try_from)
            .transpose()
    }

    async fn delete_booking(&self, booking_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(booking_id)
            .execute(&self.db_pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_cancelled_for(&self, member_id: Uuid, class_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            "DELETE FROM bookings WHERE user_id = $1 AND class_id = $2 AND status = 'cancelled'"
        )
        .bind(member_id)
        .bind(class_id)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_cancelled_for(&self, member_id: Uuid, class_id: Uuid) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM bookings WHERE user_id = $1 AND class_id = $2 AND status = 'cancelled'"
        )
        .bind(member_id)
        .bind(class_id)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(count)
    }

    async fn count_confirmed_for_class(&self, class_id: Uuid) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM bookings WHERE class_id = $1 AND status = 'confirmed'"
        )
        .bind(class_id)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(count)
    }

    async fn list_for_member(&self, member_id: Uuid) -> Result<Vec<Booking>, AppError> {
        let query = format!(
            "SELECT {} FROM bookings WHERE user_id = $1 ORDER BY booking_date DESC",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<_, BookingRow>(&query)
            .bind(member_id)
            .fetch_all(&self.db_pool)
            .await?;

        into_bookings(rows)
    }

    async fn list_for_class(&self, class_id: Uuid) -> Result<Vec<Booking>, AppError> {
        let query = format!(
            "SELECT {} FROM bookings WHERE class_id = $1 ORDER BY booking_date",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<_, BookingRow>(&query)
            .bind(class_id)
            .fetch_all(&self.db_pool)
            .await?;

        into_bookings(rows)
    }
}

//! Narrow interfaces over the backing store.
//!
//! The booking manager never sees SQL; it talks to a member directory, a class
//! catalog and a booking table through these traits. Every mutation that must
//! respect an invariant (balance never negative, enrolled never above capacity
//! or below zero, one confirmed booking per member and class) is expressed as a
//! conditional operation the store performs atomically.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use gymflow_common::{AppError, Booking, GymClass, Member, NewClass, NewMember};

#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Fails with `AppError::Conflict` when the email is already registered.
    async fn create_member(&self, member: NewMember) -> Result<Member, AppError>;

    async fn get_member(&self, member_id: Uuid) -> Result<Option<Member>, AppError>;

    async fn get_member_by_email(&self, email: &str) -> Result<Option<Member>, AppError>;

    /// Adds `delta` to the balance unless the result would be negative.
    /// Returns the new balance, or `None` when the member is missing or the
    /// balance is too low.
    async fn update_remaining_sessions(&self, member_id: Uuid, delta: i32) -> Result<Option<i32>, AppError>;
}

#[async_trait]
pub trait ClassCatalog: Send + Sync {
    async fn create_class(&self, class: NewClass) -> Result<GymClass, AppError>;

    async fn get_class(&self, class_id: Uuid) -> Result<Option<GymClass>, AppError>;

    /// Active classes scheduled on or after `after`, earliest first.
    async fn list_active(&self, after: NaiveDate) -> Result<Vec<GymClass>, AppError>;

    /// Adds `delta` to `enrolled`, flooring at zero. Returns the new count, `None` if the class is missing.
    async fn update_enrolled(&self, class_id: Uuid, delta: i32) -> Result<Option<i32>, AppError>;

    /// `enrolled = enrolled + 1 WHERE enrolled < capacity`. Returns whether a seat was taken.
    async fn try_reserve_seat(&self, class_id: Uuid) -> Result<bool, AppError>;

    /// Overwrites `enrolled`. Only reconciliation calls this.
    async fn set_enrolled(&self, class_id: Uuid, enrolled: i32) -> Result<bool, AppError>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Inserts a confirmed booking. Fails with `AppError::Conflict` when the
    /// member already holds a confirmed booking for the class.
    async fn insert_booking(&self, member_id: Uuid, class_id: Uuid) -> Result<Booking, AppError>;

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, AppError>;

    async fn find_confirmed(&self, member_id: Uuid, class_id: Uuid) -> Result<Option<Booking>, AppError>;

    /// Moves a confirmed booking to cancelled. Returns false when it was not confirmed.
    async fn mark_cancelled(&self, booking_id: Uuid) -> Result<bool, AppError>;

    /// Sets attendance on a confirmed booking. Returns the updated booking when it was confirmed.
    async fn set_attendance(&self, booking_id: Uuid, attended: bool) -> Result<Option<Booking>, AppError>;

    /// Hard delete by id, whatever the status. Returns rows affected.
    async fn delete_booking(&self, booking_id: Uuid) -> Result<u64, AppError>;

    /// Hard delete of every cancelled booking for the pair. Returns rows affected.
    async fn delete_cancelled_for(&self, member_id: Uuid, class_id: Uuid) -> Result<u64, AppError>;

    async fn count_cancelled_for(&self, member_id: Uuid, class_id: Uuid) -> Result<i64, AppError>;

    async fn count_confirmed_for_class(&self, class_id: Uuid) -> Result<i64, AppError>;

    /// Newest first.
    async fn list_for_member(&self, member_id: Uuid) -> Result<Vec<Booking>, AppError>;

    async fn list_for_class(&self, class_id: Uuid) -> Result<Vec<Booking>, AppError>;
}

//! In-process store used by tests and `BOOKING_STORE=memory` local runs.
//!
//! Mirrors the Postgres store's conditional updates so the manager behaves the
//! same against either backend. A few fault switches let tests simulate the
//! remote failures the delete protocol and reconciliation exist for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use gymflow_common::{
    AppError, Booking, BookingStatus, ClassStatus, GymClass, Member, MemberStatus, NewClass, NewMember,
};

use crate::store::{BookingStore, ClassCatalog, MemberDirectory};

#[derive(Default)]
struct State {
    members: HashMap<Uuid, Member>,
    classes: HashMap<Uuid, GymClass>,
    bookings: HashMap<Uuid, Booking>,
}

#[derive(Default)]
struct Faults {
    failing_deletes: AtomicU32,
    ignore_deletes_by_id: AtomicBool,
    enrollment_unavailable: AtomicBool,
    lose_seat_races: AtomicBool,
    reject_session_debits: AtomicBool,
    ignore_fallback_deletes: AtomicBool,
    cancellations_unavailable: AtomicBool,
    member_lookup_stall_ms: AtomicU64,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` calls to `delete_booking` fail with a timeout.
    pub fn fail_next_deletes(&self, count: u32) {
        self.faults.failing_deletes.store(count, Ordering::SeqCst);
    }

    /// `delete_booking` reports success without removing anything, as when the id no longer matches.
    pub fn ignore_deletes_by_id(&self, ignore: bool) {
        self.faults.ignore_deletes_by_id.store(ignore, Ordering::SeqCst);
    }

    /// Enrolled-count updates fail while set.
    pub fn fail_enrollment_updates(&self, fail: bool) {
        self.faults.enrollment_unavailable.store(fail, Ordering::SeqCst);
    }

    /// Seat reservations report the class as full, as when another booking took the last seat.
    pub fn lose_seat_races(&self, lose: bool) {
        self.faults.lose_seat_races.store(lose, Ordering::SeqCst);
    }

    /// Session debits are refused, as when the balance was spent concurrently.
    pub fn reject_session_debits(&self, reject: bool) {
        self.faults.reject_session_debits.store(reject, Ordering::SeqCst);
    }

    /// `delete_cancelled_for` removes nothing.
    pub fn ignore_fallback_deletes(&self, ignore: bool) {
        self.faults.ignore_fallback_deletes.store(ignore, Ordering::SeqCst);
    }

    /// `mark_cancelled` fails with a timeout while set.
    pub fn fail_cancellations(&self, fail: bool) {
        self.faults.cancellations_unavailable.store(fail, Ordering::SeqCst);
    }

    /// `get_member` sleeps this long before answering. Zero turns the stall off.
    pub fn stall_member_lookups(&self, stall: Duration) {
        let millis = u64::try_from(stall.as_millis()).unwrap_or(u64::MAX);
        self.faults.member_lookup_stall_ms.store(millis, Ordering::SeqCst);
    }

    /// Inserts or replaces a member as-is.
    pub async fn put_member(&self, member: Member) {
        self.state.write().await.members.insert(member.id, member);
    }

    /// Inserts or replaces a class as-is, including its stored `enrolled` count.
    pub async fn put_class(&self, class: GymClass) {
        self.state.write().await.classes.insert(class.id, class);
    }

    /// Inserts a booking row directly, bypassing the uniqueness check.
    pub async fn put_booking(&self, booking: Booking) {
        self.state.write().await.bookings.insert(booking.id, booking);
    }

    pub async fn booking_count(&self) -> usize {
        self.state.read().await.bookings.len()
    }

    fn check_enrollment_available(&self) -> Result<(), AppError> {
        if self.faults.enrollment_unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Timeout("class enrollment update".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MemberDirectory for InMemoryStore {
    async fn create_member(&self, member: NewMember) -> Result<Member, AppError> {
        let mut state = self.state.write().await;
        if state.members.values().any(|m| m.email.eq_ignore_ascii_case(&member.email)) {
            return Err(AppError::Conflict(format!(
                "A member with email {} already exists",
                member.email
            )));
        }

        let created = Member {
            id: Uuid::new_v4(),
            email: member.email,
            name: member.name,
            gender: member.gender,
            remaining_sessions: member.remaining_sessions.max(0),
            status: MemberStatus::Active,
            created_at: Utc::now(),
        };
        state.members.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_member(&self, member_id: Uuid) -> Result<Option<Member>, AppError> {
        let stall_ms = self.faults.member_lookup_stall_ms.load(Ordering::SeqCst);
        if stall_ms > 0 {
            tokio::time::sleep(Duration::from_millis(stall_ms)).await;
        }
        Ok(self.state.read().await.members.get(&member_id).cloned())
    }

    async fn get_member_by_email(&self, email: &str) -> Result<Option<Member>, AppError> {
        let email = email.trim();
        Ok(self
            .state
            .read()
            .await
            .members
            .values()
            .find(|m| m.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update_remaining_sessions(&self, member_id: Uuid, delta: i32) -> Result<Option<i32>, AppError> {
        let mut state = self.state.write().await;
        let Some(member) = state.members.get_mut(&member_id) else {
            return Ok(None);
        };

        let updated = member.remaining_sessions + delta;
        if updated < 0 || (delta < 0 && self.faults.reject_session_debits.load(Ordering::SeqCst)) {
            return Ok(None);
        }
        member.remaining_sessions = updated;
        Ok(Some(updated))
    }
}

#[async_trait]
impl ClassCatalog for InMemoryStore {
    async fn create_class(&self, class: NewClass) -> Result<GymClass, AppError> {
        let created = GymClass {
            id: Uuid::new_v4(),
            name: class.name,
            schedule: class.schedule,
            start_time: class.start_time,
            end_time: class.end_time,
            capacity: class.capacity,
            enrolled: 0,
            gender: class.gender,
            trainers: class.trainers,
            status: ClassStatus::Active,
            created_at: Utc::now(),
        };
        self.state.write().await.classes.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_class(&self, class_id: Uuid) -> Result<Option<GymClass>, AppError> {
        Ok(self.state.read().await.classes.get(&class_id).cloned())
    }

    async fn list_active(&self, after: NaiveDate) -> Result<Vec<GymClass>, AppError> {
        let state = self.state.read().await;
        let mut classes: Vec<GymClass> = state
            .classes
            .values()
            .filter(|c| c.status == ClassStatus::Active && c.schedule >= after)
            .cloned()
            .collect();
        classes.sort_by_key(|c| (c.schedule, c.start_time));
        Ok(classes)
    }

    async fn update_enrolled(&self, class_id: Uuid, delta: i32) -> Result<Option<i32>, AppError> {
        self.check_enrollment_available()?;
        let mut state = self.state.write().await;
        Ok(state.classes.get_mut(&class_id).map(|class| {
            class.enrolled = (class.enrolled + delta).max(0);
            class.enrolled
        }))
    }

    async fn try_reserve_seat(&self, class_id: Uuid) -> Result<bool, AppError> {
        self.check_enrollment_available()?;
        let lose_race = self.faults.lose_seat_races.load(Ordering::SeqCst);
        let mut state = self.state.write().await;
        match state.classes.get_mut(&class_id) {
            Some(class) if class.enrolled < class.capacity && !lose_race => {
                class.enrolled += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_enrolled(&self, class_id: Uuid, enrolled: i32) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        match state.classes.get_mut(&class_id) {
            Some(class) => {
                class.enrolled = enrolled.max(0);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn insert_booking(&self, member_id: Uuid, class_id: Uuid) -> Result<Booking, AppError> {
        let mut state = self.state.write().await;
        let duplicate = state
            .bookings
            .values()
            .any(|b| b.user_id == member_id && b.class_id == class_id && b.is_confirmed());
        if duplicate {
            return Err(AppError::Conflict(format!(
                "Member {} already has a confirmed booking for class {}",
                member_id, class_id
            )));
        }

        let booking = Booking {
            id: Uuid::new_v4(),
            user_id: member_id,
            class_id,
            status: BookingStatus::Confirmed,
            booking_date: Utc::now(),
            attendance: None,
        };
        state.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, AppError> {
        Ok(self.state.read().await.bookings.get(&booking_id).cloned())
    }

    async fn find_confirmed(&self, member_id: Uuid, class_id: Uuid) -> Result<Option<Booking>, AppError> {
        Ok(self
            .state
            .read()
            .await
            .bookings
            .values()
            .find(|b| b.user_id == member_id && b.class_id == class_id && b.is_confirmed())
            .cloned())
    }

    async fn mark_cancelled(&self, booking_id: Uuid) -> Result<bool, AppError> {
        if self.faults.cancellations_unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Timeout(format!("cancel booking {}", booking_id)));
        }
        let mut state = self.state.write().await;
        match state.bookings.get_mut(&booking_id) {
            Some(booking) if booking.is_confirmed() => {
                booking.status = BookingStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_attendance(&self, booking_id: Uuid, attended: bool) -> Result<Option<Booking>, AppError> {
        let mut state = self.state.write().await;
        match state.bookings.get_mut(&booking_id) {
            Some(booking) if booking.is_confirmed() => {
                booking.attendance = Some(attended);
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_booking(&self, booking_id: Uuid) -> Result<u64, AppError> {
        let remaining_failures = self.faults.failing_deletes.load(Ordering::SeqCst);
        if remaining_failures > 0 {
            self.faults.failing_deletes.store(remaining_failures - 1, Ordering::SeqCst);
            return Err(AppError::Timeout(format!("delete booking {}", booking_id)));
        }
        if self.faults.ignore_deletes_by_id.load(Ordering::SeqCst) {
            return Ok(0);
        }

        let removed = self.state.write().await.bookings.remove(&booking_id);
        Ok(u64::from(removed.is_some()))
    }

    async fn delete_cancelled_for(&self, member_id: Uuid, class_id: Uuid) -> Result<u64, AppError> {
        if self.faults.ignore_fallback_deletes.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let mut state = self.state.write().await;
        let before = state.bookings.len();
        state.bookings.retain(|_, b| {
            !(b.user_id == member_id && b.class_id == class_id && b.status == BookingStatus::Cancelled)
        });
        Ok((before - state.bookings.len()) as u64)
    }

    async fn count_cancelled_for(&self, member_id: Uuid, class_id: Uuid) -> Result<i64, AppError> {
        let state = self.state.read().await;
        Ok(state
            .bookings
            .values()
            .filter(|b| b.user_id == member_id && b.class_id == class_id && b.status == BookingStatus::Cancelled)
            .count() as i64)
    }

    async fn count_confirmed_for_class(&self, class_id: Uuid) -> Result<i64, AppError> {
        let state = self.state.read().await;
        Ok(state
            .bookings
            .values()
            .filter(|b| b.class_id == class_id && b.is_confirmed())
            .count() as i64)
    }

    async fn list_for_member(&self, member_id: Uuid) -> Result<Vec<Booking>, AppError> {
        let state = self.state.read().await;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.user_id == member_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.booking_date.cmp(&a.booking_date));
        Ok(bookings)
    }

    async fn list_for_class(&self, class_id: Uuid) -> Result<Vec<Booking>, AppError> {
        let state = self.state.read().await;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.class_id == class_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.booking_date);
        Ok(bookings)
    }
}
